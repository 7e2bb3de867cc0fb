mod lower;

pub use lower::{lower, LowerError, LowerResult};

use smol_str::SmolStr;

// ── Locally-nameless names ───────────────────────────────────────

/// A name under locally-nameless binding: either an index into the
/// enclosing binder scopes or a reference to a top-level declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LnName {
    Bound(u32),
    Free(SmolStr),
}

// ── Expressions ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i32),
    Bool(bool),
    Var(LnName),
    Apply(Box<Expr>, Box<Expr>),
    /// Tagged ADT value: allocate a pack and fill its fields.
    Pack { tag: u32, values: Vec<Expr> },
    /// Tag dispatch over a pack value.
    Match {
        scrutinee: Box<Expr>,
        cases: Vec<Case>,
    },
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// The body is under one binder referring to the bound value.
    Let(Box<Expr>, Box<Expr>),
    /// A WASM local, introduced during emission when binders are
    /// instantiated. Never produced by lowering.
    GetLocal(u32),
}

/// One case of a `Match`: the body is under `binders` binders, one per
/// pack field, left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub tag: u32,
    pub binders: u32,
    pub body: Expr,
}

/// A top-level function. The body's bound indices refer to `params`
/// positionally, left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: SmolStr,
    pub params: Vec<SmolStr>,
    pub body: Expr,
}

impl Expr {
    /// Single-shot opening of the outermost binder group: `Bound(i)`
    /// under no intervening binders becomes `args[i]`, indices are lifted
    /// across `Let` and `Case` binders, and deeper indices shift down by
    /// `args.len()`.
    pub fn instantiate(&self, args: &[Expr]) -> Expr {
        self.open(0, args)
    }

    fn open(&self, depth: u32, args: &[Expr]) -> Expr {
        match self {
            Expr::Int(_) | Expr::Bool(_) | Expr::GetLocal(_) | Expr::Var(LnName::Free(_)) => {
                self.clone()
            }
            Expr::Var(LnName::Bound(j)) => {
                let j = *j;
                if j < depth {
                    Expr::Var(LnName::Bound(j))
                } else if ((j - depth) as usize) < args.len() {
                    args[(j - depth) as usize].clone()
                } else {
                    Expr::Var(LnName::Bound(j - args.len() as u32))
                }
            }
            Expr::Apply(func, arg) => Expr::Apply(
                Box::new(func.open(depth, args)),
                Box::new(arg.open(depth, args)),
            ),
            Expr::Pack { tag, values } => Expr::Pack {
                tag: *tag,
                values: values.iter().map(|v| v.open(depth, args)).collect(),
            },
            Expr::Match { scrutinee, cases } => Expr::Match {
                scrutinee: Box::new(scrutinee.open(depth, args)),
                cases: cases
                    .iter()
                    .map(|c| Case {
                        tag: c.tag,
                        binders: c.binders,
                        body: c.body.open(depth + c.binders, args),
                    })
                    .collect(),
            },
            Expr::If(cond, then, els) => Expr::If(
                Box::new(cond.open(depth, args)),
                Box::new(then.open(depth, args)),
                Box::new(els.open(depth, args)),
            ),
            Expr::Let(value, body) => Expr::Let(
                Box::new(value.open(depth, args)),
                Box::new(body.open(depth + 1, args)),
            ),
        }
    }

    /// Unfold an application spine into its head and arguments.
    pub fn unfold_apply(&self) -> (&Expr, Vec<&Expr>) {
        let mut head = self;
        let mut args = Vec::new();
        while let Expr::Apply(func, arg) = head {
            args.push(arg.as_ref());
            head = func;
        }
        args.reverse();
        (head, args)
    }
}
