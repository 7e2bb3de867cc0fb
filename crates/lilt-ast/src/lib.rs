use la_arena::{Arena, Idx};
use smol_str::SmolStr;
pub use lilt_lexer::Span;

// ── ID types ──────────────────────────────────────────────────────

pub type ExprId = Idx<Expr>;
pub type PatternId = Idx<Pattern>;
pub type TypeExprId = Idx<TypeExpr>;

// ── Program ───────────────────────────────────────────────────────

/// A parsed source file: type declarations followed by one expression.
#[derive(Debug, Clone)]
pub struct Program {
    pub decls: Vec<TypeDecl>,
    pub root: ExprId,
    pub exprs: Arena<Expr>,
    pub patterns: Arena<Pattern>,
    pub type_exprs: Arena<TypeExpr>,
}

/// Algebraic data type declaration: `type Maybe<a> { Nothing(), Just(a) }`
#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: SmolStr,
    pub params: Vec<SmolStr>,
    pub constructors: Vec<Constructor>,
    pub span: Span,
}

/// One constructor of an ADT declaration.
#[derive(Debug, Clone)]
pub struct Constructor {
    pub name: SmolStr,
    pub fields: Vec<TypeExprId>,
    pub span: Span,
}

// ── Expressions ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer literal.
    Int(i32),
    /// Boolean literal.
    Bool(bool),
    /// Variable reference.
    Var(SmolStr),
    /// Lambda: `\x. body`
    Lambda { param: SmolStr, body: ExprId },
    /// Application by juxtaposition: `f x`
    Apply { func: ExprId, arg: ExprId },
    /// Let binding: `let x = e in body`, `let rec f = e in body`
    Let {
        name: SmolStr,
        recursive: bool,
        value: ExprId,
        body: ExprId,
    },
    /// Conditional: `if c then t else e`
    If {
        condition: ExprId,
        then_branch: ExprId,
        else_branch: ExprId,
    },
    /// Pattern match: `match e { Maybe::Just(x) -> x, ... }`
    Match { scrutinee: ExprId, arms: Vec<MatchArm> },
    /// ADT construction: `Maybe::Just(e)`
    Construct {
        type_name: SmolStr,
        ctor: SmolStr,
        args: Vec<ExprId>,
    },
}

/// A match arm: `pattern -> expr`
#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: PatternId,
    pub body: ExprId,
    pub span: Span,
}

// ── Patterns ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    /// Variable binding.
    Var(SmolStr),
    /// Constructor pattern: `Maybe::Just(p)`
    Constructor {
        type_name: SmolStr,
        ctor: SmolStr,
        fields: Vec<PatternId>,
    },
}

// ── Type expressions ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeExprKind {
    /// Lowercase name: a type parameter of the enclosing declaration.
    Param(SmolStr),
    /// Named type, possibly applied: `Int`, `List<a>`
    Named { name: SmolStr, args: Vec<TypeExprId> },
    /// Function type: `a -> b`
    Fn { arg: TypeExprId, result: TypeExprId },
}

// ── Pretty printer ────────────────────────────────────────────────

/// Render a program back to concrete syntax (used by `lilt parse`).
pub fn pretty_print(program: &Program) -> String {
    let mut printer = PrettyPrinter {
        program,
        buf: String::new(),
    };
    printer.print_program();
    printer.buf
}

struct PrettyPrinter<'a> {
    program: &'a Program,
    buf: String,
}

impl<'a> PrettyPrinter<'a> {
    fn print_program(&mut self) {
        for decl in &self.program.decls {
            self.print_decl(decl);
            self.buf.push('\n');
        }
        self.print_expr(self.program.root);
        self.buf.push('\n');
    }

    fn print_decl(&mut self, decl: &TypeDecl) {
        self.buf.push_str("type ");
        self.buf.push_str(&decl.name);
        if !decl.params.is_empty() {
            self.buf.push('<');
            for (i, p) in decl.params.iter().enumerate() {
                if i > 0 {
                    self.buf.push_str(", ");
                }
                self.buf.push_str(p);
            }
            self.buf.push('>');
        }
        self.buf.push_str(" { ");
        for (i, ctor) in decl.constructors.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            self.buf.push_str(&ctor.name);
            self.buf.push('(');
            for (j, &f) in ctor.fields.iter().enumerate() {
                if j > 0 {
                    self.buf.push_str(", ");
                }
                self.print_type_expr(f);
            }
            self.buf.push(')');
        }
        self.buf.push_str(" }");
    }

    fn print_expr(&mut self, id: ExprId) {
        let expr = &self.program.exprs[id];
        match &expr.kind {
            ExprKind::Int(n) => self.buf.push_str(&n.to_string()),
            ExprKind::Bool(b) => self.buf.push_str(if *b { "true" } else { "false" }),
            ExprKind::Var(name) => self.buf.push_str(name),
            ExprKind::Lambda { param, body } => {
                self.buf.push('\\');
                self.buf.push_str(param);
                self.buf.push_str(". ");
                self.print_expr(*body);
            }
            ExprKind::Apply { func, arg } => {
                self.print_atom(*func);
                self.buf.push(' ');
                self.print_atom(*arg);
            }
            ExprKind::Let {
                name,
                recursive,
                value,
                body,
            } => {
                self.buf.push_str(if *recursive { "let rec " } else { "let " });
                self.buf.push_str(name);
                self.buf.push_str(" = ");
                self.print_expr(*value);
                self.buf.push_str(" in ");
                self.print_expr(*body);
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.buf.push_str("if ");
                self.print_expr(*condition);
                self.buf.push_str(" then ");
                self.print_expr(*then_branch);
                self.buf.push_str(" else ");
                self.print_expr(*else_branch);
            }
            ExprKind::Match { scrutinee, arms } => {
                self.buf.push_str("match ");
                self.print_expr(*scrutinee);
                self.buf.push_str(" { ");
                for (i, arm) in arms.iter().enumerate() {
                    if i > 0 {
                        self.buf.push_str(", ");
                    }
                    self.print_pattern(arm.pattern);
                    self.buf.push_str(" -> ");
                    self.print_expr(arm.body);
                }
                self.buf.push_str(" }");
            }
            ExprKind::Construct {
                type_name,
                ctor,
                args,
            } => {
                self.buf.push_str(type_name);
                self.buf.push_str("::");
                self.buf.push_str(ctor);
                self.buf.push('(');
                for (i, &a) in args.iter().enumerate() {
                    if i > 0 {
                        self.buf.push_str(", ");
                    }
                    self.print_expr(a);
                }
                self.buf.push(')');
            }
        }
    }

    /// Print an expression, parenthesized when it is not atomic.
    fn print_atom(&mut self, id: ExprId) {
        let atomic = matches!(
            self.program.exprs[id].kind,
            ExprKind::Int(_)
                | ExprKind::Bool(_)
                | ExprKind::Var(_)
                | ExprKind::Construct { .. }
        );
        if atomic {
            self.print_expr(id);
        } else {
            self.buf.push('(');
            self.print_expr(id);
            self.buf.push(')');
        }
    }

    fn print_pattern(&mut self, id: PatternId) {
        let pat = &self.program.patterns[id];
        match &pat.kind {
            PatternKind::Var(name) => self.buf.push_str(name),
            PatternKind::Constructor {
                type_name,
                ctor,
                fields,
            } => {
                self.buf.push_str(type_name);
                self.buf.push_str("::");
                self.buf.push_str(ctor);
                self.buf.push('(');
                for (i, &f) in fields.iter().enumerate() {
                    if i > 0 {
                        self.buf.push_str(", ");
                    }
                    self.print_pattern(f);
                }
                self.buf.push(')');
            }
        }
    }

    fn print_type_expr(&mut self, id: TypeExprId) {
        let ty = &self.program.type_exprs[id];
        match &ty.kind {
            TypeExprKind::Param(name) => self.buf.push_str(name),
            TypeExprKind::Named { name, args } => {
                self.buf.push_str(name);
                if !args.is_empty() {
                    self.buf.push('<');
                    for (i, &a) in args.iter().enumerate() {
                        if i > 0 {
                            self.buf.push_str(", ");
                        }
                        self.print_type_expr(a);
                    }
                    self.buf.push('>');
                }
            }
            TypeExprKind::Fn { arg, result } => {
                let arg_is_fn = matches!(
                    self.program.type_exprs[*arg].kind,
                    TypeExprKind::Fn { .. }
                );
                if arg_is_fn {
                    self.buf.push('(');
                    self.print_type_expr(*arg);
                    self.buf.push(')');
                } else {
                    self.print_type_expr(*arg);
                }
                self.buf.push_str(" -> ");
                self.print_type_expr(*result);
            }
        }
    }
}
