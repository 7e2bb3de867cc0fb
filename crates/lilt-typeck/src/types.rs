use smol_str::SmolStr;
use std::collections::HashMap;
use std::fmt;

// ── Types ────────────────────────────────────────────────────────

/// A monotype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ty {
    /// Rigid type variable. Appears only inside a scheme's quantifier or
    /// a constructor definition.
    Var(SmolStr),
    /// Unification variable, identified by its slot in the substitution.
    Unknown(u32),
    /// Function type: argument → result.
    Fn(Box<Ty>, Box<Ty>),
    /// Applied type constructor: `Con("List", [Int])` = `List<Int>`
    Con(SmolStr, Vec<Ty>),
}

impl Ty {
    pub fn int() -> Ty {
        Ty::Con(SmolStr::new_static("Int"), Vec::new())
    }

    pub fn bool() -> Ty {
        Ty::Con(SmolStr::new_static("Bool"), Vec::new())
    }

    pub fn func(arg: Ty, result: Ty) -> Ty {
        Ty::Fn(Box::new(arg), Box::new(result))
    }

    /// Free unification variables, in order of first encounter.
    pub fn unknowns(&self) -> Vec<u32> {
        let mut acc = Vec::new();
        self.collect_unknowns(&mut acc);
        acc
    }

    fn collect_unknowns(&self, acc: &mut Vec<u32>) {
        match self {
            Ty::Var(_) => {}
            Ty::Unknown(u) => {
                if !acc.contains(u) {
                    acc.push(*u);
                }
            }
            Ty::Fn(arg, result) => {
                arg.collect_unknowns(acc);
                result.collect_unknowns(acc);
            }
            Ty::Con(_, args) => {
                for a in args {
                    a.collect_unknowns(acc);
                }
            }
        }
    }

    /// Replace rigid variables according to `mapping`, leaving everything
    /// else intact.
    pub(crate) fn substitute(&self, mapping: &HashMap<SmolStr, Ty>) -> Ty {
        match self {
            Ty::Var(name) => mapping.get(name).cloned().unwrap_or_else(|| self.clone()),
            Ty::Unknown(_) => self.clone(),
            Ty::Fn(arg, result) => Ty::func(arg.substitute(mapping), result.substitute(mapping)),
            Ty::Con(name, args) => Ty::Con(
                name.clone(),
                args.iter().map(|a| a.substitute(mapping)).collect(),
            ),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Var(name) => write!(f, "{}", name),
            Ty::Unknown(u) => write!(f, "?{}", u),
            Ty::Fn(arg, result) => {
                if matches!(**arg, Ty::Fn(_, _)) {
                    write!(f, "({}) -> {}", arg, result)
                } else {
                    write!(f, "{} -> {}", arg, result)
                }
            }
            Ty::Con(name, args) if args.is_empty() => write!(f, "{}", name),
            Ty::Con(name, args) => {
                write!(f, "{}<", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ">")
            }
        }
    }
}

// ── Schemes ──────────────────────────────────────────────────────

/// A polytype: a prenex universal over a monotype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scheme {
    pub vars: Vec<SmolStr>,
    pub ty: Ty,
}

impl Scheme {
    /// A scheme with no quantified variables.
    pub fn mono(ty: Ty) -> Scheme {
        Scheme {
            vars: Vec::new(),
            ty,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty)
    }
}

// ── Declared data types ──────────────────────────────────────────

/// One constructor of a declared ADT. Field types may reference the
/// declaration's type parameters as rigid variables.
#[derive(Clone, Debug)]
pub struct DataConstructor {
    pub name: SmolStr,
    pub fields: Vec<Ty>,
}

/// A declared ADT: its type parameters and constructors, in declaration
/// order (the order also fixes the runtime tags).
#[derive(Clone, Debug)]
pub struct TypeInfo {
    pub params: Vec<SmolStr>,
    pub constructors: Vec<DataConstructor>,
}

pub type TypeMap = HashMap<SmolStr, TypeInfo>;
