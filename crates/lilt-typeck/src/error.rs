use smol_str::SmolStr;
use std::fmt;
use lilt_ast::Span;

use crate::types::Ty;

/// The kinds of fatal inference failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeErrorKind {
    #[error("undefined variable '{0}'")]
    UnknownVariable(SmolStr),

    #[error("unknown type '{0}'")]
    UnknownType(SmolStr),

    #[error("type '{0}' has no constructor '{1}'")]
    UnknownConstructor(SmolStr, SmolStr),

    #[error("infinite type: ?{0} = {1}")]
    OccursCheck(u32, Ty),

    #[error("type mismatch: expected {0}, got {1}")]
    UnifyMismatch(Ty, Ty),
}

impl TypeErrorKind {
    pub(crate) fn at(self, span: Span) -> TypeError {
        TypeError { kind: self, span }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Span,
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}] {}", self.span.start, self.span.end, self.kind)
    }
}

impl std::error::Error for TypeError {}
