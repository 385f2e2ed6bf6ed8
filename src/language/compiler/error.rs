use crate::language::ir::{BuildError, VerifyError};
use crate::language::span::Span;
use std::fmt;
use thiserror::Error;

/// Malformed input to the lowering. Aborts the function being lowered;
/// the compiler stays usable for the rest of the program.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoweringError {
    #[error("unknown variable `{name}`")]
    UnknownVariable { name: String, span: Span },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String, span: Span },
    #[error("`{name}` expects {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
        span: Span,
    },
    #[error("`{name}` is not an aggregate")]
    NotAnAggregate { name: String, span: Span },
    #[error("the deallocate statement must be labelled")]
    UnlabeledDeallocate,
    #[error("the deallocate statement never reaches `coro.free`")]
    MissingFrameFree,
    #[error("the coroutine return statement must return a value")]
    MalformedReturn,
    #[error("the promise must be declared as an aggregate")]
    MalformedPromise,
    #[error("parameter move for `{param}` references the parameter {found} times")]
    ParamMoveReference { param: String, found: usize },
    #[error("parameter move for `{param}` does not match a coroutine parameter")]
    UnknownParam { param: String },
    #[error("suspend point `{part}` expression uses its temporary {found} times")]
    TemporaryReference { part: &'static str, found: usize },
    #[error("temporary #{id} is used outside its suspend point")]
    UnboundTemporary { id: u32 },
    #[error("`{construct}` must be resolved before lowering")]
    Unresolved { construct: &'static str, span: Span },
    #[error("`{construct}` is only valid inside a coroutine")]
    NotInCoroutine { construct: &'static str },
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

impl LoweringError {
    pub fn span(&self) -> Option<Span> {
        match self {
            LoweringError::UnknownVariable { span, .. }
            | LoweringError::UnknownFunction { span, .. }
            | LoweringError::ArityMismatch { span, .. }
            | LoweringError::NotAnAggregate { span, .. }
            | LoweringError::Unresolved { span, .. } => Some(*span),
            _ => None,
        }
    }
}

/// Lowering failures of one program, one per failing function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweringErrors {
    pub errors: Vec<FunctionError>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot lower `{function}`: {error}")]
pub struct FunctionError {
    pub function: String,
    #[source]
    pub error: LoweringError,
}

impl fmt::Display for LoweringErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for LoweringErrors {}
