use thiserror::Error;

use crate::location::Location;

/// Defects in the input that abort a compilation. Errors of the compiled
/// program never show up here, they are branches to runtime stubs.
#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("instruction with deopt id {0} can deoptimize but has no environment")]
    MissingEnvironment(u32),
    #[error("cannot move {src:?} to {dest:?}")]
    UnsupportedMove { src: Location, dest: Location },
    #[error("signature of `{0}` cannot be bound: {1}")]
    UnsupportedSignature(String, &'static str),
    #[error("polymorphic call to `{0}` without targets")]
    EmptyPolymorphicCall(String),
    #[error("label {0} referenced but never bound")]
    UnresolvedLabel(usize),
}
