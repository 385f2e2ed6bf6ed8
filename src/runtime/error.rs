use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error("Function `{name}` expected {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("Use of undefined value %{value} in `{function}`")]
    UndefinedValue { function: String, value: u32 },
    #[error("Null pointer dereference")]
    NullDereference,
    #[error("Access to slot {index} of a {slots}-slot object")]
    OutOfBounds { index: u32, slots: u32 },
    #[error("Memory freed twice (object #{object})")]
    DoubleFree { object: u32 },
    #[error("`free` of memory that was not allocated by `malloc` (object #{object})")]
    InvalidFree { object: u32 },
    #[error("Use of freed memory (object #{object})")]
    UseAfterFree { object: u32 },
    #[error("Use of a stack slot after its function returned (object #{object})")]
    DanglingStack { object: u32 },
    #[error("Use of frame slot after coroutine teardown (object #{object})")]
    UseAfterTeardown { object: u32 },
    #[error("Value is not a coroutine handle")]
    InvalidHandle,
    #[error("Coroutine frame #{frame} was already destroyed")]
    FrameDestroyed { frame: u32 },
    #[error("Coroutine frame #{frame} is suspended at its final point and cannot be resumed")]
    ResumeAfterFinal { frame: u32 },
    #[error("Coroutine frame #{frame} is running and cannot be {operation}")]
    FrameRunning { frame: u32, operation: &'static str },
    #[error("Coroutine primitive `{name}` outside a coroutine activation")]
    NoFrame { name: &'static str },
    #[error("Execution reached `unreachable` in `{function}`")]
    Unreachable { function: String },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Uncaught exception {value}")]
    UncaughtException { value: i64 },
    #[error("Step limit of {limit} exceeded")]
    StepLimit { limit: u64 },
}
