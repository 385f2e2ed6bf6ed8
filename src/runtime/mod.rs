//! Executes lowered modules so coroutine behaviour can be observed.

pub mod error;
pub mod interpreter;
pub mod value;

pub use error::{RuntimeError, RuntimeResult};
pub use interpreter::{CoroutineHandle, Event, FrameStorage, Interpreter, RunOptions};
pub use value::{ObjectId, Pointer, RtValue};

#[cfg(test)]
mod tests;
