pub mod builder;
pub mod model;
pub mod printer;
pub mod verify;

pub use builder::{BuildError, Builder, Slot};
pub use model::*;
pub use verify::{VerifyError, verify_function, verify_module};
