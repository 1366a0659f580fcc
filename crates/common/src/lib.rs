pub mod error;
pub mod hooks;

pub use error::{Error, FromMessage, Result};
