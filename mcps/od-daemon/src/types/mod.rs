//! Shared types for the worker supervisor

mod command;
mod handle;
mod status;

pub use command::*;
pub use handle::*;
pub use status::*;
