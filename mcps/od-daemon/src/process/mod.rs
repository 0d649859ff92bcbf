//! OS process collaborators
//!
//! The supervisor only touches the OS through these two traits, so tests
//! can swap in deterministic fakes.

pub mod inspector;
pub mod launcher;

pub use inspector::{ProcessInspector, SysinfoInspector};
pub use launcher::{ProcessLauncher, SystemLauncher};
