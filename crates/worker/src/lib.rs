//! Command-line worker around the exchange services.

pub mod app;
pub mod cli;
pub mod failure;

pub use app::{Sent, Worker};
pub use cli::{Cli, Commands, ResumeTarget};
