//! External command execution for job handlers.

pub mod command;

pub use command::{CommandExecutor, CommandOutcome, RstarInvocation};
