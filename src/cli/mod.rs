//! Command-line administration and dry-run checks.

pub mod commands;
pub mod render;

pub use commands::{
    execute, AclArgs, CheckArgs, Command, CommandContext, CommandError, DomainArgs, ListArgs,
    Operation,
};
