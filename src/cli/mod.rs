//! Command line interface
//!
//! Argument parsing lives in [`args`]; [`runner`] turns a parsed command
//! into a migration run or a metadata publish.

pub mod args;
pub mod runner;

pub use args::{Cli, Command, PublishArgs, RunArgs};
pub use runner::{PublishReport, Runner};
