//! Shared utilities

pub mod command;
pub mod error;
pub mod prompt;
pub mod scratch;
pub mod signal;
