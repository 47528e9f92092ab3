//! Command implementations.
//!
//! Each subcommand lives in its own module.

pub(crate) mod completions;
pub(crate) mod execute;
pub(crate) mod robots;
pub(crate) mod upload;
