//! Command implementations for the handler CLI.

pub mod dryrun;
pub mod run;
pub mod version;
