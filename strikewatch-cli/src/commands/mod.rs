//! CLI command implementations.

pub mod cover;
pub mod init;
pub mod run;
