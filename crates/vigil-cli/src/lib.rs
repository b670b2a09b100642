//! # vigil-cli
//!
//! Command-line interface for Vigil.
//!
//! ## Commands
//!
//! - `vigil serve`: run the service
//! - `vigil check` / `vigil check-app`: ask for a verdict as an enforcement point
//! - `vigil appeal`: appeal a block, optionally escalating to the parent
//! - `vigil console`: pending appeals, verdicts, lists and settings for the parent
//! - `vigil logs`: the audit trail
//! - `vigil config` / `set` / `init` / `doctor`: configuration

pub mod commands;
pub mod output;

pub use commands::Cli;
