//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`catalog`] - Show the configured provider catalog
//! - [`run`] - Run the broker with a live session

pub mod catalog;
pub mod run;
