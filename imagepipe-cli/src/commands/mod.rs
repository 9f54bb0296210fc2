//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`cache`] - Disk cache management (clear, stats)
//! - [`config`] - Configuration management (path, show, init)
//! - [`fetch`] - Load images through the pipeline and save them

pub mod cache;
pub mod common;
pub mod config;
pub mod fetch;
