//! CLI command implementations.
//!
//! Each subcommand has its own module with its handler.
//!
//! # Command Modules
//!
//! - [`list`] - Versions available in the catalog
//! - [`installed`] - Versions present on disk
//! - [`install`] - Download, verify, and install a version
//! - [`select`] - Repoint the selection at an installed version
//! - [`uninstall`] - Remove an installed version
//! - [`common`] - Shared parsing and formatting helpers

pub mod common;
pub mod install;
pub mod installed;
pub mod list;
pub mod select;
pub mod uninstall;
