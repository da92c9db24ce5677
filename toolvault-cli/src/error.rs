//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use toolvault::lifecycle::ManagerError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// No authentication token available
    MissingToken,
    /// The requested version string could not be parsed
    BadVersion(String),
    /// A manager operation failed
    Manager(ManagerError),
    /// An install attempt ran and failed
    InstallFailed(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::MissingToken => {
                eprintln!();
                eprintln!("Provide a session token via --token or the TOOLVAULT_TOKEN");
                eprintln!("environment variable.");
            }
            CliError::Manager(ManagerError::Catalog(_)) => {
                eprintln!();
                eprintln!("The catalog could not be refreshed. Check your network");
                eprintln!("connection and that your session token has not expired.");
            }
            CliError::Manager(ManagerError::UninstallSelected { .. }) => {
                eprintln!();
                eprintln!("Select a different version first, then retry.");
            }
            _ => {}
        }

        process::exit(self.code())
    }

    fn code(&self) -> i32 {
        match self {
            CliError::LoggingInit(_) => 2,
            CliError::Config(_) => 2,
            CliError::MissingToken => 3,
            CliError::BadVersion(_) => 4,
            CliError::Manager(_) => 1,
            CliError::InstallFailed(_) => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::MissingToken => write!(f, "no session token provided"),
            CliError::BadVersion(s) => write!(f, "cannot parse version {:?}", s),
            CliError::Manager(e) => write!(f, "{}", e),
            CliError::InstallFailed(reason) => write!(f, "install failed: {}", reason),
        }
    }
}

impl From<ManagerError> for CliError {
    fn from(e: ManagerError) -> Self {
        CliError::Manager(e)
    }
}
