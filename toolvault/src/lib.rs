//! Toolvault - Version lifecycle manager for DevKit toolchain bundles
//!
//! This library tracks every known DevKit version through its lifecycle
//! (available, downloading, verifying, installing, installed, selected),
//! drives the download/extract/install pipeline with resumability and
//! cancellation, and reconciles the remote catalog against what is actually
//! present on disk.
//!
//! # High-Level API
//!
//! The [`lifecycle`] module provides the orchestrator facade:
//!
//! ```ignore
//! use toolvault::catalog::{AuthSession, HttpCatalogClient};
//! use toolvault::config::ManagerConfig;
//! use toolvault::lifecycle::LifecycleManager;
//!
//! let config = ManagerConfig::default();
//! let manager = LifecycleManager::new(config);
//!
//! let session = AuthSession::new("token");
//! manager.refresh(&session).await?;
//!
//! let ticket = manager.request_install(&version_id, &session)?;
//! let outcome = ticket.wait().await;
//! ```
//!
//! # Architecture
//!
//! Components are layered leaves-first:
//!
//! - [`store`] - content-addressed archive cache with resumable downloads
//! - [`catalog`] - remote catalog client (authenticated session capability)
//! - [`registry`] - ground-truth scan of installed bundles and selection
//! - [`verify`] - archive checksum and bundle signature verification
//! - [`install`] - extraction, relocation, and privileged finalization
//! - [`lifecycle`] - the orchestrator that owns per-version state

pub mod assist;
pub mod catalog;
pub mod config;
pub mod install;
pub mod lifecycle;
pub mod logging;
pub mod registry;
pub mod store;
pub mod verify;
pub mod version;

/// Version of the Toolvault library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
