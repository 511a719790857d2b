//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host.
//!
//! ## Overview
//!
//! This crate defines the contract between the sync core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that must be implemented differently per host (desktop
//! tray application, render-farm worker, headless service).
//!
//! ## Traits
//!
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Removal of synced
//!   copies on local-drive sites
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Platform Requirements
//!
//! | Host     | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | Headless | `bridge-desktop`    | ✅ Available |
//!
//! ## Error Handling
//!
//! All bridge operations return [`error::Result`], wrapping
//! [`BridgeError`](error::BridgeError). The core maps these into its own
//! error taxonomy (or collects them, for best-effort operations).

pub mod error;
pub mod storage;
pub mod time;

pub use error::{BridgeError, Result};
pub use storage::FileSystemAccess;
pub use time::{Clock, LogLevel, SystemClock};
