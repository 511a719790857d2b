//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux) and headless sync servers.
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use bridge_desktop::TokioFileSystem;
//! use core_sync::FileSyncStateStore;
//!
//! let fs = Arc::new(TokioFileSystem::new());
//! let store = FileSyncStateStore::new(repository, registry, fs);
//! ```

mod filesystem;

pub use filesystem::TokioFileSystem;
