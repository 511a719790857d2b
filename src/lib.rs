//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map to the individual workspace
//! crates (`core-sync`, `core-runtime`, `bridge-desktop`). Host applications
//! (tray apps, CLIs, REST front-ends) can depend on `sitesync-workspace` and
//! enable the documented features without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
#[cfg(any(feature = "desktop-shims", feature = "engine"))]
pub use core_runtime;
#[cfg(any(feature = "desktop-shims", feature = "engine"))]
pub use core_sync;
