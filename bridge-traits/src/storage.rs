//! File System Abstractions
//!
//! Provides the platform-agnostic trait used by the sync core to inspect and
//! remove the physical copies of synchronized files on a local-drive site.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// File system access trait
///
/// The sync core never opens or transfers files itself; it only needs to
/// remove the local copy when an operator detaches a site from a
/// representation.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn drop_copy(fs: &dyn FileSystemAccess, path: &Path) -> Result<()> {
///     if fs.exists(path).await? {
///         fs.delete_file(path).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Delete a single file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory, failing if it is not empty
    async fn remove_empty_dir(&self, path: &Path) -> Result<()>;
}
