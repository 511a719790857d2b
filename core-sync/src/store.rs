//! # File Sync State Store
//!
//! Mutation API over the per-(file, site) transfer records.
//!
//! ## Overview
//!
//! `FileSyncStateStore` validates every mutation against the site registry
//! and the current document, then hands one atomic update to the
//! [`RepresentationRepository`]. It also owns the only destructive side
//! effect of the engine: deleting the local copies of a representation when
//! a local-drive site is detached from it.
//!
//! ## Transfer Results
//!
//! Workers report back through three calls, each returning the updated
//! record and publishing a [`TransferEvent`]:
//!
//! ```ignore
//! store.record_progress("demo", &file_id, "gdrive", 0.4).await?;
//! store.record_failure("demo", &file_id, "gdrive", "quota exceeded").await?;
//! let state = store.record_success("demo", &file_id, "gdrive", Some(drive_id)).await?;
//! assert_eq!(state.effective_progress(), 1.0);
//! ```
//!
//! Failures are data, not errors: they land in `tries`, `error` and
//! `last_failed_at` and surface through status reconciliation.

use crate::model::{
    FileId, RepresentationDocument, RepresentationId, SiteFileState, SiteStateUpdate, SyncSide,
    MAX_PRIORITY, MIN_PRIORITY,
};
use crate::repository::RepresentationRepository;
use crate::sites::SiteRegistry;
use crate::{Result, SyncError};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::{Clock, SystemClock};
use core_runtime::events::{CoreEvent, EventBus, TransferEvent};
use core_runtime::logging::strip_path;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A local copy that could not be deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    pub file_id: FileId,
    /// `None` when the path itself could not be resolved
    pub path: Option<PathBuf>,
    pub message: String,
}

/// Outcome of detaching a site from a representation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    /// Site records deleted from the document
    pub removed_records: usize,
    /// Local copies deleted
    pub deleted_files: usize,
    pub failures: Vec<DeletionFailure>,
    /// Parent directories left in place (not empty, or not removable)
    pub retained_dirs: Vec<PathBuf>,
    /// Why file deletion was not attempted, when it was requested
    pub skipped: Option<String>,
}

impl RemovalReport {
    /// No deletion failed and none was skipped
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_none()
    }
}

/// Validated mutations of representation sync state
pub struct FileSyncStateStore {
    repository: Arc<dyn RepresentationRepository>,
    registry: Arc<SiteRegistry>,
    file_system: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl FileSyncStateStore {
    pub fn new(
        repository: Arc<dyn RepresentationRepository>,
        registry: Arc<SiteRegistry>,
        file_system: Arc<dyn FileSystemAccess>,
    ) -> Self {
        Self {
            repository,
            registry,
            file_system,
            clock: Arc::new(SystemClock),
            event_bus: EventBus::default(),
        }
    }

    /// Use `clock` for transfer timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish transfer events on `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn registry(&self) -> &Arc<SiteRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// Insert or replace a published representation
    ///
    /// # Errors
    ///
    /// Returns `ProjectNotConfigured` if the project is not enabled
    pub async fn insert_representation(
        &self,
        project: &str,
        document: &RepresentationDocument,
    ) -> Result<()> {
        self.registry.project(project)?;
        self.repository.insert(project, document).await?;
        debug!(
            project = project,
            representation_id = %document.id,
            files = document.files.len(),
            "Stored representation"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `UnknownRepresentation` if no such document exists
    pub async fn get_representation(
        &self,
        project: &str,
        id: &RepresentationId,
    ) -> Result<RepresentationDocument> {
        self.repository
            .find_by_id(project, id)
            .await?
            .ok_or_else(|| SyncError::UnknownRepresentation {
                project: project.to_string(),
                representation_id: id.to_string(),
            })
    }

    /// Point-in-time copy of every document of the project
    pub async fn representations(&self, project: &str) -> Result<Vec<RepresentationDocument>> {
        self.repository.list(project).await
    }

    /// Documents carrying a record for `site` on at least one file
    pub async fn representations_with_site(
        &self,
        project: &str,
        site: &str,
    ) -> Result<Vec<RepresentationDocument>> {
        let site = self.registry.resolve_alias(site);
        let mut documents = self.repository.list(project).await?;
        documents.retain(|doc| doc.has_site(&site));
        Ok(documents)
    }

    /// Site name behind one side of the project's active/remote pair
    pub fn site_for_side(&self, project: &str, side: SyncSide) -> Result<String> {
        match side {
            SyncSide::Local => self.registry.get_active_site(project),
            SyncSide::Remote => self.registry.get_remote_site(project),
        }
    }

    fn registered_site(&self, project: &str, site: &str) -> Result<String> {
        let site = self.registry.resolve_alias(site);
        if !self.registry.is_registered(project, &site)? {
            return Err(SyncError::UnknownSite {
                project: project.to_string(),
                site,
            });
        }
        Ok(site)
    }

    // ------------------------------------------------------------------------
    // Site Assignment
    // ------------------------------------------------------------------------

    /// Assign `site` to every file of the representation.
    ///
    /// Returns the number of records created (or reset, with `force`).
    ///
    /// # Errors
    ///
    /// - `UnknownSite` if the site is not registered for the project
    /// - `UnknownRepresentation` if the document does not exist
    /// - `AlreadyAssigned` if the site is present and `force` is false
    pub async fn add_site(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        force: bool,
    ) -> Result<usize> {
        let site = self.registered_site(project, site)?;
        let document = self.get_representation(project, id).await?;

        if document.has_site(&site) && !force {
            return Err(SyncError::AlreadyAssigned {
                representation_id: id.to_string(),
                site,
            });
        }

        let touched = self
            .repository
            .add_site_records(project, id, &site, force)
            .await?;
        debug!(
            project = project,
            representation_id = %id,
            site = %site,
            records = touched,
            forced = force,
            "Assigned site"
        );
        Ok(touched)
    }

    /// Detach `site` from the representation.
    ///
    /// Records are always removed first. With `delete_files`, the local
    /// copies are then deleted best-effort; this is only attempted when
    /// `site` is this machine's local site and backed by `local_drive`.
    ///
    /// # Errors
    ///
    /// - `UnknownRepresentation` if the document does not exist
    /// - `SiteNotAssigned` if no file carries a record for the site
    pub async fn remove_site(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        delete_files: bool,
    ) -> Result<RemovalReport> {
        let site = self.registry.resolve_alias(site);
        let document = self.get_representation(project, id).await?;

        if !document.has_site(&site) {
            return Err(SyncError::SiteNotAssigned {
                representation_id: id.to_string(),
                site,
            });
        }

        let mut report = RemovalReport {
            removed_records: self
                .repository
                .remove_site_records(project, id, &site)
                .await?,
            ..RemovalReport::default()
        };

        if delete_files {
            self.delete_local_copies(project, &document, &site, &mut report)
                .await;
        }

        debug!(
            project = project,
            representation_id = %id,
            site = %site,
            records = report.removed_records,
            deleted_files = report.deleted_files,
            failures = report.failures.len(),
            "Detached site"
        );
        Ok(report)
    }

    async fn delete_local_copies(
        &self,
        project: &str,
        document: &RepresentationDocument,
        site: &str,
        report: &mut RemovalReport,
    ) {
        if site != self.registry.local_site_id() {
            report.skipped = Some(format!(
                "Site '{}' is not this machine's local site '{}'",
                site,
                self.registry.local_site_id()
            ));
        } else {
            match self.registry.get_provider_for_site(project, site) {
                Ok(provider) if provider.is_local_drive() => {}
                Ok(provider) => {
                    report.skipped = Some(format!(
                        "Site '{}' is backed by '{}', not a local drive",
                        site, provider
                    ));
                }
                Err(e) => report.skipped = Some(e.to_string()),
            }
        }

        if let Some(reason) = &report.skipped {
            warn!(
                project = project,
                representation_id = %document.id,
                "Local files not deleted: {}",
                reason
            );
            return;
        }

        let mut parents = BTreeSet::new();
        for file in document.files.iter().filter(|f| f.site(site).is_some()) {
            let path = match self.registry.resolve_local_path(project, site, &file.path) {
                Ok(path) => path,
                Err(e) => {
                    report.failures.push(DeletionFailure {
                        file_id: file.id,
                        path: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let deleted = match self.file_system.exists(&path).await {
                Ok(true) => self.file_system.delete_file(&path).await.map(|_| true),
                Ok(false) => Ok(false),
                Err(e) => Err(e),
            };

            match deleted {
                Ok(deleted) => {
                    if deleted {
                        report.deleted_files += 1;
                        debug!(path = %strip_path(&path.to_string_lossy()), "Deleted local copy");
                    }
                    if let Some(parent) = path.parent() {
                        parents.insert(parent.to_path_buf());
                    }
                }
                Err(e) => {
                    warn!(path = %strip_path(&path.to_string_lossy()), "Failed to delete local copy: {}", e);
                    report.failures.push(DeletionFailure {
                        file_id: file.id,
                        path: Some(path),
                        message: e.to_string(),
                    });
                }
            }
        }

        for dir in parents {
            if self.file_system.remove_empty_dir(&dir).await.is_err() {
                report.retained_dirs.push(dir);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Operator Mutations
    // ------------------------------------------------------------------------

    /// Clear the transfer outcome of one side, for one file or all files.
    ///
    /// Keeps `paused` and `priority`. Returns the number of records reset.
    ///
    /// # Errors
    ///
    /// - `UnknownRepresentation` / `UnknownFile` for missing targets
    /// - `SiteNotAssigned` if the side's site has no record to reset
    pub async fn reset_file_state(
        &self,
        project: &str,
        id: &RepresentationId,
        side: SyncSide,
        file_id: Option<&FileId>,
    ) -> Result<usize> {
        let site = self.site_for_side(project, side)?;
        let document = self.get_representation(project, id).await?;
        self.check_assigned(project, &document, &site, file_id)?;

        self.repository
            .update_site_state(project, id, file_id, &site, &SiteStateUpdate::Reset)
            .await
    }

    /// Set the persisted pause flag of the site's records.
    ///
    /// Returns `false` if every record already had that flag.
    ///
    /// # Errors
    ///
    /// - `UnknownRepresentation` if the document does not exist
    /// - `SiteNotAssigned` if no file carries a record for the site
    pub async fn set_site_paused(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        paused: bool,
    ) -> Result<bool> {
        let site = self.registry.resolve_alias(site);
        let document = self.get_representation(project, id).await?;
        self.check_assigned(project, &document, &site, None)?;

        let changed = document
            .files
            .iter()
            .filter_map(|f| f.site(&site))
            .any(|state| state.paused != paused);
        if !changed {
            return Ok(false);
        }

        self.repository
            .update_site_state(project, id, None, &site, &SiteStateUpdate::Paused(paused))
            .await?;
        Ok(true)
    }

    /// Set the transfer priority of the site's records, for one file or all.
    ///
    /// # Errors
    ///
    /// - `InvalidPriority` outside `1..=1000`
    /// - `UnknownRepresentation` / `UnknownFile` for missing targets
    /// - `SiteNotAssigned` if the site has no record to update
    pub async fn set_priority(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        file_id: Option<&FileId>,
        priority: u32,
    ) -> Result<usize> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(SyncError::InvalidPriority(priority));
        }

        let site = self.registry.resolve_alias(site);
        let document = self.get_representation(project, id).await?;
        self.check_assigned(project, &document, &site, file_id)?;

        self.repository
            .update_site_state(
                project,
                id,
                file_id,
                &site,
                &SiteStateUpdate::Priority(priority),
            )
            .await
    }

    fn check_assigned(
        &self,
        project: &str,
        document: &RepresentationDocument,
        site: &str,
        file_id: Option<&FileId>,
    ) -> Result<()> {
        let assigned = match file_id {
            Some(file_id) => document
                .file(file_id)
                .ok_or_else(|| SyncError::UnknownFile {
                    project: project.to_string(),
                    file_id: file_id.to_string(),
                })?
                .site(site)
                .is_some(),
            None => document.has_site(site),
        };

        if assigned {
            Ok(())
        } else {
            Err(SyncError::SiteNotAssigned {
                representation_id: document.id.to_string(),
                site: site.to_string(),
            })
        }
    }

    // ------------------------------------------------------------------------
    // Transfer Results
    // ------------------------------------------------------------------------

    /// Record in-flight progress of a transfer to `site`
    ///
    /// # Errors
    ///
    /// - `InvalidProgress` unless `progress` is a finite value in `0.0..=1.0`
    /// - `UnknownFile` / `SiteNotAssigned` for missing targets
    pub async fn record_progress(
        &self,
        project: &str,
        file_id: &FileId,
        site: &str,
        progress: f64,
    ) -> Result<SiteFileState> {
        if !progress.is_finite() || !(0.0..=1.0).contains(&progress) {
            return Err(SyncError::InvalidProgress(progress));
        }

        let state = self
            .apply_transfer_update(project, file_id, site, SiteStateUpdate::Progress(progress))
            .await?;

        self.event_bus
            .emit(CoreEvent::Transfer(TransferEvent::Progress {
                project: project.to_string(),
                file_id: file_id.to_string(),
                site: state.site_name.clone(),
                progress,
            }))
            .ok();
        Ok(state)
    }

    /// Record a completed transfer to `site`
    ///
    /// # Errors
    ///
    /// Returns `UnknownFile` / `SiteNotAssigned` for missing targets
    pub async fn record_success(
        &self,
        project: &str,
        file_id: &FileId,
        site: &str,
        provider_file_id: Option<String>,
    ) -> Result<SiteFileState> {
        let update = SiteStateUpdate::Success {
            at: self.clock.now(),
            provider_file_id,
        };
        let state = self
            .apply_transfer_update(project, file_id, site, update)
            .await?;

        info!(
            project = project,
            file_id = %file_id,
            site = %state.site_name,
            "Transfer completed"
        );
        self.event_bus
            .emit(CoreEvent::Transfer(TransferEvent::Succeeded {
                project: project.to_string(),
                file_id: file_id.to_string(),
                site: state.site_name.clone(),
            }))
            .ok();
        Ok(state)
    }

    /// Record a failed transfer attempt to `site`
    ///
    /// # Errors
    ///
    /// Returns `UnknownFile` / `SiteNotAssigned` for missing targets
    pub async fn record_failure(
        &self,
        project: &str,
        file_id: &FileId,
        site: &str,
        error: impl Into<String>,
    ) -> Result<SiteFileState> {
        let error = error.into();
        let retry_limit = self.registry.retry_limit(project)?;
        let update = SiteStateUpdate::Failure {
            at: self.clock.now(),
            error: error.clone(),
        };
        let state = self
            .apply_transfer_update(project, file_id, site, update)
            .await?;
        let exhausted = state.tries >= retry_limit;

        warn!(
            project = project,
            file_id = %file_id,
            site = %state.site_name,
            tries = state.tries,
            exhausted = exhausted,
            "Transfer failed: {}",
            error
        );
        self.event_bus
            .emit(CoreEvent::Transfer(TransferEvent::Failed {
                project: project.to_string(),
                file_id: file_id.to_string(),
                site: state.site_name.clone(),
                message: error,
                tries: state.tries,
                exhausted,
            }))
            .ok();
        Ok(state)
    }

    async fn apply_transfer_update(
        &self,
        project: &str,
        file_id: &FileId,
        site: &str,
        update: SiteStateUpdate,
    ) -> Result<SiteFileState> {
        let site = self.registry.resolve_alias(site);
        let unknown_file = || SyncError::UnknownFile {
            project: project.to_string(),
            file_id: file_id.to_string(),
        };

        let document = self
            .repository
            .find_by_file(project, file_id)
            .await?
            .ok_or_else(unknown_file)?;
        self.check_assigned(project, &document, &site, Some(file_id))?;

        self.repository
            .update_site_state(project, &document.id, Some(file_id), &site, &update)
            .await?;

        // re-read: another writer may have touched the cell in between
        let document = self.get_representation(project, &document.id).await?;
        document
            .file(file_id)
            .and_then(|file| file.site(&site))
            .cloned()
            .ok_or_else(|| SyncError::SiteNotAssigned {
                representation_id: document.id.to_string(),
                site,
            })
    }
}
