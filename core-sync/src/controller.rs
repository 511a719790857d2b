//! # Sync Controller
//!
//! Operator-facing mutations: pausing, site assignment, resets, priorities
//! and clearing a site from a whole project.
//!
//! ## Overview
//!
//! The controller is the only component that touches both the
//! [`PauseRegistry`] and the [`FileSyncStateStore`]. Every effective change
//! is logged and published as a [`SyncEvent`]; repeating a pause or unpause
//! is a no-op and publishes nothing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::SyncController;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn example(controller: Arc<SyncController>, id: core_sync::RepresentationId) -> core_sync::Result<()> {
//! controller.pause_project("demo").await?;
//! controller.add_site("demo", &id, Some("gdrive"), false).await?;
//! controller.unpause_project("demo").await?;
//!
//! let report = controller.clear_project("demo", "local").await?;
//! println!("Detached {} representations", report.representations);
//! # Ok(())
//! # }
//! ```

use crate::model::{FileId, RepresentationId, SyncSide};
use crate::pause::{PauseRegistry, PauseScope, PauseSnapshot};
use crate::store::{DeletionFailure, FileSyncStateStore, RemovalReport};
use crate::{Result, SyncError};
use core_runtime::config::DEFAULT_SITE;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Aggregate outcome of [`SyncController::clear_project`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Representations the site was detached from
    pub representations: usize,
    pub removed_records: usize,
    pub deleted_files: usize,
    pub failures: Vec<(RepresentationId, DeletionFailure)>,
    /// Parent directories left in place
    pub retained_dirs: Vec<PathBuf>,
    /// Representations whose local copies were not deleted, with the reason
    pub skipped: Vec<(RepresentationId, String)>,
}

impl ClearReport {
    fn absorb(&mut self, id: RepresentationId, report: RemovalReport) {
        self.representations += 1;
        self.removed_records += report.removed_records;
        self.deleted_files += report.deleted_files;
        self.failures
            .extend(report.failures.into_iter().map(|failure| (id, failure)));
        self.retained_dirs.extend(report.retained_dirs);
        if let Some(reason) = report.skipped {
            self.skipped.push((id, reason));
        }
    }
}

/// Operator controller over pause state and site assignments
pub struct SyncController {
    store: Arc<FileSyncStateStore>,
    pauses: Arc<PauseRegistry>,
    event_bus: EventBus,
}

impl SyncController {
    /// Events are published on the store's bus
    pub fn new(store: Arc<FileSyncStateStore>, pauses: Arc<PauseRegistry>) -> Self {
        let event_bus = store.event_bus().clone();
        Self {
            store,
            pauses,
            event_bus,
        }
    }

    pub fn store(&self) -> &Arc<FileSyncStateStore> {
        &self.store
    }

    pub fn pauses(&self) -> &Arc<PauseRegistry> {
        &self.pauses
    }

    pub async fn pause_snapshot(&self) -> PauseSnapshot {
        self.pauses.snapshot().await
    }

    // ------------------------------------------------------------------------
    // Pause
    // ------------------------------------------------------------------------

    /// Pause the whole server. Returns `false` if it was already paused.
    #[instrument(skip(self))]
    pub async fn pause_server(&self) -> bool {
        self.set_server_paused(true).await
    }

    #[instrument(skip(self))]
    pub async fn unpause_server(&self) -> bool {
        self.set_server_paused(false).await
    }

    pub async fn is_server_paused(&self) -> bool {
        self.pauses.is_paused(PauseScope::Server).await
    }

    async fn set_server_paused(&self, paused: bool) -> bool {
        let changed = self.pauses.set_server(paused).await;
        if changed {
            info!("Sync server {}", if paused { "paused" } else { "unpaused" });
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::ServerPaused { paused }))
                .ok();
        }
        changed
    }

    /// Pause every representation of a project.
    ///
    /// Returns `false` if the project was already paused.
    ///
    /// # Errors
    ///
    /// Returns `ProjectNotConfigured` if the project is not enabled
    #[instrument(skip(self))]
    pub async fn pause_project(&self, project: &str) -> Result<bool> {
        self.set_project_paused(project, true).await
    }

    #[instrument(skip(self))]
    pub async fn unpause_project(&self, project: &str) -> Result<bool> {
        self.set_project_paused(project, false).await
    }

    /// Whether the project or the server is paused
    pub async fn is_project_paused(&self, project: &str) -> bool {
        self.pauses.is_paused(PauseScope::Project(project)).await
    }

    async fn set_project_paused(&self, project: &str, paused: bool) -> Result<bool> {
        self.store.registry().project(project)?;

        let changed = self.pauses.set_project(project, paused).await;
        if changed {
            info!(
                "Project {} {}",
                project,
                if paused { "paused" } else { "unpaused" }
            );
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::ProjectPaused {
                    project: project.to_string(),
                    paused,
                }))
                .ok();
        }
        Ok(changed)
    }

    /// Pause a representation.
    ///
    /// Without `site` the whole representation scope is paused (process
    /// state). With `site` only that site's records are flagged, and the
    /// flag is persisted.
    ///
    /// # Errors
    ///
    /// - `UnknownRepresentation` if the document does not exist
    /// - `SiteNotAssigned` if `site` has no record on the representation
    #[instrument(skip(self), fields(representation_id = %id))]
    pub async fn pause_representation(
        &self,
        project: &str,
        id: &RepresentationId,
        site: Option<&str>,
    ) -> Result<bool> {
        self.set_representation_paused(project, id, site, true)
            .await
    }

    #[instrument(skip(self), fields(representation_id = %id))]
    pub async fn unpause_representation(
        &self,
        project: &str,
        id: &RepresentationId,
        site: Option<&str>,
    ) -> Result<bool> {
        self.set_representation_paused(project, id, site, false)
            .await
    }

    /// Whether the representation (or one site of it) is paused, enclosing
    /// scopes included
    pub async fn is_representation_paused(
        &self,
        project: &str,
        id: &RepresentationId,
        site: Option<&str>,
    ) -> Result<bool> {
        let snapshot = self.pauses.snapshot().await;
        let representation_paused = snapshot.is_paused(PauseScope::Representation {
            project,
            representation_id: id,
        });

        let Some(site) = site else {
            return Ok(representation_paused);
        };

        let site = self.store.registry().resolve_alias(site);
        let document = self.store.get_representation(project, id).await?;
        Ok(representation_paused
            || document.files.iter().filter_map(|f| f.site(&site)).any(|state| {
                snapshot.is_paused(PauseScope::Site {
                    project,
                    representation_id: id,
                    state,
                })
            }))
    }

    async fn set_representation_paused(
        &self,
        project: &str,
        id: &RepresentationId,
        site: Option<&str>,
        paused: bool,
    ) -> Result<bool> {
        let site = site.map(|s| self.store.registry().resolve_alias(s));

        let changed = match &site {
            Some(site) => self.store.set_site_paused(project, id, site, paused).await?,
            None => {
                self.store.get_representation(project, id).await?;
                self.pauses.set_representation(project, id, paused).await
            }
        };

        if changed {
            info!(
                "Representation {} {}{}",
                id,
                if paused { "paused" } else { "unpaused" },
                site.as_deref()
                    .map(|s| format!(" on site '{}'", s))
                    .unwrap_or_default()
            );
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::RepresentationPaused {
                    project: project.to_string(),
                    representation_id: id.to_string(),
                    site,
                    paused,
                }))
                .ok();
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------------
    // Site Assignment
    // ------------------------------------------------------------------------

    /// Assign a site to a representation, `studio` when `site` is `None`.
    ///
    /// # Errors
    ///
    /// See [`FileSyncStateStore::add_site`]
    #[instrument(skip(self), fields(representation_id = %id))]
    pub async fn add_site(
        &self,
        project: &str,
        id: &RepresentationId,
        site: Option<&str>,
        force: bool,
    ) -> Result<usize> {
        let site = self
            .store
            .registry()
            .resolve_alias(site.unwrap_or(DEFAULT_SITE));
        let records = self.store.add_site(project, id, &site, force).await?;

        info!("Added site '{}' to representation {}", site, id);
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::SiteAdded {
                project: project.to_string(),
                representation_id: id.to_string(),
                site,
                forced: force,
            }))
            .ok();
        Ok(records)
    }

    /// Detach a site from a representation.
    ///
    /// # Errors
    ///
    /// See [`FileSyncStateStore::remove_site`]
    #[instrument(skip(self), fields(representation_id = %id))]
    pub async fn remove_site(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        delete_files: bool,
    ) -> Result<RemovalReport> {
        let site = self.store.registry().resolve_alias(site);
        let report = self.store.remove_site(project, id, &site, delete_files).await?;

        info!("Removed site '{}' from representation {}", site, id);
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::SiteRemoved {
                project: project.to_string(),
                representation_id: id.to_string(),
                site,
                deleted_files: report.deleted_files,
                failed_deletions: report.failures.len(),
            }))
            .ok();
        Ok(report)
    }

    /// Detach `site` from every representation of the project carrying it.
    ///
    /// Local copies are deleted only when `site` is this machine's local
    /// site. Deletion failures are collected, never fatal.
    ///
    /// # Errors
    ///
    /// Returns store errors other than a concurrently removed site
    #[instrument(skip(self))]
    pub async fn clear_project(&self, project: &str, site: &str) -> Result<ClearReport> {
        let registry = self.store.registry();
        registry.project(project)?;
        let site = registry.resolve_alias(site);
        let delete_files = site == registry.local_site_id();

        let mut report = ClearReport::default();
        for document in self.store.representations_with_site(project, &site).await? {
            match self
                .store
                .remove_site(project, &document.id, &site, delete_files)
                .await
            {
                Ok(removal) => report.absorb(document.id, removal),
                Err(SyncError::SiteNotAssigned { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        if !report.failures.is_empty() {
            warn!(
                "{} local files could not be deleted while clearing '{}'",
                report.failures.len(),
                site
            );
        }
        info!(
            "Cleared site '{}' from {} representations of project {}",
            site, report.representations, project
        );
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::ProjectCleared {
                project: project.to_string(),
                site,
                representations: report.representations,
            }))
            .ok();
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // File State
    // ------------------------------------------------------------------------

    /// Clear the transfer outcome of one side for one file or all files
    ///
    /// # Errors
    ///
    /// See [`FileSyncStateStore::reset_file_state`]
    #[instrument(skip(self), fields(representation_id = %id))]
    pub async fn reset_file_state(
        &self,
        project: &str,
        id: &RepresentationId,
        side: SyncSide,
        file_id: Option<&FileId>,
    ) -> Result<usize> {
        let site = self.store.site_for_side(project, side)?;
        let reset = self
            .store
            .reset_file_state(project, id, side, file_id)
            .await?;

        info!(
            "Reset {} {} record(s) on site '{}' of representation {}",
            reset,
            side.as_str(),
            site,
            id
        );
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::FileStateReset {
                project: project.to_string(),
                representation_id: id.to_string(),
                site,
                file_id: file_id.map(FileId::as_str),
            }))
            .ok();
        Ok(reset)
    }

    /// # Errors
    ///
    /// See [`FileSyncStateStore::set_priority`]
    #[instrument(skip(self), fields(representation_id = %id))]
    pub async fn set_priority(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        file_id: Option<&FileId>,
        priority: u32,
    ) -> Result<usize> {
        let site = self.store.registry().resolve_alias(site);
        let updated = self
            .store
            .set_priority(project, id, &site, file_id, priority)
            .await?;

        info!(
            "Priority of representation {} on site '{}' set to {}",
            id, site, priority
        );
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::PriorityChanged {
                project: project.to_string(),
                representation_id: id.to_string(),
                site,
                file_id: file_id.map(FileId::as_str),
                priority,
            }))
            .ok();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_report_aggregates_removals() {
        let hero = RepresentationId::new();
        let lamp = RepresentationId::new();
        let mut report = ClearReport::default();

        report.absorb(
            hero,
            RemovalReport {
                removed_records: 2,
                deleted_files: 1,
                failures: vec![DeletionFailure {
                    file_id: FileId::new(),
                    path: Some(PathBuf::from("/cache/hero/hero.abc")),
                    message: "file is locked".to_string(),
                }],
                retained_dirs: vec![PathBuf::from("/cache/hero")],
                skipped: None,
            },
        );
        report.absorb(
            lamp,
            RemovalReport {
                removed_records: 1,
                skipped: Some("not a local drive".to_string()),
                ..RemovalReport::default()
            },
        );

        assert_eq!(report.representations, 2);
        assert_eq!(report.removed_records, 3);
        assert_eq!(report.deleted_files, 1);
        assert_eq!(report.failures[0].0, hero);
        assert_eq!(report.retained_dirs, vec![PathBuf::from("/cache/hero")]);
        assert_eq!(report.skipped, vec![(lamp, "not a local drive".to_string())]);
    }
}
