//! # Transfer Planner
//!
//! Read side consumed by transfer workers: which files to move next, in
//! which direction, for the project's active/remote pair.
//!
//! A file needs a transfer when one side has a copy (`created_at` set) and
//! the other side's record has none and still has retries left:
//!
//! | active copy | remote copy | task       |
//! |-------------|-------------|------------|
//! | yes         | no          | `Upload`   |
//! | no          | yes         | `Download` |
//!
//! Both sides need a record; a site that was never added is not a target.
//! Anything paused (server, project, representation or either site record)
//! is left out. Representations are ordered by priority, highest first,
//! then by id, and capped at the project's `representation_limit`.

use crate::model::{
    FileId, RepresentationDocument, RepresentationId, SiteFileState, DEFAULT_PRIORITY,
};
use crate::pause::{PauseRegistry, PauseScope, PauseSnapshot};
use crate::store::FileSyncStateStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::debug;

/// Direction of a planned transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Active site to remote site
    Upload,
    /// Remote site to active site
    Download,
}

/// One file to transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTask {
    pub representation_id: RepresentationId,
    pub file_id: FileId,
    /// Path template of the file
    pub path: String,
    pub direction: TransferDirection,
    /// Site receiving the copy; results are recorded against it
    pub site: String,
    pub priority: u32,
}

pub struct TransferPlanner {
    store: Arc<FileSyncStateStore>,
    pauses: Arc<PauseRegistry>,
}

impl TransferPlanner {
    pub fn new(store: Arc<FileSyncStateStore>, pauses: Arc<PauseRegistry>) -> Self {
        Self { store, pauses }
    }

    /// Tasks for the next synchronization loop of `project`
    pub async fn plan(&self, project: &str) -> Result<Vec<TransferTask>> {
        let registry = self.store.registry();
        let active = registry.get_active_site(project)?;
        let remote = registry.get_remote_site(project)?;
        let retry_limit = registry.retry_limit(project)?;
        let limit = registry.representation_limit(project)?;

        let snapshot = self.pauses.snapshot().await;
        if snapshot.is_paused(PauseScope::Project(project)) {
            debug!(project = project, "Project paused, nothing to plan");
            return Ok(Vec::new());
        }

        let mut planned: Vec<(u32, RepresentationId, Vec<TransferTask>)> = self
            .store
            .representations(project)
            .await?
            .iter()
            .filter_map(|doc| {
                let tasks = plan_representation(
                    project,
                    doc,
                    &active,
                    &remote,
                    retry_limit,
                    &snapshot,
                );
                let priority = tasks.iter().map(|t| t.priority).max()?;
                Some((priority, doc.id, tasks))
            })
            .collect();

        planned.sort_by_key(|(priority, id, _)| (Reverse(*priority), *id));
        if limit > 0 {
            planned.truncate(limit);
        }

        let tasks: Vec<TransferTask> = planned
            .into_iter()
            .flat_map(|(_, _, tasks)| tasks)
            .collect();
        debug!(
            project = project,
            active = %active,
            remote = %remote,
            tasks = tasks.len(),
            "Planned transfers"
        );
        Ok(tasks)
    }
}

fn plan_representation(
    project: &str,
    doc: &RepresentationDocument,
    active: &str,
    remote: &str,
    retry_limit: u32,
    snapshot: &PauseSnapshot,
) -> Vec<TransferTask> {
    if active == remote
        || snapshot.is_paused(PauseScope::Representation {
            project,
            representation_id: &doc.id,
        })
    {
        return Vec::new();
    }

    let paused = |state: &SiteFileState| {
        snapshot.is_paused(PauseScope::Site {
            project,
            representation_id: &doc.id,
            state,
        })
    };

    doc.files
        .iter()
        .filter_map(|file| {
            let local = file.site(active)?;
            let remote_state = file.site(remote)?;
            if paused(local) || paused(remote_state) {
                return None;
            }

            let (direction, site, target) =
                match (local.created_at.is_some(), remote_state.created_at.is_some()) {
                    (true, false) => (TransferDirection::Upload, remote, remote_state),
                    (false, true) => (TransferDirection::Download, active, local),
                    _ => return None,
                };
            if target.tries >= retry_limit {
                return None;
            }

            Some(TransferTask {
                representation_id: doc.id,
                file_id: file.id,
                path: file.path.clone(),
                direction,
                site: site.to_string(),
                priority: local
                    .priority
                    .or(remote_state.priority)
                    .unwrap_or(DEFAULT_PRIORITY),
            })
        })
        .collect()
}
