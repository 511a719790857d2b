//! # Status Reconciler
//!
//! Derives file-level and representation-level synchronization status from
//! raw [`SiteFileState`] records. Nothing here is persisted; every read
//! recomputes status from the current snapshot.
//!
//! ## File Status
//!
//! Evaluated for one file and one (local, remote) site pair, first match wins:
//!
//! 1. `Paused` - an enclosing scope is paused, or either record is paused
//! 2. `NotAvailable` - neither site has a record
//! 3. `Failed` - either side reached the retry limit
//! 4. `Queued` - either side has not started
//! 5. `InProgress` - either side is partially transferred
//! 6. `SyncedOk` - both sides are complete
//! 7. `NotAvailable` - anything else (corrupt progress values)
//!
//! ## Representation Status
//!
//! Worst-file aggregation: `Paused`, then `Failed`, `Queued`, `InProgress`;
//! `SyncedOk` only when every file is synced. A representation without files
//! is `NotAvailable`. Average progress is reported alongside but never
//! changes the status.

use crate::model::{RepresentationDocument, SiteFileState};
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reconciled synchronization status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    InProgress,
    Queued,
    Failed,
    Paused,
    SyncedOk,
    NotAvailable,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::InProgress,
        SyncStatus::Queued,
        SyncStatus::Failed,
        SyncStatus::Paused,
        SyncStatus::SyncedOk,
        SyncStatus::NotAvailable,
    ];

    /// Machine code shared with existing clients
    pub fn code(&self) -> i32 {
        match self {
            SyncStatus::InProgress => 0,
            SyncStatus::Queued => 1,
            SyncStatus::Failed => 2,
            SyncStatus::Paused => 3,
            SyncStatus::SyncedOk => 4,
            SyncStatus::NotAvailable => -1,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or_else(|| SyncError::InvalidStatus(code.to_string()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::InProgress => "In Progress",
            SyncStatus::Queued => "Queued",
            SyncStatus::Failed => "Failed",
            SyncStatus::Paused => "Paused",
            SyncStatus::SyncedOk => "Synced OK",
            SyncStatus::NotAvailable => "Not available",
        }
    }

    /// Aggregation rank, lower is worse
    fn severity_rank(&self) -> u8 {
        match self {
            SyncStatus::Paused => 0,
            SyncStatus::Failed => 1,
            SyncStatus::Queued => 2,
            SyncStatus::InProgress => 3,
            SyncStatus::SyncedOk => 4,
            SyncStatus::NotAvailable => 5,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    /// Accepts display labels (case-insensitive) or numeric codes
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(code) = s.trim().parse::<i32>() {
            return Self::from_code(code);
        }
        Self::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SyncError::InvalidStatus(s.to_string()))
    }
}

/// Effective progress of one side: `Some(0.0)` when the record is missing,
/// `None` when the stored value is corrupt.
fn side_progress(state: Option<&SiteFileState>) -> Option<f64> {
    match state {
        None => Some(0.0),
        Some(state) => {
            let progress = state.effective_progress();
            (progress.is_finite() && (0.0..=1.0).contains(&progress)).then_some(progress)
        }
    }
}

/// Status of one file for the (local, remote) pair.
pub fn file_status(
    local: Option<&SiteFileState>,
    remote: Option<&SiteFileState>,
    retry_limit: u32,
    enclosing_paused: bool,
) -> SyncStatus {
    let sides = [local, remote];

    if enclosing_paused || sides.iter().flatten().any(|s| s.paused) {
        return SyncStatus::Paused;
    }

    if local.is_none() && remote.is_none() {
        return SyncStatus::NotAvailable;
    }

    if sides.iter().flatten().any(|s| s.tries >= retry_limit) {
        return SyncStatus::Failed;
    }

    let progress = [side_progress(local), side_progress(remote)];

    if progress.iter().flatten().any(|p| *p == 0.0) {
        return SyncStatus::Queued;
    }

    if progress.iter().flatten().any(|p| *p > 0.0 && *p < 1.0) {
        return SyncStatus::InProgress;
    }

    if progress.iter().all(|p| *p == Some(1.0)) {
        return SyncStatus::SyncedOk;
    }

    SyncStatus::NotAvailable
}

/// Aggregate status of a set of file statuses.
pub fn aggregate_status<I>(statuses: I) -> SyncStatus
where
    I: IntoIterator<Item = SyncStatus>,
{
    let mut seen_any = false;
    let mut all_synced = true;
    let mut worst: Option<SyncStatus> = None;

    for status in statuses {
        seen_any = true;
        if status != SyncStatus::SyncedOk {
            all_synced = false;
        }
        if status == SyncStatus::NotAvailable || status == SyncStatus::SyncedOk {
            continue;
        }
        worst = match worst {
            Some(current) if current.severity_rank() <= status.severity_rank() => Some(current),
            _ => Some(status),
        };
    }

    match worst {
        Some(status) => status,
        None if seen_any && all_synced => SyncStatus::SyncedOk,
        None => SyncStatus::NotAvailable,
    }
}

/// Reconciled view of a representation for one (local, remote) site pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub status: SyncStatus,
    /// Per-file status in document order
    pub files: Vec<SyncStatus>,
    pub local_avg_progress: f64,
    pub remote_avg_progress: f64,
}

/// Reconciles a representation.
///
/// `enclosing_paused` is the server/project/representation pause resolved
/// by [`crate::pause::PauseSnapshot`].
pub fn reconcile(
    doc: &RepresentationDocument,
    local_site: &str,
    remote_site: &str,
    retry_limit: u32,
    enclosing_paused: bool,
) -> Reconciliation {
    let files: Vec<SyncStatus> = doc
        .files
        .iter()
        .map(|file| {
            file_status(
                file.site(local_site),
                file.site(remote_site),
                retry_limit,
                enclosing_paused,
            )
        })
        .collect();

    let status = if enclosing_paused && !doc.files.is_empty() {
        SyncStatus::Paused
    } else {
        aggregate_status(files.iter().copied())
    };

    Reconciliation {
        status,
        files,
        local_avg_progress: average_progress(doc, local_site),
        remote_avg_progress: average_progress(doc, remote_site),
    }
}

/// Mean effective progress of `site_name` over the representation's files.
///
/// Display and sort metric only. Missing records count as 0; corrupt
/// values are excluded.
pub fn average_progress(doc: &RepresentationDocument, site_name: &str) -> f64 {
    let values: Vec<f64> = doc
        .files
        .iter()
        .filter_map(|file| side_progress(file.site(site_name)))
        .collect();

    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
