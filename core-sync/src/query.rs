//! # Sync Query Service
//!
//! Sorted, filtered, paginated projections of reconciled sync state for
//! operator views.
//!
//! ## Overview
//!
//! - [`SyncQueryService::list_representations`] - one row per representation
//!   assigned to both the active and the remote site
//! - [`SyncQueryService::list_files`] - one row per file of a representation
//!
//! Each call reads one snapshot of the documents and one [`PauseSnapshot`],
//! reconciles status, filters, sorts and only then pages. Every sort is
//! completed by an id tie-break, so walking the pages of an unchanged data
//! set yields each row exactly once. Between two page fetches the data may
//! change; each page is consistent with the state at its own fetch.
//!
//! Data quality never fails a query: missing or corrupt records reconcile
//! to `NotAvailable` and missing timestamps sort as absent.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let query = SummaryQuery::default()
//!     .with_sort(SummaryColumn::Priority, SortOrder::Descending)
//!     .with_filter("hero")
//!     .with_page(PageRequest::new(0, 20));
//! let page = service.list_representations("demo", &query).await?;
//! ```

use crate::model::{
    FileId, RepresentationDocument, RepresentationFile, RepresentationId, DEFAULT_PRIORITY,
};
use crate::pagination::{Page, PageRequest};
use crate::pause::{PauseRegistry, PauseScope, PauseSnapshot};
use crate::status::{average_progress, reconcile, SyncStatus};
use crate::store::FileSyncStateStore;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

/// Sortable columns of the representation summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SummaryColumn {
    Asset,
    Subset,
    Version,
    Representation,
    LocalUpdated,
    RemoteUpdated,
    FilesCount,
    FilesSize,
    Priority,
    Status,
}

impl SummaryColumn {
    pub const ALL: [SummaryColumn; 10] = [
        SummaryColumn::Asset,
        SummaryColumn::Subset,
        SummaryColumn::Version,
        SummaryColumn::Representation,
        SummaryColumn::LocalUpdated,
        SummaryColumn::RemoteUpdated,
        SummaryColumn::FilesCount,
        SummaryColumn::FilesSize,
        SummaryColumn::Priority,
        SummaryColumn::Status,
    ];
}

/// Sortable columns of the file detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetailColumn {
    Path,
    LocalUpdated,
    RemoteUpdated,
    Size,
    Priority,
    Status,
}

impl DetailColumn {
    pub const ALL: [DetailColumn; 6] = [
        DetailColumn::Path,
        DetailColumn::LocalUpdated,
        DetailColumn::RemoteUpdated,
        DetailColumn::Size,
        DetailColumn::Priority,
        DetailColumn::Status,
    ];
}

/// Sort, filter and page of a summary listing
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryQuery {
    pub column: SummaryColumn,
    pub order: SortOrder,
    /// Case-insensitive substring of asset, subset or representation name;
    /// a representation id matches that representation only
    pub filter: Option<String>,
    /// Keep only rows with one of these statuses
    pub statuses: Option<HashSet<SyncStatus>>,
    pub page: PageRequest,
}

impl Default for SummaryQuery {
    fn default() -> Self {
        Self {
            column: SummaryColumn::RemoteUpdated,
            order: SortOrder::Descending,
            filter: None,
            statuses: None,
            page: PageRequest::default(),
        }
    }
}

impl SummaryQuery {
    pub fn with_sort(mut self, column: SummaryColumn, order: SortOrder) -> Self {
        self.column = column;
        self.order = order;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = SyncStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }
}

/// Sort, filter and page of a file listing
#[derive(Debug, Clone, PartialEq)]
pub struct DetailQuery {
    pub column: DetailColumn,
    pub order: SortOrder,
    /// Case-insensitive substring of the path; a file id matches that file only
    pub filter: Option<String>,
    pub statuses: Option<HashSet<SyncStatus>>,
    pub page: PageRequest,
}

impl Default for DetailQuery {
    fn default() -> Self {
        Self {
            column: DetailColumn::Path,
            order: SortOrder::Ascending,
            filter: None,
            statuses: None,
            page: PageRequest::default(),
        }
    }
}

impl DetailQuery {
    pub fn with_sort(mut self, column: DetailColumn, order: SortOrder) -> Self {
        self.column = column;
        self.order = order;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = SyncStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }
}

/// One row of the representation summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentationSummary {
    pub id: RepresentationId,
    pub asset: String,
    pub subset: String,
    pub version: Option<u32>,
    pub version_label: String,
    pub representation: String,
    pub local_updated: Option<DateTime<Utc>>,
    pub remote_updated: Option<DateTime<Utc>>,
    pub files_count: usize,
    pub files_size: u64,
    pub priority: u32,
    pub status: SyncStatus,
    pub status_code: i32,
    pub status_label: String,
    pub local_avg_progress: f64,
    pub remote_avg_progress: f64,
}

/// One row of the file detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDetail {
    pub file_id: FileId,
    pub path: String,
    pub local_updated: Option<DateTime<Utc>>,
    pub remote_updated: Option<DateTime<Utc>>,
    pub size: u64,
    pub priority: u32,
    pub status: SyncStatus,
    pub status_code: i32,
    pub status_label: String,
    /// Highest failed-attempt count of the two sides
    pub tries: u32,
    pub local_error: Option<String>,
    pub remote_error: Option<String>,
    pub local_progress: f64,
    pub remote_progress: f64,
}

/// Read-only query service over the store
pub struct SyncQueryService {
    store: Arc<FileSyncStateStore>,
    pauses: Arc<PauseRegistry>,
}

impl SyncQueryService {
    pub fn new(store: Arc<FileSyncStateStore>, pauses: Arc<PauseRegistry>) -> Self {
        Self { store, pauses }
    }

    /// One page of representation summaries for the project's active/remote
    /// pair
    ///
    /// # Errors
    ///
    /// Returns `ProjectNotConfigured` for unknown projects, or repository
    /// errors
    pub async fn list_representations(
        &self,
        project: &str,
        query: &SummaryQuery,
    ) -> Result<Page<RepresentationSummary>> {
        let registry = self.store.registry();
        let local = registry.get_active_site(project)?;
        let remote = registry.get_remote_site(project)?;
        let retry_limit = registry.retry_limit(project)?;
        let snapshot = self.pauses.snapshot().await;

        let filter = query.filter.as_deref().map(TextFilter::new);
        let mut rows: Vec<RepresentationSummary> = self
            .store
            .representations(project)
            .await?
            .iter()
            .filter(|doc| doc.has_site(&local) && doc.has_site(&remote))
            .filter(|doc| filter.as_ref().map_or(true, |f| f.matches_representation(doc)))
            .map(|doc| summarize(project, doc, &local, &remote, retry_limit, &snapshot))
            .filter(|row| {
                query
                    .statuses
                    .as_ref()
                    .map_or(true, |statuses| statuses.contains(&row.status))
            })
            .collect();

        rows.sort_by(|a, b| {
            query
                .order
                .apply(compare_summary(a, b, query.column))
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!(
            project = project,
            rows = rows.len(),
            skip = query.page.skip,
            "Listed representations"
        );
        Ok(Page::slice(rows, query.page))
    }

    /// One page of file details of a representation
    ///
    /// # Errors
    ///
    /// Returns `UnknownRepresentation` if the document does not exist, or
    /// repository errors
    pub async fn list_files(
        &self,
        project: &str,
        id: &RepresentationId,
        query: &DetailQuery,
    ) -> Result<Page<FileDetail>> {
        let registry = self.store.registry();
        let local = registry.get_active_site(project)?;
        let remote = registry.get_remote_site(project)?;
        let retry_limit = registry.retry_limit(project)?;
        let snapshot = self.pauses.snapshot().await;

        let doc = self.store.get_representation(project, id).await?;
        let enclosing_paused = snapshot.is_paused(PauseScope::Representation {
            project,
            representation_id: &doc.id,
        });
        let reconciliation = reconcile(&doc, &local, &remote, retry_limit, enclosing_paused);

        let filter = query.filter.as_deref().map(TextFilter::new);
        let mut rows: Vec<FileDetail> = doc
            .files
            .iter()
            .zip(reconciliation.files)
            .filter(|(file, _)| filter.as_ref().map_or(true, |f| f.matches_file(file)))
            .map(|(file, status)| detail(file, status, &local, &remote))
            .filter(|row| {
                query
                    .statuses
                    .as_ref()
                    .map_or(true, |statuses| statuses.contains(&row.status))
            })
            .collect();

        rows.sort_by(|a, b| {
            query
                .order
                .apply(compare_detail(a, b, query.column))
                .then_with(|| a.file_id.cmp(&b.file_id))
        });

        Ok(Page::slice(rows, query.page))
    }
}

/// Free-text filter; exact id match when the text parses as an id
enum TextFilter {
    Id(uuid::Uuid),
    Text(String),
}

impl TextFilter {
    fn new(filter: &str) -> Self {
        match uuid::Uuid::parse_str(filter.trim()) {
            Ok(id) => TextFilter::Id(id),
            Err(_) => TextFilter::Text(filter.trim().to_lowercase()),
        }
    }

    fn matches_representation(&self, doc: &RepresentationDocument) -> bool {
        match self {
            TextFilter::Id(id) => doc.id == RepresentationId::from(*id),
            TextFilter::Text(text) => [
                &doc.context.asset,
                &doc.context.subset,
                &doc.context.representation,
            ]
            .iter()
            .any(|value| value.to_lowercase().contains(text.as_str())),
        }
    }

    fn matches_file(&self, file: &RepresentationFile) -> bool {
        match self {
            TextFilter::Id(id) => file.id == FileId::from(*id),
            TextFilter::Text(text) => file.path.to_lowercase().contains(text.as_str()),
        }
    }
}

/// Local record's priority first, then the remote one's, then the default
fn representation_priority(doc: &RepresentationDocument, local: &str, remote: &str) -> u32 {
    let highest = |site: &str| {
        doc.files
            .iter()
            .filter_map(|f| f.site(site).and_then(|s| s.priority))
            .max()
    };
    highest(local)
        .or_else(|| highest(remote))
        .unwrap_or(DEFAULT_PRIORITY)
}

fn summarize(
    project: &str,
    doc: &RepresentationDocument,
    local: &str,
    remote: &str,
    retry_limit: u32,
    snapshot: &PauseSnapshot,
) -> RepresentationSummary {
    let enclosing_paused = snapshot.is_paused(PauseScope::Representation {
        project,
        representation_id: &doc.id,
    });
    let reconciliation = reconcile(doc, local, remote, retry_limit, enclosing_paused);

    RepresentationSummary {
        id: doc.id,
        asset: doc.context.asset.clone(),
        subset: doc.context.subset.clone(),
        version: doc.context.version,
        version_label: doc.context.version_label(),
        representation: doc.context.representation.clone(),
        local_updated: doc.updated_at(local),
        remote_updated: doc.updated_at(remote),
        files_count: doc.files.len(),
        files_size: doc.files_size(),
        priority: representation_priority(doc, local, remote),
        status: reconciliation.status,
        status_code: reconciliation.status.code(),
        status_label: reconciliation.status.label().to_string(),
        local_avg_progress: average_progress(doc, local),
        remote_avg_progress: average_progress(doc, remote),
    }
}

fn detail(file: &RepresentationFile, status: SyncStatus, local: &str, remote: &str) -> FileDetail {
    let local_state = file.site(local);
    let remote_state = file.site(remote);

    FileDetail {
        file_id: file.id,
        path: file.path.clone(),
        local_updated: local_state.and_then(|s| s.updated_at()),
        remote_updated: remote_state.and_then(|s| s.updated_at()),
        size: file.size,
        priority: local_state
            .and_then(|s| s.priority)
            .or_else(|| remote_state.and_then(|s| s.priority))
            .unwrap_or(DEFAULT_PRIORITY),
        status,
        status_code: status.code(),
        status_label: status.label().to_string(),
        tries: local_state
            .map_or(0, |s| s.tries)
            .max(remote_state.map_or(0, |s| s.tries)),
        local_error: local_state.and_then(|s| s.error.clone()),
        remote_error: remote_state.and_then(|s| s.error.clone()),
        local_progress: local_state.map_or(0.0, |s| s.effective_progress()),
        remote_progress: remote_state.map_or(0.0, |s| s.effective_progress()),
    }
}

fn compare_summary(
    a: &RepresentationSummary,
    b: &RepresentationSummary,
    column: SummaryColumn,
) -> Ordering {
    match column {
        SummaryColumn::Asset => a.asset.to_lowercase().cmp(&b.asset.to_lowercase()),
        SummaryColumn::Subset => a.subset.to_lowercase().cmp(&b.subset.to_lowercase()),
        SummaryColumn::Version => a.version.cmp(&b.version),
        SummaryColumn::Representation => a
            .representation
            .to_lowercase()
            .cmp(&b.representation.to_lowercase()),
        SummaryColumn::LocalUpdated => a.local_updated.cmp(&b.local_updated),
        SummaryColumn::RemoteUpdated => a.remote_updated.cmp(&b.remote_updated),
        SummaryColumn::FilesCount => a.files_count.cmp(&b.files_count),
        SummaryColumn::FilesSize => a.files_size.cmp(&b.files_size),
        SummaryColumn::Priority => a.priority.cmp(&b.priority),
        SummaryColumn::Status => a.status.code().cmp(&b.status.code()),
    }
}

fn compare_detail(a: &FileDetail, b: &FileDetail, column: DetailColumn) -> Ordering {
    match column {
        DetailColumn::Path => a.path.to_lowercase().cmp(&b.path.to_lowercase()),
        DetailColumn::LocalUpdated => a.local_updated.cmp(&b.local_updated),
        DetailColumn::RemoteUpdated => a.remote_updated.cmp(&b.remote_updated),
        DetailColumn::Size => a.size.cmp(&b.size),
        DetailColumn::Priority => a.priority.cmp(&b.priority),
        DetailColumn::Status => a.status.code().cmp(&b.status.code()),
    }
}
