//! # Multi-Site Sync Module
//!
//! Keeps published representations consistent between a studio's sites.
//!
//! ## Overview
//!
//! A representation (one published file set of an asset version) may be
//! assigned to several sites: the studio storage, artist workstations, and
//! cloud providers. This crate tracks a transfer record per (file, site),
//! reconciles those records into a status for the project's active/remote
//! pair, and exposes operator controls and paginated views over them.
//! Moving bytes is left to provider-specific transfer workers, which read
//! the planner and report results back to the store.
//!
//! ## Components
//!
//! - **Model** (`model`): Representation documents and per-site file records
//! - **Site Registry** (`sites`): Sites, providers, active/remote pair, root path resolution
//! - **Repository** (`repository`): Persistence seam with in-memory and SQLite implementations
//! - **State Store** (`store`): Validated per-cell mutations and local copy deletion
//! - **Status** (`status`): Derived file and representation status
//! - **Pause Registry** (`pause`): Server, project, representation and site pause scopes
//! - **Controller** (`controller`): Operator mutations with events
//! - **Planner** (`planner`): Uploads and downloads for the next loop
//! - **Query** (`query`): Sorted, filtered, paginated summaries and file details

pub mod controller;
pub mod error;
pub mod model;
pub mod pagination;
pub mod pause;
pub mod planner;
pub mod query;
pub mod repository;
pub mod sites;
pub mod status;
pub mod store;

pub use controller::{ClearReport, SyncController};
pub use error::{Result, SyncError};
pub use model::{
    FileId, RepresentationContext, RepresentationDocument, RepresentationFile, RepresentationId,
    SiteFileState, SiteStateUpdate, SyncSide, DEFAULT_PRIORITY, MAX_PRIORITY, MIN_PRIORITY,
};
pub use pagination::{Page, PageRequest};
pub use pause::{PauseRegistry, PauseScope, PauseSnapshot};
pub use planner::{TransferDirection, TransferPlanner, TransferTask};
pub use query::{
    DetailColumn, DetailQuery, FileDetail, RepresentationSummary, SortOrder, SummaryColumn,
    SummaryQuery, SyncQueryService,
};
pub use repository::{
    InMemoryRepresentationRepository, RepresentationRepository, SqliteRepresentationRepository,
};
pub use sites::SiteRegistry;
pub use status::{aggregate_status, file_status, reconcile, Reconciliation, SyncStatus};
pub use store::{DeletionFailure, FileSyncStateStore, RemovalReport};
