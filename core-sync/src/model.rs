//! # Representation Documents
//!
//! The persisted shape of synchronization state.
//!
//! ## Overview
//!
//! One [`RepresentationDocument`] per published representation holds its
//! context (asset, subset, version, name) and an ordered list of files. Each
//! [`RepresentationFile`] carries one [`SiteFileState`] per site the
//! representation is assigned to:
//!
//! ```text
//! RepresentationDocument
//! ├── context: chars/hero · modelMain · v003 · ma
//! └── files
//!     ├── hero_model_v003.ma
//!     │   ├── studio  { created_at: .., progress: 1.0 }
//!     │   └── gdrive  { progress: 0.4, tries: 1 }
//!     └── hero_model_v003.abc
//!         ├── studio  { created_at: .. }
//!         └── gdrive  { }
//! ```
//!
//! A missing `SiteFileState` for an assigned site means "not started".
//! Status is never stored here; see [`crate::status`].

use crate::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Priority used when a site record carries none.
pub const DEFAULT_PRIORITY: u32 = 50;
pub const MIN_PRIORITY: u32 = 1;
pub const MAX_PRIORITY: u32 = 1000;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepresentationId(Uuid);

impl RepresentationId {
    /// Create a new random representation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a representation ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s.trim()).map_err(|e| SyncError::InvalidId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RepresentationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RepresentationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RepresentationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Unique identifier for a file inside a representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s.trim()).map_err(|e| SyncError::InvalidId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for FileId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Sync Side
// ============================================================================

/// One side of the active/remote pair of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncSide {
    Local,
    Remote,
}

impl SyncSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncSide::Local => "local",
            SyncSide::Remote => "remote",
        }
    }
}

impl FromStr for SyncSide {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(SyncSide::Local),
            "remote" => Ok(SyncSide::Remote),
            other => Err(SyncError::Config(format!(
                "Unknown side '{}': expected 'local' or 'remote'",
                other
            ))),
        }
    }
}

// ============================================================================
// Documents
// ============================================================================

/// What a representation is a publish of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepresentationContext {
    pub asset: String,
    pub subset: String,
    /// `None` for the hero (master) version
    pub version: Option<u32>,
    /// Representation name, usually the extension (`ma`, `abc`, `exr`)
    pub representation: String,
}

impl RepresentationContext {
    pub fn new(
        asset: impl Into<String>,
        subset: impl Into<String>,
        version: Option<u32>,
        representation: impl Into<String>,
    ) -> Self {
        Self {
            asset: asset.into(),
            subset: subset.into(),
            version,
            representation: representation.into(),
        }
    }

    /// `v003` style label, `master` for hero versions
    pub fn version_label(&self) -> String {
        match self.version {
            Some(version) => format!("v{:03}", version),
            None => "master".to_string(),
        }
    }
}

/// Transfer record of one file on one site.
///
/// At most one of `created_at` and `last_failed_at` is set: they mark the
/// outcome of the current attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteFileState {
    pub site_name: String,
    /// Byte-level progress in `0.0..=1.0`, absent when not reported
    pub progress: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Failed attempts since the last operator reset
    pub tries: u32,
    pub paused: bool,
    pub priority: Option<u32>,
    /// Identifier of the copy at the provider (e.g. a Drive file id)
    pub provider_file_id: Option<String>,
}

impl SiteFileState {
    /// Empty record: assigned, not started
    pub fn new(site_name: impl Into<String>) -> Self {
        Self {
            site_name: site_name.into(),
            progress: None,
            created_at: None,
            last_failed_at: None,
            error: None,
            tries: 0,
            paused: false,
            priority: None,
            provider_file_id: None,
        }
    }

    /// Explicit progress, else 1 when the file exists on the site, else 0.
    pub fn effective_progress(&self) -> f64 {
        match self.progress {
            Some(progress) => progress,
            None if self.created_at.is_some() => 1.0,
            None => 0.0,
        }
    }

    /// Timestamp of the last outcome, success or failure
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.last_failed_at)
    }

    pub fn effective_priority(&self) -> u32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

/// One file of a representation with its per-site records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentationFile {
    pub id: FileId,
    /// Path template, may contain `{root}` or `{root[name]}`
    pub path: String,
    pub size: u64,
    pub hash: Option<String>,
    pub sites: Vec<SiteFileState>,
}

impl RepresentationFile {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            id: FileId::new(),
            path: path.into(),
            size,
            hash: None,
            sites: Vec::new(),
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Attach a site record, replacing any record for the same site
    pub fn with_site(mut self, state: SiteFileState) -> Self {
        self.sites.retain(|s| s.site_name != state.site_name);
        self.sites.push(state);
        self
    }

    pub fn site(&self, site_name: &str) -> Option<&SiteFileState> {
        self.sites.iter().find(|s| s.site_name == site_name)
    }

    pub fn site_mut(&mut self, site_name: &str) -> Option<&mut SiteFileState> {
        self.sites.iter_mut().find(|s| s.site_name == site_name)
    }
}

/// A published representation and its synchronization state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentationDocument {
    pub id: RepresentationId,
    pub context: RepresentationContext,
    pub files: Vec<RepresentationFile>,
}

impl RepresentationDocument {
    pub fn new(context: RepresentationContext) -> Self {
        Self {
            id: RepresentationId::new(),
            context,
            files: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: RepresentationId) -> Self {
        self.id = id;
        self
    }

    pub fn with_file(mut self, file: RepresentationFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn file(&self, file_id: &FileId) -> Option<&RepresentationFile> {
        self.files.iter().find(|f| f.id == *file_id)
    }

    /// Whether any file carries a record for `site_name`
    pub fn has_site(&self, site_name: &str) -> bool {
        self.files.iter().any(|f| f.site(site_name).is_some())
    }

    pub fn files_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Latest outcome timestamp of `site_name` across files
    pub fn updated_at(&self, site_name: &str) -> Option<DateTime<Utc>> {
        self.files
            .iter()
            .filter_map(|f| f.site(site_name).and_then(SiteFileState::updated_at))
            .max()
    }

    /// Highest priority of the site's records, default when none is set
    pub fn priority(&self, site_name: &str) -> u32 {
        self.files
            .iter()
            .filter_map(|f| f.site(site_name).and_then(|s| s.priority))
            .max()
            .unwrap_or(DEFAULT_PRIORITY)
    }
}

/// Atomic change to one (file, site) record
#[derive(Debug, Clone, PartialEq)]
pub enum SiteStateUpdate {
    Progress(f64),
    Success {
        at: DateTime<Utc>,
        provider_file_id: Option<String>,
    },
    Failure {
        at: DateTime<Utc>,
        error: String,
    },
    /// Clear the transfer outcome, keeping pause and priority
    Reset,
    /// Replace with an empty record
    Clear,
    Paused(bool),
    Priority(u32),
}

impl SiteStateUpdate {
    pub fn apply(&self, state: &mut SiteFileState) {
        match self {
            SiteStateUpdate::Progress(progress) => {
                state.progress = Some(*progress);
                // a complete attempt is never failed
                if *progress >= 1.0 {
                    state.last_failed_at = None;
                    state.error = None;
                }
            }
            SiteStateUpdate::Success {
                at,
                provider_file_id,
            } => {
                state.progress = Some(1.0);
                state.created_at = Some(*at);
                state.provider_file_id = provider_file_id.clone();
                state.last_failed_at = None;
                state.error = None;
            }
            SiteStateUpdate::Failure { at, error } => {
                state.tries = state.tries.saturating_add(1);
                state.last_failed_at = Some(*at);
                state.error = Some(error.clone());
                state.created_at = None;
                // a failed attempt is never complete
                if state.progress.is_some_and(|p| p >= 1.0) {
                    state.progress = None;
                }
            }
            SiteStateUpdate::Reset => {
                state.progress = None;
                state.created_at = None;
                state.last_failed_at = None;
                state.error = None;
                state.tries = 0;
                state.provider_file_id = None;
            }
            SiteStateUpdate::Clear => {
                *state = SiteFileState::new(state.site_name.clone());
            }
            SiteStateUpdate::Paused(paused) => {
                state.paused = *paused;
            }
            SiteStateUpdate::Priority(priority) => {
                state.priority = Some(*priority);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_representation_id_roundtrip() {
        let id = RepresentationId::new();
        let parsed = RepresentationId::from_string(&id.as_str()).unwrap();
        assert_eq!(id, parsed);

        assert!(matches!(
            RepresentationId::from_string("hero_model"),
            Err(SyncError::InvalidId(_))
        ));
    }

    #[test]
    fn test_version_label() {
        let context = RepresentationContext::new("hero", "modelMain", Some(3), "ma");
        assert_eq!(context.version_label(), "v003");

        let hero = RepresentationContext::new("hero", "modelMain", None, "ma");
        assert_eq!(hero.version_label(), "master");
    }

    #[test]
    fn test_effective_progress() {
        let mut state = SiteFileState::new("studio");
        assert_eq!(state.effective_progress(), 0.0);

        state.created_at = Some(Utc::now());
        assert_eq!(state.effective_progress(), 1.0);

        state.progress = Some(0.25);
        assert_eq!(state.effective_progress(), 0.25);
    }

    #[test]
    fn test_failure_keeps_outcomes_exclusive() {
        let mut state = SiteFileState::new("gdrive");
        SiteStateUpdate::Success {
            at: Utc::now(),
            provider_file_id: Some("drive-1".to_string()),
        }
        .apply(&mut state);
        assert_eq!(state.progress, Some(1.0));

        SiteStateUpdate::Failure {
            at: Utc::now(),
            error: "checksum mismatch".to_string(),
        }
        .apply(&mut state);

        assert_eq!(state.tries, 1);
        assert!(state.created_at.is_none());
        assert!(state.last_failed_at.is_some());
        assert_eq!(state.progress, None);
        assert_eq!(state.error.as_deref(), Some("checksum mismatch"));
    }

    #[test]
    fn test_failure_leaves_partial_progress() {
        let mut state = SiteFileState::new("gdrive");
        SiteStateUpdate::Progress(0.4).apply(&mut state);
        SiteStateUpdate::Failure {
            at: Utc::now(),
            error: "timeout".to_string(),
        }
        .apply(&mut state);

        assert_eq!(state.progress, Some(0.4));
    }

    #[test]
    fn test_reset_keeps_pause_and_priority() {
        let mut state = SiteFileState::new("gdrive");
        state.tries = 3;
        state.error = Some("x".to_string());
        state.last_failed_at = Some(Utc::now());
        state.paused = true;
        state.priority = Some(200);

        SiteStateUpdate::Reset.apply(&mut state);

        assert_eq!(state.tries, 0);
        assert_eq!(state.error, None);
        assert_eq!(state.last_failed_at, None);
        assert_eq!(state.effective_progress(), 0.0);
        assert!(state.paused);
        assert_eq!(state.priority, Some(200));

        SiteStateUpdate::Clear.apply(&mut state);
        assert_eq!(state, SiteFileState::new("gdrive"));
    }

    #[test]
    fn test_document_rollups() {
        let now = Utc::now();
        let mut synced = SiteFileState::new("studio");
        synced.created_at = Some(now);
        synced.priority = Some(80);

        let doc = RepresentationDocument::new(RepresentationContext::new(
            "hero", "modelMain", Some(1), "ma",
        ))
        .with_file(RepresentationFile::new("{root[work]}/hero.ma", 100).with_site(synced))
        .with_file(
            RepresentationFile::new("{root[work]}/hero.abc", 50)
                .with_site(SiteFileState::new("studio")),
        );

        assert_eq!(doc.files_size(), 150);
        assert!(doc.has_site("studio"));
        assert!(!doc.has_site("gdrive"));
        assert_eq!(doc.updated_at("studio"), Some(now));
        assert_eq!(doc.priority("studio"), 80);
        assert_eq!(doc.priority("gdrive"), DEFAULT_PRIORITY);
    }

    #[test]
    fn test_sync_side_parse() {
        assert_eq!("local".parse::<SyncSide>().unwrap(), SyncSide::Local);
        assert_eq!("remote".parse::<SyncSide>().unwrap(), SyncSide::Remote);
        assert!("studio".parse::<SyncSide>().is_err());
    }
}
