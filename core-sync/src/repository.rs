//! # Representation Repository
//!
//! Persistence seam for representation documents.
//!
//! ## Overview
//!
//! The store talks to a [`RepresentationRepository`]; two implementations
//! are provided:
//!
//! - [`InMemoryRepresentationRepository`] - process-local collection, used by
//!   hosts without a database and by tests
//! - [`SqliteRepresentationRepository`] - SQLite tables
//!   `sync_representations`, `sync_files` and `sync_site_states`
//!
//! Every mutation of site records is a single atomic update of the affected
//! (file, site) cells. Two writers to the same cell resolve last-write-wins;
//! cells of other files or sites are never touched.

use crate::model::{
    FileId, RepresentationContext, RepresentationDocument, RepresentationFile, RepresentationId,
    SiteFileState, SiteStateUpdate,
};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for representation documents, scoped by project
#[async_trait]
pub trait RepresentationRepository: Send + Sync {
    /// Insert a document, replacing any document with the same id
    ///
    /// Representation ids are unique across projects.
    ///
    /// # Errors
    ///
    /// Returns an error if another project already holds the id, or if the
    /// database operation fails
    async fn insert(&self, project: &str, document: &RepresentationDocument) -> Result<()>;

    /// Find a document by representation id
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_id(
        &self,
        project: &str,
        id: &RepresentationId,
    ) -> Result<Option<RepresentationDocument>>;

    /// Find the document containing a file
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn find_by_file(
        &self,
        project: &str,
        file_id: &FileId,
    ) -> Result<Option<RepresentationDocument>>;

    /// All documents of a project, ordered by id
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn list(&self, project: &str) -> Result<Vec<RepresentationDocument>>;

    /// Create an empty record for `site` on every file lacking one. With
    /// `reset_existing`, existing records are replaced by empty ones.
    ///
    /// Returns the number of records created or reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn add_site_records(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        reset_existing: bool,
    ) -> Result<usize>;

    /// Delete the records of `site` on every file.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn remove_site_records(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
    ) -> Result<usize>;

    /// Apply `update` to the records of `site`, on one file or on all files.
    ///
    /// Returns the number of records updated; files without a record for
    /// `site` are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn update_site_state(
        &self,
        project: &str,
        id: &RepresentationId,
        file_id: Option<&FileId>,
        site: &str,
        update: &SiteStateUpdate,
    ) -> Result<usize>;
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// Process-local repository
#[derive(Debug, Default)]
pub struct InMemoryRepresentationRepository {
    projects: RwLock<HashMap<String, BTreeMap<RepresentationId, RepresentationDocument>>>,
}

impl InMemoryRepresentationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepresentationRepository for InMemoryRepresentationRepository {
    async fn insert(&self, project: &str, document: &RepresentationDocument) -> Result<()> {
        let mut projects = self.projects.write().await;
        if let Some((owner, _)) = projects.iter().find(|(name, documents)| {
            name.as_str() != project && documents.contains_key(&document.id)
        }) {
            return Err(SyncError::RepresentationInOtherProject {
                project: owner.clone(),
                representation_id: document.id.as_str(),
            });
        }

        projects
            .entry(project.to_string())
            .or_default()
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        project: &str,
        id: &RepresentationId,
    ) -> Result<Option<RepresentationDocument>> {
        Ok(self
            .projects
            .read()
            .await
            .get(project)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn find_by_file(
        &self,
        project: &str,
        file_id: &FileId,
    ) -> Result<Option<RepresentationDocument>> {
        Ok(self.projects.read().await.get(project).and_then(|documents| {
            documents
                .values()
                .find(|doc| doc.file(file_id).is_some())
                .cloned()
        }))
    }

    async fn list(&self, project: &str) -> Result<Vec<RepresentationDocument>> {
        Ok(self
            .projects
            .read()
            .await
            .get(project)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_site_records(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        reset_existing: bool,
    ) -> Result<usize> {
        let mut projects = self.projects.write().await;
        let Some(document) = projects.get_mut(project).and_then(|docs| docs.get_mut(id)) else {
            return Ok(0);
        };

        let mut touched = 0;
        for file in &mut document.files {
            match file.site_mut(site) {
                Some(state) if reset_existing => {
                    SiteStateUpdate::Clear.apply(state);
                    touched += 1;
                }
                Some(_) => {}
                None => {
                    file.sites.push(SiteFileState::new(site));
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    async fn remove_site_records(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
    ) -> Result<usize> {
        let mut projects = self.projects.write().await;
        let Some(document) = projects.get_mut(project).and_then(|docs| docs.get_mut(id)) else {
            return Ok(0);
        };

        let mut removed = 0;
        for file in &mut document.files {
            let before = file.sites.len();
            file.sites.retain(|state| state.site_name != site);
            removed += before - file.sites.len();
        }
        Ok(removed)
    }

    async fn update_site_state(
        &self,
        project: &str,
        id: &RepresentationId,
        file_id: Option<&FileId>,
        site: &str,
        update: &SiteStateUpdate,
    ) -> Result<usize> {
        let mut projects = self.projects.write().await;
        let Some(document) = projects.get_mut(project).and_then(|docs| docs.get_mut(id)) else {
            return Ok(0);
        };

        let mut touched = 0;
        for file in document
            .files
            .iter_mut()
            .filter(|file| file_id.map_or(true, |target| file.id == *target))
        {
            if let Some(state) = file.site_mut(site) {
                update.apply(state);
                touched += 1;
            }
        }
        Ok(touched)
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of RepresentationRepository
pub struct SqliteRepresentationRepository {
    pool: SqlitePool,
}

impl SqliteRepresentationRepository {
    /// Create a new SQLite representation repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist yet
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn initialize(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn load(
        &self,
        project: &str,
        id: Option<&RepresentationId>,
    ) -> Result<Vec<RepresentationDocument>> {
        let id_filter = if id.is_some() { " AND r.id = ?" } else { "" };
        let id = id.map(RepresentationId::as_str);

        // one read transaction so the three selects see the same state
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let sql = format!(
            r#"
            SELECT r.id, r.asset, r.subset, r.version, r.representation
            FROM sync_representations r
            WHERE r.project = ?{}
            ORDER BY r.id
            "#,
            id_filter
        );
        let mut query = sqlx::query_as::<_, RepresentationRow>(&sql).bind(project);
        if let Some(id) = &id {
            query = query.bind(id.clone());
        }
        let representations = query
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let sql = format!(
            r#"
            SELECT f.id, f.representation_id, f.path, f.size, f.hash
            FROM sync_files f
            JOIN sync_representations r ON r.id = f.representation_id
            WHERE r.project = ?{}
            ORDER BY f.representation_id, f.position
            "#,
            id_filter
        );
        let mut query = sqlx::query_as::<_, FileRow>(&sql).bind(project);
        if let Some(id) = &id {
            query = query.bind(id.clone());
        }
        let files = query
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let sql = format!(
            r#"
            SELECT s.file_id, s.site_name, s.progress, s.created_at, s.last_failed_at,
                   s.error, s.tries, s.paused, s.priority, s.provider_file_id
            FROM sync_site_states s
            JOIN sync_files f ON f.id = s.file_id
            JOIN sync_representations r ON r.id = f.representation_id
            WHERE r.project = ?{}
            ORDER BY s.rowid
            "#,
            id_filter
        );
        let mut query = sqlx::query_as::<_, SiteStateRow>(&sql).bind(project);
        if let Some(id) = &id {
            query = query.bind(id.clone());
        }
        let states = query
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let mut states_by_file: HashMap<String, Vec<SiteFileState>> = HashMap::new();
        for row in states {
            let file_id = row.file_id.clone();
            states_by_file
                .entry(file_id)
                .or_default()
                .push(SiteFileState::try_from(row)?);
        }

        let mut files_by_representation: HashMap<String, Vec<RepresentationFile>> =
            HashMap::new();
        for row in files {
            let sites = states_by_file.remove(&row.id).unwrap_or_default();
            let representation_id = row.representation_id.clone();
            let mut file = RepresentationFile::try_from(row)?;
            file.sites = sites;
            files_by_representation
                .entry(representation_id)
                .or_default()
                .push(file);
        }

        representations
            .into_iter()
            .map(|row| {
                let files = files_by_representation.remove(&row.id).unwrap_or_default();
                let mut document = RepresentationDocument::try_from(row)?;
                document.files = files;
                Ok(document)
            })
            .collect()
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sync_representations (
        id TEXT PRIMARY KEY NOT NULL,
        project TEXT NOT NULL,
        asset TEXT NOT NULL,
        subset TEXT NOT NULL,
        version INTEGER,
        representation TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_sync_representations_project
        ON sync_representations (project)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_files (
        id TEXT PRIMARY KEY NOT NULL,
        representation_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        path TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        hash TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_sync_files_representation
        ON sync_files (representation_id, position)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_site_states (
        file_id TEXT NOT NULL,
        site_name TEXT NOT NULL,
        progress REAL,
        created_at INTEGER,
        last_failed_at INTEGER,
        error TEXT,
        tries INTEGER NOT NULL DEFAULT 0,
        paused INTEGER NOT NULL DEFAULT 0,
        priority INTEGER,
        provider_file_id TEXT,
        PRIMARY KEY (file_id, site_name)
    )
    "#,
];

/// Files of one representation of one project, for use as `file_id IN (...)`
const SCOPED_FILES: &str = r#"
    SELECT f.id FROM sync_files f
    JOIN sync_representations r ON r.id = f.representation_id
    WHERE r.id = ? AND r.project = ?
"#;

/// Database row representation of a representation
#[derive(Debug, FromRow)]
struct RepresentationRow {
    id: String,
    asset: String,
    subset: String,
    version: Option<i64>,
    representation: String,
}

#[derive(Debug, FromRow)]
struct FileRow {
    id: String,
    representation_id: String,
    path: String,
    size: i64,
    hash: Option<String>,
}

#[derive(Debug, FromRow)]
struct SiteStateRow {
    file_id: String,
    site_name: String,
    progress: Option<f64>,
    created_at: Option<i64>,
    last_failed_at: Option<i64>,
    error: Option<String>,
    tries: i64,
    paused: bool,
    priority: Option<i64>,
    provider_file_id: Option<String>,
}

fn timestamp(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    millis
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| SyncError::Database(format!("Invalid timestamp: {}", ms)))
        })
        .transpose()
}

impl TryFrom<RepresentationRow> for RepresentationDocument {
    type Error = SyncError;

    fn try_from(row: RepresentationRow) -> Result<Self> {
        let version = row
            .version
            .map(|v| {
                u32::try_from(v).map_err(|_| SyncError::Database(format!("Invalid version: {}", v)))
            })
            .transpose()?;

        Ok(RepresentationDocument::new(RepresentationContext::new(
            row.asset,
            row.subset,
            version,
            row.representation,
        ))
        .with_id(RepresentationId::from_string(&row.id)?))
    }
}

impl TryFrom<FileRow> for RepresentationFile {
    type Error = SyncError;

    fn try_from(row: FileRow) -> Result<Self> {
        Ok(RepresentationFile {
            id: FileId::from_string(&row.id)?,
            path: row.path,
            size: u64::try_from(row.size).unwrap_or(0),
            hash: row.hash,
            sites: Vec::new(),
        })
    }
}

impl TryFrom<SiteStateRow> for SiteFileState {
    type Error = SyncError;

    fn try_from(row: SiteStateRow) -> Result<Self> {
        Ok(SiteFileState {
            site_name: row.site_name,
            progress: row.progress,
            created_at: timestamp(row.created_at)?,
            last_failed_at: timestamp(row.last_failed_at)?,
            error: row.error,
            tries: u32::try_from(row.tries).unwrap_or(0),
            paused: row.paused,
            priority: row.priority.and_then(|p| u32::try_from(p).ok()),
            provider_file_id: row.provider_file_id,
        })
    }
}

/// SET clause of the single UPDATE implementing `update`
fn set_clause(update: &SiteStateUpdate) -> &'static str {
    match update {
        SiteStateUpdate::Progress(_) => {
            "progress = ?, \
             last_failed_at = CASE WHEN ? >= 1.0 THEN NULL ELSE last_failed_at END, \
             error = CASE WHEN ? >= 1.0 THEN NULL ELSE error END"
        }
        SiteStateUpdate::Success { .. } => {
            "progress = 1.0, created_at = ?, provider_file_id = ?, last_failed_at = NULL, error = NULL"
        }
        SiteStateUpdate::Failure { .. } => {
            "tries = tries + 1, last_failed_at = ?, error = ?, created_at = NULL, \
             progress = CASE WHEN progress >= 1.0 THEN NULL ELSE progress END"
        }
        SiteStateUpdate::Reset => {
            "progress = NULL, created_at = NULL, last_failed_at = NULL, error = NULL, \
             tries = 0, provider_file_id = NULL"
        }
        SiteStateUpdate::Clear => {
            "progress = NULL, created_at = NULL, last_failed_at = NULL, error = NULL, \
             tries = 0, provider_file_id = NULL, paused = 0, priority = NULL"
        }
        SiteStateUpdate::Paused(_) => "paused = ?",
        SiteStateUpdate::Priority(_) => "priority = ?",
    }
}

#[async_trait]
impl RepresentationRepository for SqliteRepresentationRepository {
    async fn insert(&self, project: &str, document: &RepresentationDocument) -> Result<()> {
        let id = document.id.as_str();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let owner: Option<String> =
            sqlx::query_scalar("SELECT project FROM sync_representations WHERE id = ?")
                .bind(&id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
        if let Some(owner) = owner.filter(|owner| owner != project) {
            return Err(SyncError::RepresentationInOtherProject {
                project: owner,
                representation_id: id,
            });
        }

        for statement in [
            "DELETE FROM sync_site_states WHERE file_id IN \
             (SELECT f.id FROM sync_files f \
              JOIN sync_representations r ON r.id = f.representation_id \
              WHERE f.representation_id = ? AND r.project = ?)",
            "DELETE FROM sync_files WHERE representation_id IN \
             (SELECT id FROM sync_representations WHERE id = ? AND project = ?)",
            "DELETE FROM sync_representations WHERE id = ? AND project = ?",
        ] {
            sqlx::query(statement)
                .bind(&id)
                .bind(project)
                .execute(&mut *tx)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
        }

        sqlx::query(
            r#"
            INSERT INTO sync_representations (id, project, asset, subset, version, representation)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(project)
        .bind(&document.context.asset)
        .bind(&document.context.subset)
        .bind(document.context.version.map(i64::from))
        .bind(&document.context.representation)
        .execute(&mut *tx)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        for (position, file) in document.files.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sync_files (id, representation_id, position, path, size, hash)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(file.id.as_str())
            .bind(&id)
            .bind(position as i64)
            .bind(&file.path)
            .bind(i64::try_from(file.size).unwrap_or(i64::MAX))
            .bind(&file.hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

            for state in &file.sites {
                sqlx::query(
                    r#"
                    INSERT INTO sync_site_states (
                        file_id, site_name, progress, created_at, last_failed_at,
                        error, tries, paused, priority, provider_file_id
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(file.id.as_str())
                .bind(&state.site_name)
                .bind(state.progress)
                .bind(state.created_at.map(|t| t.timestamp_millis()))
                .bind(state.last_failed_at.map(|t| t.timestamp_millis()))
                .bind(&state.error)
                .bind(i64::from(state.tries))
                .bind(state.paused)
                .bind(state.priority.map(i64::from))
                .bind(&state.provider_file_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        project: &str,
        id: &RepresentationId,
    ) -> Result<Option<RepresentationDocument>> {
        Ok(self.load(project, Some(id)).await?.into_iter().next())
    }

    async fn find_by_file(
        &self,
        project: &str,
        file_id: &FileId,
    ) -> Result<Option<RepresentationDocument>> {
        let representation_id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT f.representation_id
            FROM sync_files f
            JOIN sync_representations r ON r.id = f.representation_id
            WHERE f.id = ? AND r.project = ?
            "#,
        )
        .bind(file_id.as_str())
        .bind(project)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        match representation_id {
            Some(id) => {
                self.find_by_id(project, &RepresentationId::from_string(&id)?)
                    .await
            }
            None => Ok(None),
        }
    }

    async fn list(&self, project: &str) -> Result<Vec<RepresentationDocument>> {
        self.load(project, None).await
    }

    async fn add_site_records(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
        reset_existing: bool,
    ) -> Result<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        let mut touched = 0;
        if reset_existing {
            let sql = format!(
                "UPDATE sync_site_states SET {} WHERE site_name = ? AND file_id IN ({})",
                set_clause(&SiteStateUpdate::Clear),
                SCOPED_FILES
            );
            let result = sqlx::query(&sql)
                .bind(site)
                .bind(id.as_str())
                .bind(project)
                .execute(&mut *tx)
                .await
                .map_err(|e| SyncError::Database(e.to_string()))?;
            touched += result.rows_affected() as usize;
        }

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO sync_site_states (file_id, site_name, tries, paused)
            SELECT f.id, ?, 0, 0
            FROM sync_files f
            JOIN sync_representations r ON r.id = f.representation_id
            WHERE r.id = ? AND r.project = ?
            ORDER BY f.position
            "#,
        )
        .bind(site)
        .bind(id.as_str())
        .bind(project)
        .execute(&mut *tx)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;
        touched += result.rows_affected() as usize;

        tx.commit()
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(touched)
    }

    async fn remove_site_records(
        &self,
        project: &str,
        id: &RepresentationId,
        site: &str,
    ) -> Result<usize> {
        let sql = format!(
            "DELETE FROM sync_site_states WHERE site_name = ? AND file_id IN ({})",
            SCOPED_FILES
        );
        let result = sqlx::query(&sql)
            .bind(site)
            .bind(id.as_str())
            .bind(project)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }

    async fn update_site_state(
        &self,
        project: &str,
        id: &RepresentationId,
        file_id: Option<&FileId>,
        site: &str,
        update: &SiteStateUpdate,
    ) -> Result<usize> {
        let sql = format!(
            "UPDATE sync_site_states SET {} WHERE site_name = ? AND file_id IN ({}){}",
            set_clause(update),
            SCOPED_FILES,
            if file_id.is_some() { " AND file_id = ?" } else { "" }
        );

        let mut query = sqlx::query(&sql);
        query = match update {
            SiteStateUpdate::Progress(progress) => {
                query.bind(*progress).bind(*progress).bind(*progress)
            }
            SiteStateUpdate::Success {
                at,
                provider_file_id,
            } => query
                .bind(at.timestamp_millis())
                .bind(provider_file_id.clone()),
            SiteStateUpdate::Failure { at, error } => {
                query.bind(at.timestamp_millis()).bind(error.clone())
            }
            SiteStateUpdate::Reset | SiteStateUpdate::Clear => query,
            SiteStateUpdate::Paused(paused) => query.bind(*paused),
            SiteStateUpdate::Priority(priority) => query.bind(i64::from(*priority)),
        };
        query = query.bind(site).bind(id.as_str()).bind(project);
        if let Some(file_id) = file_id {
            query = query.bind(file_id.as_str());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }
}

// ============================================================================
// Tests
// ============================================================================
