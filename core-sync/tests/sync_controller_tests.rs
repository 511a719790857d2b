//! Integration tests for operator controls and transfer planning
//!
//! These tests drive the controller, store and planner together over the
//! in-memory repository:
//! - Pause and unpause idempotence across every scope
//! - Site assignment and reset semantics
//! - Clearing a site from a project, with real and failing deletions
//! - Planner ordering, limits and pause filtering

use bridge_desktop::TokioFileSystem;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    storage::FileSystemAccess,
};
use chrono::Utc;
use core_runtime::config::{
    LocalSettings, ProjectSyncConfig, ProviderKind, SiteConfig, SyncSettings,
};
use core_runtime::events::{CoreEvent, SyncEvent};
use core_sync::{
    DetailQuery, FileId, FileSyncStateStore, InMemoryRepresentationRepository, PauseRegistry,
    RepresentationContext, RepresentationDocument, RepresentationFile, RepresentationId,
    SiteFileState, SiteRegistry, SummaryQuery, SyncController, SyncError, SyncQueryService,
    SyncSide, SyncStatus, TransferDirection, TransferPlanner,
};
use mockall::mock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;

const LOCAL_SITE: &str = "ws-test";

// ============================================================================
// Harness
// ============================================================================

mock! {
    FileSystem {}

    #[async_trait::async_trait]
    impl FileSystemAccess for FileSystem {
        async fn exists(&self, path: &Path) -> BridgeResult<bool>;
        async fn delete_file(&self, path: &Path) -> BridgeResult<()>;
        async fn remove_empty_dir(&self, path: &Path) -> BridgeResult<()>;
    }
}

struct Harness {
    store: Arc<FileSyncStateStore>,
    controller: SyncController,
    planner: TransferPlanner,
    queries: SyncQueryService,
    events: Receiver<CoreEvent>,
}

fn registry(local_root: &Path) -> Arc<SiteRegistry> {
    let project = ProjectSyncConfig::builder()
        .active_site("studio")
        .remote_site("gdrive")
        .representation_limit(2)
        .site("gdrive", SiteConfig::new(ProviderKind::GoogleDrive).with_root("work", "/VFX"))
        .site(
            LOCAL_SITE,
            SiteConfig::local_drive().with_root("work", local_root.to_string_lossy()),
        )
        .build()
        .unwrap();
    let settings = SyncSettings::default().with_project("demo", project);
    Arc::new(SiteRegistry::new(settings, LocalSettings::new(LOCAL_SITE)).unwrap())
}

fn harness_with(file_system: Arc<dyn FileSystemAccess>, local_root: &Path) -> Harness {
    let store = Arc::new(FileSyncStateStore::new(
        Arc::new(InMemoryRepresentationRepository::new()),
        registry(local_root),
        file_system,
    ));
    let pauses = Arc::new(PauseRegistry::new());
    let events = store.event_bus().subscribe();

    Harness {
        controller: SyncController::new(store.clone(), pauses.clone()),
        planner: TransferPlanner::new(store.clone(), pauses.clone()),
        queries: SyncQueryService::new(store.clone(), pauses),
        store,
        events,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(MockFileSystem::new()), Path::new("/cache"))
}

/// Two files, both already on the studio site
fn published(asset: &str) -> RepresentationDocument {
    let mut synced = SiteFileState::new("studio");
    synced.created_at = Some(Utc::now());

    RepresentationDocument::new(RepresentationContext::new(asset, "modelMain", Some(1), "ma"))
        .with_file(
            RepresentationFile::new(format!("{{root[work]}}/{}/v001/{}.ma", asset, asset), 100)
                .with_site(synced.clone()),
        )
        .with_file(
            RepresentationFile::new(format!("{{root[work]}}/{}/v001/{}.abc", asset, asset), 50)
                .with_site(synced),
        )
}

async fn publish(harness: &Harness, asset: &str) -> RepresentationDocument {
    let doc = published(asset);
    harness.store.insert_representation("demo", &doc).await.unwrap();
    doc
}

/// Representation and file status as the listings report them
async fn reconciled(
    harness: &Harness,
    id: &RepresentationId,
    file_id: &FileId,
) -> (SyncStatus, SyncStatus) {
    let files = harness
        .queries
        .list_files("demo", id, &DetailQuery::default().with_filter(file_id.as_str()))
        .await
        .unwrap();
    let summary = harness
        .queries
        .list_representations("demo", &SummaryQuery::default().with_filter(id.as_str()))
        .await
        .unwrap();
    (summary.items[0].status, files.items[0].status)
}

fn drain(events: &mut Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

// ============================================================================
// Pause
// ============================================================================

#[tokio::test]
async fn test_project_pause_is_idempotent() {
    let mut h = harness();

    assert!(h.controller.pause_project("demo").await.unwrap());
    assert!(!h.controller.pause_project("demo").await.unwrap());
    assert!(h.controller.is_project_paused("demo").await);

    assert!(h.controller.unpause_project("demo").await.unwrap());
    assert!(!h.controller.unpause_project("demo").await.unwrap());
    assert!(!h.controller.is_project_paused("demo").await);

    let events = drain(&mut h.events);
    assert_eq!(
        events,
        vec![
            CoreEvent::Sync(SyncEvent::ProjectPaused {
                project: "demo".to_string(),
                paused: true
            }),
            CoreEvent::Sync(SyncEvent::ProjectPaused {
                project: "demo".to_string(),
                paused: false
            }),
        ]
    );

    assert!(matches!(
        h.controller.pause_project("unknown").await,
        Err(SyncError::ProjectNotConfigured { .. })
    ));
}

#[tokio::test]
async fn test_server_pause_encloses_projects() {
    let mut h = harness();

    assert!(h.controller.pause_server().await);
    assert!(!h.controller.pause_server().await);
    assert!(h.controller.is_project_paused("demo").await);

    assert!(h.controller.unpause_server().await);
    assert!(!h.controller.is_server_paused().await);
    assert_eq!(drain(&mut h.events).len(), 2);
}

#[tokio::test]
async fn test_representation_and_site_pause_scopes() {
    let mut h = harness();
    let doc = publish(&h, "hero").await;
    h.controller
        .add_site("demo", &doc.id, Some("gdrive"), false)
        .await
        .unwrap();
    drain(&mut h.events);

    // representation scope
    assert!(h.controller.pause_representation("demo", &doc.id, None).await.unwrap());
    assert!(!h.controller.pause_representation("demo", &doc.id, None).await.unwrap());
    assert!(h
        .controller
        .is_representation_paused("demo", &doc.id, None)
        .await
        .unwrap());
    assert!(h.controller.unpause_representation("demo", &doc.id, None).await.unwrap());

    // site scope is persisted on the records
    assert!(h
        .controller
        .pause_representation("demo", &doc.id, Some("gdrive"))
        .await
        .unwrap());
    assert!(!h
        .controller
        .pause_representation("demo", &doc.id, Some("gdrive"))
        .await
        .unwrap());
    let stored = h.store.get_representation("demo", &doc.id).await.unwrap();
    assert!(stored.files.iter().all(|f| f.site("gdrive").unwrap().paused));
    assert!(stored.files.iter().all(|f| !f.site("studio").unwrap().paused));
    assert!(h
        .controller
        .is_representation_paused("demo", &doc.id, Some("gdrive"))
        .await
        .unwrap());
    assert!(!h
        .controller
        .is_representation_paused("demo", &doc.id, Some("studio"))
        .await
        .unwrap());

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 3);
    assert_eq!(
        events[2],
        CoreEvent::Sync(SyncEvent::RepresentationPaused {
            project: "demo".to_string(),
            representation_id: doc.id.to_string(),
            site: Some("gdrive".to_string()),
            paused: true,
        })
    );

    assert!(matches!(
        h.controller
            .pause_representation("demo", &doc.id, Some(LOCAL_SITE))
            .await,
        Err(SyncError::SiteNotAssigned { .. })
    ));
}

// ============================================================================
// Site Assignment and Reset
// ============================================================================

#[tokio::test]
async fn test_add_site_defaults_to_studio() {
    let mut h = harness();
    let doc = RepresentationDocument::new(RepresentationContext::new("lamp", "model", None, "abc"))
        .with_file(RepresentationFile::new("{root[work]}/lamp.abc", 5));
    h.store.insert_representation("demo", &doc).await.unwrap();

    assert_eq!(h.controller.add_site("demo", &doc.id, None, false).await.unwrap(), 1);
    assert!(matches!(
        h.controller.add_site("demo", &doc.id, None, false).await,
        Err(SyncError::AlreadyAssigned { .. })
    ));

    let events = drain(&mut h.events);
    assert_eq!(
        events,
        vec![CoreEvent::Sync(SyncEvent::SiteAdded {
            project: "demo".to_string(),
            representation_id: doc.id.to_string(),
            site: "studio".to_string(),
            forced: false,
        })]
    );
}

#[tokio::test]
async fn test_reset_clears_outcome_keeps_pause_and_priority() {
    let mut h = harness();
    let doc = publish(&h, "hero").await;
    h.controller
        .add_site("demo", &doc.id, Some("gdrive"), false)
        .await
        .unwrap();
    let file_id = doc.files[0].id;

    for _ in 0..3 {
        h.store
            .record_failure("demo", &file_id, "gdrive", "upload timed out")
            .await
            .unwrap();
    }
    h.controller
        .set_priority("demo", &doc.id, "gdrive", Some(&file_id), 250)
        .await
        .unwrap();
    h.controller
        .pause_representation("demo", &doc.id, Some("gdrive"))
        .await
        .unwrap();
    drain(&mut h.events);

    let reset = h
        .controller
        .reset_file_state("demo", &doc.id, SyncSide::Remote, Some(&file_id))
        .await
        .unwrap();
    assert_eq!(reset, 1);

    let stored = h.store.get_representation("demo", &doc.id).await.unwrap();
    let state = stored.files[0].site("gdrive").unwrap();
    assert_eq!(state.tries, 0);
    assert_eq!(state.error, None);
    assert_eq!(state.last_failed_at, None);
    assert_eq!(state.created_at, None);
    assert_eq!(state.effective_progress(), 0.0);
    assert!(state.paused);
    assert_eq!(state.priority, Some(250));

    assert_eq!(
        drain(&mut h.events),
        vec![CoreEvent::Sync(SyncEvent::FileStateReset {
            project: "demo".to_string(),
            representation_id: doc.id.to_string(),
            site: "gdrive".to_string(),
            file_id: Some(file_id.to_string()),
        })]
    );
}

#[tokio::test]
async fn test_reset_after_exhausted_retries_requeues() {
    let h = harness();
    let doc = publish(&h, "hero").await;
    h.controller
        .add_site("demo", &doc.id, Some("gdrive"), false)
        .await
        .unwrap();
    let file_id = doc.files[0].id;

    for _ in 0..3 {
        h.store
            .record_failure("demo", &file_id, "gdrive", "x")
            .await
            .unwrap();
    }
    assert_eq!(
        reconciled(&h, &doc.id, &file_id).await,
        (SyncStatus::Failed, SyncStatus::Failed)
    );

    h.controller
        .reset_file_state("demo", &doc.id, SyncSide::Remote, Some(&file_id))
        .await
        .unwrap();
    assert_eq!(
        reconciled(&h, &doc.id, &file_id).await,
        (SyncStatus::Queued, SyncStatus::Queued)
    );
}

#[tokio::test]
async fn test_reset_whole_side() {
    let h = harness();
    let doc = publish(&h, "hero").await;

    let reset = h
        .controller
        .reset_file_state("demo", &doc.id, SyncSide::Local, None)
        .await
        .unwrap();
    assert_eq!(reset, 2);

    let stored = h.store.get_representation("demo", &doc.id).await.unwrap();
    assert!(stored
        .files
        .iter()
        .all(|f| f.site("studio").unwrap().created_at.is_none()));

    // remote side was never assigned
    assert!(matches!(
        h.controller
            .reset_file_state("demo", &doc.id, SyncSide::Remote, None)
            .await,
        Err(SyncError::SiteNotAssigned { .. })
    ));
}

// ============================================================================
// Clear Project
// ============================================================================

#[tokio::test]
async fn test_clear_remote_site_keeps_files() {
    let mut h = harness();
    let hero = publish(&h, "hero").await;
    let lamp = publish(&h, "lamp").await;
    let rock = publish(&h, "rock").await;
    for doc in [&hero, &lamp] {
        h.controller
            .add_site("demo", &doc.id, Some("gdrive"), false)
            .await
            .unwrap();
    }
    drain(&mut h.events);

    let report = h.controller.clear_project("demo", "gdrive").await.unwrap();
    assert_eq!(report.representations, 2);
    assert_eq!(report.removed_records, 4);
    assert_eq!(report.deleted_files, 0);
    assert!(report.failures.is_empty());

    for doc in [&hero, &lamp, &rock] {
        let stored = h.store.get_representation("demo", &doc.id).await.unwrap();
        assert!(!stored.has_site("gdrive"));
        assert!(stored.has_site("studio"));
    }

    let events = drain(&mut h.events);
    assert_eq!(
        events.last(),
        Some(&CoreEvent::Sync(SyncEvent::ProjectCleared {
            project: "demo".to_string(),
            site: "gdrive".to_string(),
            representations: 2,
        }))
    );
}

#[tokio::test]
async fn test_clear_local_site_deletes_copies() {
    let root = std::env::temp_dir().join(format!("core-sync-clear-{}", uuid::Uuid::new_v4()));
    let version_dir = root.join("hero").join("v001");
    tokio::fs::create_dir_all(&version_dir).await.unwrap();
    tokio::fs::write(version_dir.join("hero.ma"), b"maya").await.unwrap();
    tokio::fs::write(version_dir.join("hero.abc"), b"alembic").await.unwrap();

    let h = harness_with(Arc::new(TokioFileSystem::new()), &root);
    let doc = publish(&h, "hero").await;
    h.controller
        .add_site("demo", &doc.id, Some("local"), false)
        .await
        .unwrap();

    let report = h.controller.clear_project("demo", "local").await.unwrap();
    assert_eq!(report.representations, 1);
    assert_eq!(report.deleted_files, 2);
    assert!(report.failures.is_empty());

    assert!(!tokio::fs::try_exists(version_dir.join("hero.ma")).await.unwrap());
    assert!(!tokio::fs::try_exists(&version_dir).await.unwrap());
    assert!(tokio::fs::try_exists(root.join("hero")).await.unwrap());

    let stored = h.store.get_representation("demo", &doc.id).await.unwrap();
    assert!(!stored.has_site(LOCAL_SITE));

    tokio::fs::remove_dir_all(&root).await.ok();
}

#[tokio::test]
async fn test_clear_local_site_collects_failures() {
    let mut file_system = MockFileSystem::new();
    file_system.expect_exists().returning(|_| Ok(true));
    file_system.expect_delete_file().returning(|path| {
        if path.extension().is_some_and(|ext| ext == "abc") {
            Err(BridgeError::OperationFailed("file is locked".to_string()))
        } else {
            Ok(())
        }
    });
    // the locked copy keeps its directory from being removed
    file_system
        .expect_remove_empty_dir()
        .returning(|_| Err(BridgeError::OperationFailed("directory not empty".to_string())));

    let h = harness_with(Arc::new(file_system), Path::new("/cache"));
    let hero = publish(&h, "hero").await;
    let lamp = publish(&h, "lamp").await;
    for doc in [&hero, &lamp] {
        h.controller
            .add_site("demo", &doc.id, Some(LOCAL_SITE), false)
            .await
            .unwrap();
    }

    let report = h.controller.clear_project("demo", LOCAL_SITE).await.unwrap();
    assert_eq!(report.representations, 2);
    assert_eq!(report.deleted_files, 2);
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|(_, failure)| failure.message.contains("file is locked")));
    let mut retained = report.retained_dirs.clone();
    retained.sort();
    assert_eq!(
        retained,
        vec![
            PathBuf::from("/cache/hero/v001"),
            PathBuf::from("/cache/lamp/v001")
        ]
    );
    assert!(report.skipped.is_empty());

    // records are removed regardless of deletion failures
    for doc in [&hero, &lamp] {
        let stored = h.store.get_representation("demo", &doc.id).await.unwrap();
        assert!(!stored.has_site(LOCAL_SITE));
    }
}

// ============================================================================
// Planner
// ============================================================================

#[tokio::test]
async fn test_planner_orders_by_priority_and_limits() {
    let h = harness();
    let mut docs = Vec::new();
    for asset in ["hero", "lamp", "rock"] {
        let doc = publish(&h, asset).await;
        h.controller
            .add_site("demo", &doc.id, Some("gdrive"), false)
            .await
            .unwrap();
        docs.push(doc);
    }
    h.controller
        .set_priority("demo", &docs[2].id, "studio", None, 900)
        .await
        .unwrap();

    let tasks = h.planner.plan("demo").await.unwrap();

    // representation_limit is 2: the prioritized one, then the lowest id
    let mut others = vec![docs[0].id, docs[1].id];
    others.sort();
    assert_eq!(tasks.len(), 4);
    assert!(tasks[..2].iter().all(|t| t.representation_id == docs[2].id));
    assert!(tasks[..2].iter().all(|t| t.priority == 900));
    assert!(tasks[2..].iter().all(|t| t.representation_id == others[0]));
    assert!(tasks
        .iter()
        .all(|t| t.direction == TransferDirection::Upload && t.site == "gdrive"));
}

#[tokio::test]
async fn test_planner_skips_paused_scopes() {
    let h = harness();
    let hero = publish(&h, "hero").await;
    let lamp = publish(&h, "lamp").await;
    for doc in [&hero, &lamp] {
        h.controller
            .add_site("demo", &doc.id, Some("gdrive"), false)
            .await
            .unwrap();
    }

    h.controller.pause_project("demo").await.unwrap();
    assert!(h.planner.plan("demo").await.unwrap().is_empty());
    h.controller.unpause_project("demo").await.unwrap();

    h.controller.pause_server().await;
    assert!(h.planner.plan("demo").await.unwrap().is_empty());
    h.controller.unpause_server().await;

    h.controller
        .pause_representation("demo", &hero.id, None)
        .await
        .unwrap();
    h.controller
        .pause_representation("demo", &lamp.id, Some("gdrive"))
        .await
        .unwrap();
    assert!(h.planner.plan("demo").await.unwrap().is_empty());

    h.controller
        .unpause_representation("demo", &hero.id, None)
        .await
        .unwrap();
    let tasks = h.planner.plan("demo").await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.representation_id == hero.id));
}

#[tokio::test]
async fn test_planner_drops_files_after_success_or_exhaustion() {
    let h = harness();
    let doc = publish(&h, "hero").await;
    h.controller
        .add_site("demo", &doc.id, Some("gdrive"), false)
        .await
        .unwrap();

    h.store
        .record_success("demo", &doc.files[0].id, "gdrive", Some("drive-1".to_string()))
        .await
        .unwrap();
    for _ in 0..3 {
        h.store
            .record_failure("demo", &doc.files[1].id, "gdrive", "quota exceeded")
            .await
            .unwrap();
    }

    assert!(h.planner.plan("demo").await.unwrap().is_empty());

    h.controller
        .reset_file_state("demo", &doc.id, SyncSide::Remote, Some(&doc.files[1].id))
        .await
        .unwrap();
    let tasks = h.planner.plan("demo").await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].file_id, doc.files[1].id);
}
