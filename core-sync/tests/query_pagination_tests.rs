//! Integration tests for the paginated query layer
//!
//! These tests verify:
//! - Walking the pages of every sort column yields each row exactly once
//! - Filter semantics (substring, exact id, status set)
//! - Reconciled status as seen by operator views
//! - Pages fetched across concurrent mutations

use bridge_desktop::TokioFileSystem;
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_runtime::config::{LocalSettings, ProjectSyncConfig, ProviderKind, SiteConfig, SyncSettings};
use core_sync::{
    DetailColumn, DetailQuery, FileSyncStateStore, InMemoryRepresentationRepository, PageRequest,
    PauseRegistry, RepresentationContext, RepresentationDocument, RepresentationFile,
    RepresentationId, RepresentationRepository, SiteFileState, SiteRegistry, SortOrder,
    SqliteRepresentationRepository, SummaryColumn, SummaryQuery, SyncError, SyncQueryService,
    SyncStatus,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Fixtures
// ============================================================================

struct Fixture {
    store: Arc<FileSyncStateStore>,
    pauses: Arc<PauseRegistry>,
    service: SyncQueryService,
}

fn registry() -> Arc<SiteRegistry> {
    let project = ProjectSyncConfig::builder()
        .active_site("studio")
        .remote_site("gdrive")
        .site("gdrive", SiteConfig::new(ProviderKind::GoogleDrive).with_root("work", "/VFX"))
        .build()
        .unwrap();
    let settings = SyncSettings::default().with_project("demo", project);
    Arc::new(SiteRegistry::new(settings, LocalSettings::new("ws-query")).unwrap())
}

fn fixture_with(repository: Arc<dyn RepresentationRepository>) -> Fixture {
    let store = Arc::new(FileSyncStateStore::new(
        repository,
        registry(),
        Arc::new(TokioFileSystem::new()),
    ));
    let pauses = Arc::new(PauseRegistry::new());
    Fixture {
        service: SyncQueryService::new(store.clone(), pauses.clone()),
        store,
        pauses,
    }
}

fn fixture() -> Fixture {
    fixture_with(Arc::new(InMemoryRepresentationRepository::new()))
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn synced(site: &str, at: DateTime<Utc>) -> SiteFileState {
    let mut state = SiteFileState::new(site);
    state.created_at = Some(at);
    state
}

/// Deterministic mix of contexts, sizes, timestamps and remote states with
/// plenty of ties in every column
fn varied_document(i: usize) -> RepresentationDocument {
    let version = if i % 5 == 0 { None } else { Some((i % 4) as u32 + 1) };
    let context = RepresentationContext::new(
        format!("asset_{:02}", i % 7),
        if i % 2 == 0 { "modelMain" } else { "rigMain" },
        version,
        ["ma", "abc", "usd"][i % 3],
    );

    let mut doc = RepresentationDocument::new(context);
    for f in 0..(1 + i % 3) {
        let mut local = synced("studio", base_time());
        if i % 4 == 1 {
            local.priority = Some(100 * (i % 3) as u32 + 10);
        }

        let remote = match (i + f) % 5 {
            0 => synced("gdrive", base_time() + Duration::hours((i % 3) as i64)),
            1 => {
                let mut state = SiteFileState::new("gdrive");
                state.progress = Some(0.5);
                state
            }
            2 => {
                let mut state = SiteFileState::new("gdrive");
                state.tries = 3;
                state.last_failed_at = Some(base_time() + Duration::minutes(i as i64));
                state.error = Some("quota exceeded".to_string());
                state
            }
            _ => SiteFileState::new("gdrive"),
        };

        doc = doc.with_file(
            RepresentationFile::new(format!("{{root[work]}}/shot_{:02}/file_{}.ma", i % 6, f), (f as u64 + 1) * 10)
                .with_site(local)
                .with_site(remote),
        );
    }
    doc
}

async fn seed(fixture: &Fixture, count: usize) -> Vec<RepresentationDocument> {
    let mut docs = Vec::new();
    for i in 0..count {
        let doc = varied_document(i);
        fixture.store.insert_representation("demo", &doc).await.unwrap();
        docs.push(doc);
    }
    docs
}

async fn walk_summaries(fixture: &Fixture, query: &SummaryQuery, limit: usize) -> Vec<RepresentationId> {
    let mut ids = Vec::new();
    let mut request = PageRequest::new(0, limit);
    loop {
        let page = fixture
            .service
            .list_representations("demo", &query.clone().with_page(request))
            .await
            .unwrap();
        assert!(page.items.len() <= limit);
        ids.extend(page.items.iter().map(|row| row.id));
        if !page.has_next() {
            break;
        }
        request = request.next();
    }
    ids
}

async fn assert_stable_walks(fixture: &Fixture, expected: &HashSet<RepresentationId>) {
    for column in SummaryColumn::ALL {
        for order in [SortOrder::Ascending, SortOrder::Descending] {
            let query = SummaryQuery::default().with_sort(column, order);
            let walked = walk_summaries(fixture, &query, 4).await;

            let unique: HashSet<_> = walked.iter().copied().collect();
            assert_eq!(walked.len(), expected.len(), "{:?} {:?}", column, order);
            assert_eq!(&unique, expected, "{:?} {:?}", column, order);

            let whole = fixture
                .service
                .list_representations("demo", &query.with_page(PageRequest::new(0, 1000)))
                .await
                .unwrap();
            let whole: Vec<_> = whole.items.iter().map(|row| row.id).collect();
            assert_eq!(walked, whole, "{:?} {:?}", column, order);
        }
    }
}

// ============================================================================
// Pagination Stability
// ============================================================================

#[tokio::test]
async fn test_summary_pages_cover_every_row_once_for_every_column() {
    let fixture = fixture();
    let docs = seed(&fixture, 23).await;
    let expected: HashSet<_> = docs.iter().map(|d| d.id).collect();

    assert_stable_walks(&fixture, &expected).await;
}

#[tokio::test]
async fn test_summary_pages_stable_over_sqlite() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    let repository = SqliteRepresentationRepository::new(pool);
    repository.initialize().await.unwrap();

    let fixture = fixture_with(Arc::new(repository));
    let docs = seed(&fixture, 17).await;
    let expected: HashSet<_> = docs.iter().map(|d| d.id).collect();

    assert_stable_walks(&fixture, &expected).await;
}

#[tokio::test]
async fn test_detail_pages_cover_every_file_once_for_every_column() {
    let fixture = fixture();
    let mut doc = RepresentationDocument::new(RepresentationContext::new("hero", "plate", Some(2), "exr"));
    for frame in 0..14u64 {
        let remote = if frame % 3 == 0 {
            synced("gdrive", base_time() + Duration::seconds((frame % 2) as i64))
        } else {
            SiteFileState::new("gdrive")
        };
        doc = doc.with_file(
            RepresentationFile::new(format!("{{root[work]}}/hero/plate.{:04}.exr", 1000 + frame % 5), 1 + frame % 4)
                .with_site(synced("studio", base_time()))
                .with_site(remote),
        );
    }
    fixture.store.insert_representation("demo", &doc).await.unwrap();
    let expected: HashSet<_> = doc.files.iter().map(|f| f.id).collect();

    for column in DetailColumn::ALL {
        for order in [SortOrder::Ascending, SortOrder::Descending] {
            let query = DetailQuery::default().with_sort(column, order);
            let mut walked = Vec::new();
            let mut request = PageRequest::new(0, 3);
            loop {
                let page = fixture
                    .service
                    .list_files("demo", &doc.id, &query.clone().with_page(request))
                    .await
                    .unwrap();
                assert_eq!(page.total, 14);
                walked.extend(page.items.iter().map(|row| row.file_id));
                if !page.has_next() {
                    break;
                }
                request = request.next();
            }

            let unique: HashSet<_> = walked.iter().copied().collect();
            assert_eq!(walked.len(), 14, "{:?} {:?}", column, order);
            assert_eq!(unique, expected, "{:?} {:?}", column, order);
        }
    }
}

#[tokio::test]
async fn test_default_sorts() {
    let fixture = fixture();
    seed(&fixture, 12).await;

    let page = fixture
        .service
        .list_representations("demo", &SummaryQuery::default().with_page(PageRequest::new(0, 100)))
        .await
        .unwrap();
    let remote_updated: Vec<_> = page.items.iter().map(|row| row.remote_updated).collect();
    let mut sorted = remote_updated.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(remote_updated, sorted);

    let id = page.items[0].id;
    let files = fixture
        .service
        .list_files("demo", &id, &DetailQuery::default())
        .await
        .unwrap();
    let paths: Vec<_> = files.items.iter().map(|row| row.path.clone()).collect();
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_filter_substring_is_case_insensitive() {
    let fixture = fixture();
    let docs = seed(&fixture, 14).await;

    let page = fixture
        .service
        .list_representations("demo", &SummaryQuery::default().with_filter("ASSET_03"))
        .await
        .unwrap();
    let expected = docs.iter().filter(|d| d.context.asset == "asset_03").count();
    assert_eq!(page.total, expected);
    assert!(page.items.iter().all(|row| row.asset == "asset_03"));

    let page = fixture
        .service
        .list_representations("demo", &SummaryQuery::default().with_filter("rigmain"))
        .await
        .unwrap();
    assert_eq!(page.total, 7);
}

#[tokio::test]
async fn test_filter_valid_id_matches_exactly() {
    let fixture = fixture();
    let docs = seed(&fixture, 9).await;
    let target = &docs[4];

    let page = fixture
        .service
        .list_representations("demo", &SummaryQuery::default().with_filter(target.id.as_str()))
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, target.id);

    // a well-formed id that matches nothing yields nothing, not a substring search
    let page = fixture
        .service
        .list_representations(
            "demo",
            &SummaryQuery::default().with_filter(RepresentationId::new().as_str()),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 0);

    let file = &target.files[0];
    let files = fixture
        .service
        .list_files("demo", &target.id, &DetailQuery::default().with_filter(file.id.as_str()))
        .await
        .unwrap();
    assert_eq!(files.total, 1);
    assert_eq!(files.items[0].file_id, file.id);
}

#[tokio::test]
async fn test_status_filter() {
    let fixture = fixture();
    seed(&fixture, 20).await;

    let all = fixture
        .service
        .list_representations("demo", &SummaryQuery::default().with_page(PageRequest::new(0, 100)))
        .await
        .unwrap();
    let failed = fixture
        .service
        .list_representations(
            "demo",
            &SummaryQuery::default()
                .with_statuses([SyncStatus::Failed])
                .with_page(PageRequest::new(0, 100)),
        )
        .await
        .unwrap();

    let expected = all
        .items
        .iter()
        .filter(|row| row.status == SyncStatus::Failed)
        .count();
    assert!(expected > 0);
    assert_eq!(failed.total, expected);
    assert!(failed.items.iter().all(|row| row.status == SyncStatus::Failed));
}

#[tokio::test]
async fn test_rows_require_both_sites() {
    let fixture = fixture();
    let remote_only = RepresentationDocument::new(RepresentationContext::new("a", "b", Some(1), "ma"))
        .with_file(RepresentationFile::new("{root}/a.ma", 1).with_site(SiteFileState::new("gdrive")));
    let local_only = RepresentationDocument::new(RepresentationContext::new("c", "d", Some(1), "ma"))
        .with_file(RepresentationFile::new("{root}/c.ma", 1).with_site(synced("studio", base_time())));
    fixture.store.insert_representation("demo", &remote_only).await.unwrap();
    fixture.store.insert_representation("demo", &local_only).await.unwrap();

    let page = fixture
        .service
        .list_representations("demo", &SummaryQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

// ============================================================================
// Reconciled Status
// ============================================================================

#[tokio::test]
async fn test_two_file_representation_is_in_progress() {
    let fixture = fixture();
    let mut partial = SiteFileState::new("gdrive");
    partial.progress = Some(0.5);

    let doc = RepresentationDocument::new(RepresentationContext::new("hero", "modelMain", Some(3), "ma"))
        .with_file(
            RepresentationFile::new("{root[work]}/hero.ma", 100)
                .with_site(synced("studio", base_time()))
                .with_site(synced("gdrive", base_time())),
        )
        .with_file(
            RepresentationFile::new("{root[work]}/hero.abc", 300)
                .with_site(synced("studio", base_time()))
                .with_site(partial),
        );
    fixture.store.insert_representation("demo", &doc).await.unwrap();

    let page = fixture
        .service
        .list_representations("demo", &SummaryQuery::default())
        .await
        .unwrap();
    let row = &page.items[0];
    assert_eq!(row.status, SyncStatus::InProgress);
    assert_eq!(row.files_count, 2);
    assert_eq!(row.files_size, 400);
    assert_eq!(row.version_label, "v003");
    assert!((row.local_avg_progress - 1.0).abs() < f64::EPSILON);
    assert!((row.remote_avg_progress - 0.75).abs() < f64::EPSILON);

    let files = fixture
        .service
        .list_files("demo", &doc.id, &DetailQuery::default())
        .await
        .unwrap();
    let statuses: Vec<_> = files.items.iter().map(|row| row.status).collect();
    // sorted by path: hero.abc, hero.ma
    assert_eq!(statuses, vec![SyncStatus::InProgress, SyncStatus::SyncedOk]);
}

#[tokio::test]
async fn test_retry_threshold_through_queries() {
    let fixture = fixture();
    let doc = RepresentationDocument::new(RepresentationContext::new("hero", "rig", Some(1), "ma"))
        .with_file(
            RepresentationFile::new("{root[work]}/hero_rig.ma", 10)
                .with_site(synced("studio", base_time()))
                .with_site(SiteFileState::new("gdrive")),
        );
    fixture.store.insert_representation("demo", &doc).await.unwrap();
    let file_id = doc.files[0].id;

    for expected in [SyncStatus::Queued, SyncStatus::Queued, SyncStatus::Failed] {
        let state = fixture
            .store
            .record_failure("demo", &file_id, "gdrive", "connection reset")
            .await
            .unwrap();
        let files = fixture
            .service
            .list_files("demo", &doc.id, &DetailQuery::default())
            .await
            .unwrap();
        assert_eq!(files.items[0].status, expected, "after {} tries", state.tries);
        assert_eq!(files.items[0].tries, state.tries);
        assert_eq!(files.items[0].remote_error.as_deref(), Some("connection reset"));
    }
}

#[tokio::test]
async fn test_paused_project_reports_paused() {
    let fixture = fixture();
    seed(&fixture, 6).await;
    fixture.pauses.set_project("demo", true).await;

    let page = fixture
        .service
        .list_representations("demo", &SummaryQuery::default())
        .await
        .unwrap();
    assert!(page.items.iter().all(|row| row.status == SyncStatus::Paused));
}

#[tokio::test]
async fn test_unknown_targets() {
    let fixture = fixture();
    assert!(matches!(
        fixture
            .service
            .list_representations("missing", &SummaryQuery::default())
            .await,
        Err(SyncError::ProjectNotConfigured { .. })
    ));
    assert!(matches!(
        fixture
            .service
            .list_files("demo", &RepresentationId::new(), &DetailQuery::default())
            .await,
        Err(SyncError::UnknownRepresentation { .. })
    ));
}

// ============================================================================
// Concurrent Mutation
// ============================================================================

#[tokio::test]
async fn test_mutation_between_page_fetches() {
    let fixture = fixture();
    let docs = seed(&fixture, 10).await;
    let query = SummaryQuery::default().with_sort(SummaryColumn::Asset, SortOrder::Ascending);

    let first = fixture
        .service
        .list_representations("demo", &query.clone().with_page(PageRequest::new(0, 5)))
        .await
        .unwrap();
    assert_eq!(first.total, 10);

    // a new publish and a transfer result land between the two fetches
    fixture
        .store
        .insert_representation("demo", &varied_document(99))
        .await
        .unwrap();
    fixture
        .store
        .record_success("demo", &docs[0].files[0].id, "gdrive", None)
        .await
        .unwrap();

    let second = fixture
        .service
        .list_representations("demo", &query.with_page(PageRequest::new(0, 5).next()))
        .await
        .unwrap();
    assert_eq!(second.total, 11);
    assert!(second.items.len() <= 5);
}

#[tokio::test]
async fn test_concurrent_cell_updates_all_land() {
    let fixture = fixture();
    let mut doc = RepresentationDocument::new(RepresentationContext::new("crowd", "cache", Some(7), "abc"));
    for n in 0..8 {
        doc = doc.with_file(
            RepresentationFile::new(format!("{{root[work]}}/crowd/agent_{}.abc", n), 5)
                .with_site(synced("studio", base_time()))
                .with_site(SiteFileState::new("gdrive")),
        );
    }
    fixture.store.insert_representation("demo", &doc).await.unwrap();

    let updates = doc.files.iter().enumerate().map(|(n, file)| {
        let store = fixture.store.clone();
        let file_id = file.id;
        async move {
            if n % 2 == 0 {
                store.record_progress("demo", &file_id, "gdrive", 0.25).await
            } else {
                store.record_success("demo", &file_id, "gdrive", None).await
            }
        }
    });
    for result in futures::future::join_all(updates).await {
        result.unwrap();
    }

    let files = fixture
        .service
        .list_files(
            "demo",
            &doc.id,
            &DetailQuery::default().with_statuses([SyncStatus::SyncedOk]),
        )
        .await
        .unwrap();
    assert_eq!(files.total, 4);

    let summary = fixture
        .service
        .list_representations("demo", &SummaryQuery::default())
        .await
        .unwrap();
    assert_eq!(summary.items[0].status, SyncStatus::InProgress);
    assert!((summary.items[0].remote_avg_progress - 0.625).abs() < 1e-9);
}
