// Redirect rebuild lifecycle: CMS fetch, persistence, restart, live swap

use std::sync::Arc;

use cms_edge::redirects::{FilterArtifact, MemoryStorage, RebuildOutcome};
use cms_edge::routing::{RouteDecision, RouteStage};

use super::test_harness::{evaluate, redirects_config, router_for, rule, service, ScriptedSource};

#[tokio::test]
async fn test_rebuild_is_visible_to_live_router() {
    let storage = MemoryStorage::new();
    let source = Arc::new(ScriptedSource::new());
    source.push_feed(vec![rule(1, "/old-page", "/new-page", 301)]);

    let (service, metrics) = service(&storage, Arc::clone(&source));
    service.init().await.expect("init without artifacts");
    let router = router_for(service.resolver(), Arc::clone(&metrics));

    assert_eq!(evaluate(&router, "/old-page").stage, RouteStage::LocaleRewrite);

    let report = service.rebuild(false).await;
    assert_eq!(report.outcome, RebuildOutcome::Refreshed);
    assert_eq!(report.items, 1);

    assert!(matches!(
        evaluate(&router, "/old-page").decision,
        RouteDecision::Redirect { status: 301, .. }
    ));
}

#[tokio::test]
async fn test_restart_loads_persisted_artifacts_without_network() {
    let storage = MemoryStorage::new();
    let source = Arc::new(ScriptedSource::new());
    source.push_feed(vec![
        rule(1, "/old-page", "/new-page", 301),
        rule(2, "~/Legacy", "/modern", 302),
    ]);
    let (first, _) = service(&storage, Arc::clone(&source));
    assert_eq!(first.rebuild(true).await.outcome, RebuildOutcome::Refreshed);

    // Second process: same storage, a CMS that would fail if asked
    let offline = Arc::new(ScriptedSource::new());
    let (second, metrics) = service(&storage, Arc::clone(&offline));
    second.init().await.expect("init from persisted artifacts");

    let index = second.current();
    assert_eq!(index.snapshot.len(), 2);
    assert!(index.has_filter());
    assert!(index.in_sync);
    assert!(offline.calls().is_empty());

    let router = router_for(second.resolver(), metrics);
    assert!(matches!(
        evaluate(&router, "/legacy").decision,
        RouteDecision::Redirect { status: 302, .. }
    ));
}

#[tokio::test]
async fn test_persisted_filter_matches_snapshot() {
    let storage = MemoryStorage::new();
    let source = Arc::new(ScriptedSource::new());
    source.push_feed(vec![rule(1, "/a", "/b", 301), rule(2, "/c", "/d", 301)]);
    let (service, _) = service(&storage, source);

    let report = service.rebuild(true).await;
    assert!(report.filter_persisted);

    let config = redirects_config();
    let bytes = cms_edge::redirects::ArtifactStorage::read(&storage, &config.filter_path())
        .await
        .expect("storage read")
        .expect("filter persisted");
    let artifact: FilterArtifact = serde_json::from_slice(&bytes).expect("filter artifact json");
    assert!(artifact.matches(&service.current().snapshot));
    assert_eq!(artifact.item_count, 2);
}

#[tokio::test]
async fn test_cms_failure_keeps_serving_previous_redirects() {
    let storage = MemoryStorage::new();
    let source = Arc::new(ScriptedSource::new());
    source.push_feed(vec![rule(1, "/old-page", "/new-page", 301)]);
    source.push_error(500);

    let (service, metrics) = service(&storage, Arc::clone(&source));
    let router = router_for(service.resolver(), Arc::clone(&metrics));

    assert_eq!(service.rebuild(true).await.outcome, RebuildOutcome::Refreshed);
    let report = service.rebuild(true).await;
    assert_eq!(report.outcome, RebuildOutcome::Failed);
    assert!(report.error.is_some());

    assert!(matches!(
        evaluate(&router, "/old-page").decision,
        RouteDecision::Redirect { .. }
    ));
    assert_eq!(metrics.get_rebuild_failure_count(), 1);
}

#[tokio::test]
async fn test_up_to_date_cms_sends_cursor_and_keeps_index() {
    let storage = MemoryStorage::new();
    let source = Arc::new(ScriptedSource::new());
    source.push_feed(vec![rule(1, "/old-page", "/new-page", 301)]);
    source.push_up_to_date();

    let (service, _) = service(&storage, Arc::clone(&source));
    let first = service.rebuild(true).await;
    let second = service.rebuild(true).await;

    assert_eq!(second.outcome, RebuildOutcome::Unchanged);
    assert_eq!(second.items, 1);

    let calls = source.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], None);
    assert_eq!(calls[1], Some(first.last_access_date));
}

#[tokio::test]
async fn test_non_forced_rebuild_trusts_up_to_date_snapshot() {
    let storage = MemoryStorage::new();
    let source = Arc::new(ScriptedSource::new());
    source.push_feed(vec![rule(1, "/old-page", "/new-page", 301)]);

    let (service, _) = service(&storage, Arc::clone(&source));
    service.rebuild(true).await;

    let report = service.rebuild(false).await;
    assert_eq!(report.outcome, RebuildOutcome::Unchanged);
    assert_eq!(source.calls().len(), 1);
}
