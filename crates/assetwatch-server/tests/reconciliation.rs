use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assetwatch_db_memory::{InMemoryPlatform, InMemoryStore};
use assetwatch_server::installation::{installation_key, tombstone_key};
use assetwatch_server::{
    Poller, PollerConfig, ResolveError, Resolver, ResolverFailurePolicy, StaticResolver,
    asset_key, get_installation,
};
use assetwatch_storage::{
    AppPlatform, InstallationStatus, InstallationSummary, KvStore, ListPage, StorageError,
};
use async_trait::async_trait;
use serde_json::json;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

async fn seed_domains(store: &InMemoryStore, id: &str, domains: &[&str]) {
    store
        .seed(installation_key(id), json!({"state": {"domains": domains}}))
        .await;
}

fn poller(
    store: Arc<InMemoryStore>,
    platform: Arc<dyn AppPlatform>,
    resolver: impl Resolver + 'static,
    config: PollerConfig,
) -> Poller {
    Poller::new(store, platform, Arc::new(resolver), config)
}

/// Resolver that never answers.
struct HangingResolver {
    calls: AtomicUsize,
}

#[async_trait]
impl Resolver for HangingResolver {
    async fn resolve(&self, _domain: &str) -> Result<Vec<IpAddr>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Platform that serves one page and then fails.
struct FlakyPlatform;

#[async_trait]
impl AppPlatform for FlakyPlatform {
    async fn list_installations(
        &self,
        cursor: Option<&str>,
    ) -> Result<ListPage<InstallationSummary>, StorageError> {
        match cursor {
            None => Ok(ListPage {
                items: vec![
                    InstallationSummary::new("a", InstallationStatus::Active),
                    InstallationSummary::new("b", InstallationStatus::Active),
                ],
                cursor: Some("2".into()),
            }),
            Some(_) => Err(StorageError::http(503, "Service Unavailable")),
        }
    }

    async fn remove_installation(&self, _id: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test]
async fn one_failing_installation_does_not_stop_the_sweep() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::new());
    for (id, domain) in [("first", "a.example"), ("second", "broken.example"), ("third", "c.example")] {
        platform.upsert(id, InstallationStatus::Active).await;
        seed_domains(&store, id, &[domain]).await;
    }
    let resolver = StaticResolver::new()
        .with_answer("a.example", &[ip("10.0.0.1")])
        .with_error("broken.example", ResolveError::Other("SERVFAIL".into()))
        .with_answer("c.example", &[ip("10.0.0.3")]);

    let report = poller(
        store.clone(),
        platform,
        resolver,
        PollerConfig {
            resolver_failures: ResolverFailurePolicy::FailClosed,
            ..PollerConfig::default()
        },
    )
    .sweep()
    .await;

    assert_eq!(report.seen, 3);
    assert_eq!(report.updated, 2);
    assert_eq!(report.failed, 1);
    assert!(report.complete);

    let first = get_installation(store.as_ref(), "first").await.unwrap();
    assert_eq!(first.assets[0].value, "10.0.0.1");
    let second = get_installation(store.as_ref(), "second").await.unwrap();
    assert!(second.assets.is_empty());
    let third = get_installation(store.as_ref(), "third").await.unwrap();
    assert_eq!(third.assets[0].value, "10.0.0.3");
}

#[tokio::test]
async fn fail_open_publishes_what_resolved() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::new());
    platform.upsert("inst", InstallationStatus::Active).await;
    seed_domains(&store, "inst", &["ok.example", "missing.invalid", "broken.example"]).await;
    let resolver = StaticResolver::new()
        .with_answer("ok.example", &[ip("192.0.2.1"), ip("192.0.2.2")])
        .with_error("broken.example", ResolveError::Timeout(Duration::from_secs(10)));

    let report = poller(store.clone(), platform, resolver, PollerConfig::default())
        .sweep()
        .await;

    assert_eq!(report.updated, 1);
    assert_eq!(report.failed, 0);
    let doc = get_installation(store.as_ref(), "inst").await.unwrap();
    assert_eq!(doc.assets.len(), 2);
    assert!(doc.assets.iter().all(|a| a.key.as_deref() == Some(asset_key("ok.example").as_str())));
    assert_eq!(doc.state.domains.len(), 3);
}

#[tokio::test]
async fn removed_domains_drop_their_assets() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::new());
    platform.upsert("inst", InstallationStatus::Active).await;
    store
        .seed(
            installation_key("inst"),
            json!({
                "state": {"domains": []},
                "assets": [{"type": "ip", "value": "10.9.9.9", "key": asset_key("old.example")}]
            }),
        )
        .await;

    poller(store.clone(), platform, StaticResolver::new(), PollerConfig::default())
        .sweep()
        .await;

    let doc = get_installation(store.as_ref(), "inst").await.unwrap();
    assert!(doc.assets.is_empty());
}

#[tokio::test]
async fn paused_installations_are_left_alone() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::new());
    platform.upsert("inst", InstallationStatus::Paused).await;
    seed_domains(&store, "inst", &["a.example"]).await;
    let resolver = Arc::new(StaticResolver::new().with_answer("a.example", &[ip("10.0.0.1")]));

    let report = Poller::new(store.clone(), platform, resolver.clone(), PollerConfig::default())
        .sweep()
        .await;

    assert_eq!(report.paused, 1);
    assert_eq!(resolver.calls(), 0);
    assert_eq!(store.stats().commit_attempts(), 0);
}

#[tokio::test]
async fn uninstalled_installations_are_removed_every_sweep() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::new());
    platform.upsert("keep", InstallationStatus::Active).await;
    platform.upsert("drop", InstallationStatus::Uninstalled).await;
    seed_domains(&store, "keep", &[]).await;
    seed_domains(&store, "drop", &["a.example"]).await;

    let worker = poller(store.clone(), platform.clone(), StaticResolver::new(), PollerConfig::default());
    let report = worker.sweep().await;

    assert_eq!(report.removed, 1);
    assert_eq!(platform.removals().await, vec!["drop"]);
    assert!(!store.keys().await.contains(&installation_key("drop")));
    assert!(store.keys().await.contains(&tombstone_key("drop")));
    assert!(store.keys().await.contains(&installation_key("keep")));

    // The platform no longer lists it; a later sweep must not fail.
    let report = worker.sweep().await;
    assert_eq!(report.removed, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn removal_on_the_first_page_does_not_skip_later_installations() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::with_page_size(2));
    platform.upsert("a", InstallationStatus::Uninstalled).await;
    seed_domains(&store, "a", &[]).await;
    for id in ["b", "c", "d"] {
        platform.upsert(id, InstallationStatus::Active).await;
        seed_domains(&store, id, &["a.example"]).await;
    }
    let resolver = StaticResolver::new().with_answer("a.example", &[ip("10.0.0.1")]);

    let report = poller(store.clone(), platform, resolver, PollerConfig::default())
        .sweep()
        .await;

    assert_eq!(report.seen, 4);
    assert_eq!(report.removed, 1);
    assert_eq!(report.updated, 3);
    assert!(report.complete);
    for id in ["b", "c", "d"] {
        let doc = get_installation(store.as_ref(), id).await.unwrap();
        assert_eq!(doc.assets.len(), 1, "{id} was not reconciled");
    }
}

#[tokio::test]
async fn tombstoned_active_installation_counts_as_gone() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::new());
    platform.upsert("inst", InstallationStatus::Active).await;
    seed_domains(&store, "inst", &["a.example"]).await;
    store.seed(tombstone_key("inst"), json!(true)).await;

    let report = poller(store.clone(), platform, StaticResolver::new(), PollerConfig::default())
        .sweep()
        .await;

    assert_eq!(report.gone, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(store.stats().commit_attempts(), 0);
}

#[tokio::test]
async fn sweep_follows_every_page() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::with_page_size(2));
    for i in 0..5 {
        let id = format!("inst-{i}");
        platform.upsert(id.as_str(), InstallationStatus::Active).await;
        seed_domains(&store, &id, &["a.example"]).await;
    }
    let resolver = StaticResolver::new().with_answer("a.example", &[ip("10.0.0.1")]);

    let report = poller(store.clone(), platform.clone(), resolver, PollerConfig::default())
        .sweep()
        .await;

    assert_eq!(report.seen, 5);
    assert_eq!(report.updated, 5);
    assert_eq!(platform.page_requests(), 3);
}

#[tokio::test]
async fn concurrent_sweep_processes_everything() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::with_page_size(3));
    for i in 0..10 {
        let id = format!("inst-{i}");
        platform.upsert(id.as_str(), InstallationStatus::Active).await;
        seed_domains(&store, &id, &["a.example"]).await;
    }
    let resolver = StaticResolver::new().with_answer("a.example", &[ip("10.0.0.1")]);

    let report = poller(
        store.clone(),
        platform,
        resolver,
        PollerConfig {
            concurrency: 4,
            ..PollerConfig::default()
        },
    )
    .sweep()
    .await;

    assert_eq!(report.updated, 10);
    for i in 0..10 {
        let doc = get_installation(store.as_ref(), &format!("inst-{i}")).await.unwrap();
        assert_eq!(doc.assets.len(), 1);
    }
}

#[tokio::test]
async fn enumeration_failure_ends_the_sweep_early() {
    let store = Arc::new(InMemoryStore::new());
    seed_domains(&store, "a", &[]).await;
    seed_domains(&store, "b", &[]).await;

    let report = poller(
        store.clone(),
        Arc::new(FlakyPlatform),
        StaticResolver::new(),
        PollerConfig::default(),
    )
    .sweep()
    .await;

    assert!(!report.complete);
    assert_eq!(report.seen, 2);
    assert_eq!(report.updated, 2);
}

#[tokio::test]
async fn shutdown_interrupts_a_stuck_sweep() {
    let store = Arc::new(InMemoryStore::new());
    let platform = Arc::new(InMemoryPlatform::new());
    platform.upsert("inst", InstallationStatus::Active).await;
    seed_domains(&store, "inst", &["slow.example"]).await;
    let resolver = Arc::new(HangingResolver {
        calls: AtomicUsize::new(0),
    });

    let handle = Poller::new(store.clone(), platform, resolver.clone(), PollerConfig::default())
        .spawn();

    // Wait until the sweep is blocked inside the resolver.
    tokio::time::timeout(Duration::from_secs(5), async {
        while resolver.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sweep should reach the resolver");

    let stopped = tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("poller should stop promptly");
    tokio_test::assert_ok!(stopped);
    assert_eq!(store.stats().commit_attempts(), 0);
}

#[tokio::test]
async fn removal_notification_failure_is_isolated() {
    struct RejectingPlatform {
        inner: InMemoryPlatform,
    }

    #[async_trait]
    impl AppPlatform for RejectingPlatform {
        async fn list_installations(
            &self,
            cursor: Option<&str>,
        ) -> Result<ListPage<InstallationSummary>, StorageError> {
            self.inner.list_installations(cursor).await
        }

        async fn remove_installation(&self, _id: &str) -> Result<(), StorageError> {
            Err(StorageError::http(500, "Internal Server Error"))
        }
    }

    let store = Arc::new(InMemoryStore::new());
    let inner = InMemoryPlatform::new();
    inner.upsert("drop", InstallationStatus::Uninstalled).await;
    inner.upsert("keep", InstallationStatus::Active).await;
    seed_domains(&store, "drop", &[]).await;
    seed_domains(&store, "keep", &["a.example"]).await;
    let resolver = StaticResolver::new().with_answer("a.example", &[ip("10.0.0.1")]);

    let report = poller(
        store.clone(),
        Arc::new(RejectingPlatform { inner }),
        resolver,
        PollerConfig::default(),
    )
    .sweep()
    .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.updated, 1);
    // The tombstone is in place, so the next sweep finishes the job.
    assert!(store.keys().await.contains(&tombstone_key("drop")));
    assert!(store.get(&installation_key("drop")).await.unwrap().versionstamp.is_none());
}
