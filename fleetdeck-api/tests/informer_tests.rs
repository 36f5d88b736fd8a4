//! Cluster cache and informer manager behaviour against in-memory clusters

mod common;

use common::*;
use fleetdeck_api::kubernetes::types::CacheStatus;
use fleetdeck_api::kubernetes::{
    ClusterDirectory, InMemoryClusterDirectory, K8sError, KindState, ResourceKind,
    SnapshotAggregator,
};
use fleetdeck_common::ClusterId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_concurrent_ensure_creates_one_cache() {
    let factory = CountingFactory::with_delay(Duration::from_millis(100));
    factory.register(FakeCluster::new("c1"));
    let manager = manager(factory.clone());
    let record = record("c1");

    let (a, b) = tokio::join!(
        manager.ensure_for_cluster(&record),
        manager.ensure_for_cluster(&record)
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(factory.connects(), 1);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ten_waiters_share_one_sync() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = Arc::new(manager(factory.clone()));

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let manager = manager.clone();
        waiters.push(tokio::spawn(async move {
            manager
                .ensure_and_wait(&record("c1"), Duration::from_secs(5), &CancellationToken::new())
                .await
        }));
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    cluster.sync_required();

    let mut caches = Vec::new();
    for waiter in waiters {
        caches.push(waiter.await.unwrap().expect("waiter should see the cache ready"));
    }
    assert!(caches.iter().all(|c| Arc::ptr_eq(c, &caches[0])));
    assert_eq!(factory.connects(), 1);
    assert_eq!(cluster.nodes.opens(), 1);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_on_fresh_cache_is_not_ready() {
    let factory = CountingFactory::new();
    factory.register(FakeCluster::new("c1"));
    let manager = manager(factory);

    let cache = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let err = cache
        .wait_ready(Duration::ZERO, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        K8sError::NotReady { cluster_id, pending } => {
            assert_eq!(cluster_id, "c1");
            assert!(pending.contains("node"));
        }
        other => panic!("expected NotReady, got {:?}", other),
    }
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_ready_does_not_restart_cache() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = manager(factory.clone());

    let cache = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    assert!(cache.wait_ready(Duration::from_secs(1), &CancellationToken::new()).await.is_err());

    cluster.sync_required();
    cache
        .wait_ready(Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();
    cache.start().await.unwrap();

    assert_eq!(cache.status(), CacheStatus::Ready);
    assert_eq!(cluster.nodes.opens(), 1);
    assert_eq!(factory.connects(), 1);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_releases_listers() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = manager(factory);
    let id = ClusterId::from("c1");

    cluster.nodes.sync(vec![node("n1", true)]);
    cluster.pods.sync(vec![]);
    cluster.deployments.sync(vec![]);
    let cache = manager
        .ensure_and_wait(&record("c1"), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(manager.nodes_lister(&id).len(), 1);

    manager.stop_for_cluster(&id).await;
    manager.stop_for_cluster(&id).await;
    cache.stop().await;

    assert!(!manager.is_registered(&id));
    assert!(cache.is_stopped());
    assert_eq!(cache.status(), CacheStatus::Stopped);
    assert_eq!(cache.kind_state(ResourceKind::Node), KindState::Stopped);
    assert!(!cache.nodes().is_available());
    assert!(!manager.nodes_lister(&id).is_available());
    assert!(matches!(
        cache.wait_ready(Duration::from_secs(1), &CancellationToken::new()).await,
        Err(K8sError::Stopped(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_unknown_cluster_is_noop() {
    let manager = manager(CountingFactory::new());
    manager.stop_for_cluster(&ClusterId::from("never-seen")).await;
    assert!(manager.cluster_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_rollout_crd_does_not_block_readiness() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::without_rollouts("c1");
    factory.register(cluster.clone());
    let manager = manager(factory);
    let id = ClusterId::from("c1");

    cluster.sync_required();
    let cache = manager
        .ensure_and_wait(&record("c1"), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(cache.kind_state(ResourceKind::Rollout), KindState::Unavailable);
    assert_eq!(cluster.rollouts.opens(), 0);
    assert!(!manager.rollouts_lister(&id).is_available());

    let snapshot = SnapshotAggregator::from_cache(&cache);
    assert!(snapshot.rollouts.is_none());
    assert!(snapshot.omitted.contains(&ResourceKind::Rollout));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rollouts_listed_when_crd_installed() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = manager(factory);
    let id = ClusterId::from("c1");

    cluster.sync_required();
    cluster.rollouts.sync(vec![rollout("shop", "checkout", 3, 3)]);
    let cache = manager
        .ensure_and_wait(&record("c1"), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();

    let mut rollouts = cache.subscribe(ResourceKind::Rollout);
    rollouts.wait_for(|s| *s == KindState::Ready).await.unwrap();

    let lister = manager.rollouts_lister(&id);
    assert_eq!(lister.len(), 1);
    assert!(lister.get(Some("shop"), "checkout").is_some());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_leaves_no_entry() {
    let factory = CountingFactory::new();
    let manager = manager(factory.clone());
    let id = ClusterId::from("unreachable");

    let err = manager.ensure_for_cluster(&record("unreachable")).await.unwrap_err();
    assert!(matches!(err, K8sError::Connection { .. }));
    assert!(!manager.is_registered(&id));

    // Not cached: the next call dials again
    assert!(manager.ensure_for_cluster(&record("unreachable")).await.is_err());
    assert_eq!(factory.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failing_optional_kind_does_not_block() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = manager(factory);

    let cache = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let mut jobs = cache.subscribe(ResourceKind::Job);
    for _ in 0..3 {
        cluster.jobs.fail("forbidden");
    }
    jobs.wait_for(|s| *s == KindState::Failed).await.unwrap();

    cluster.sync_required();
    cache
        .wait_ready(Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(cache.status(), CacheStatus::Ready);
    assert!(!cache.jobs().is_available());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_required_kind_reports_failed() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = manager(factory);

    let cache = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let mut nodes = cache.subscribe(ResourceKind::Node);
    for _ in 0..3 {
        cluster.nodes.fail("connection reset");
    }
    nodes.wait_for(|s| *s == KindState::Failed).await.unwrap();
    cluster.pods.sync(vec![]);
    cluster.deployments.sync(vec![]);

    let err = cache
        .wait_ready(Duration::from_secs(2), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, K8sError::NotReady { ref pending, .. } if pending == "node"));
    assert_eq!(cache.status(), CacheStatus::Failed);
    assert!(!cache.readiness().ready);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait() {
    let factory = CountingFactory::new();
    factory.register(FakeCluster::new("c1"));
    let manager = manager(factory);
    let cancel = CancellationToken::new();

    let cache = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let waiter = {
        let cache = cache.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { cache.wait_ready(Duration::from_secs(30), &cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    assert!(matches!(waiter.await.unwrap(), Err(K8sError::Cancelled(_))));
    assert!(!cache.is_stopped());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_waiting_returns_stopped() {
    let factory = CountingFactory::new();
    factory.register(FakeCluster::new("c1"));
    let manager = Arc::new(manager(factory));

    let cache = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let waiter = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .wait_ready(Duration::from_secs(30), &CancellationToken::new())
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.stop_for_cluster(&ClusterId::from("c1")).await;
    assert!(matches!(waiter.await.unwrap(), Err(K8sError::Stopped(_))));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_creation_discards_cache() {
    let factory = CountingFactory::with_delay(Duration::from_secs(1));
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = Arc::new(manager(factory.clone()));
    let id = ClusterId::from("c1");

    let creating = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.ensure_for_cluster(&record("c1")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.is_registered(&id));

    manager.stop_for_cluster(&id).await;
    assert!(matches!(creating.await.unwrap(), Err(K8sError::Stopped(_))));
    assert!(!manager.is_registered(&id));
    assert!(manager.get(&id).is_none());
    assert_eq!(factory.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_from_synced_cache() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = manager(factory);

    cluster.nodes.sync(vec![node("n1", true), node("n2", true)]);
    cluster.pods.sync(vec![
        pod("default", "web-1", "Running", true),
        pod("default", "web-2", "Running", true),
        pod("default", "web-3", "Pending", false),
    ]);
    cluster.deployments.sync(vec![]);

    let cache = manager
        .ensure_and_wait(&record("c1"), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();

    let json = serde_json::to_value(SnapshotAggregator::from_cache(&cache)).unwrap();
    assert_eq!(json["clusterId"], "c1");
    assert_eq!(json["nodeCount"], 2);
    assert_eq!(json["readyNodes"], 2);
    assert_eq!(json["podCount"], 3);
    assert_eq!(json["readyPods"], 2);
    assert_eq!(json["health"], "degraded");
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rotate_credentials_replaces_cache() {
    let factory = CountingFactory::new();
    factory.register(FakeCluster::new("c1"));
    let manager = manager(factory.clone());

    let old = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    factory.register(FakeCluster::new("c1"));
    let new = manager.rotate_credentials(&record("c1")).await.unwrap();

    assert!(!Arc::ptr_eq(&old, &new));
    assert!(old.is_stopped());
    assert!(!new.is_stopped());
    assert_eq!(factory.connects(), 2);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sweep_stops_deregistered_clusters() {
    let factory = CountingFactory::new();
    factory.register(FakeCluster::new("c1"));
    factory.register(FakeCluster::new("c2"));
    let directory = InMemoryClusterDirectory::new();
    directory.insert(record("c1")).await;
    directory.insert(record("c2")).await;
    let manager = manager(factory);

    manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let c2 = manager.ensure_for_cluster(&record("c2")).await.unwrap();

    directory.remove(&ClusterId::from("c2")).await;
    let stopped = manager.sweep_once(&directory).await.unwrap();

    assert_eq!(stopped, vec![ClusterId::from("c2")]);
    assert!(c2.is_stopped());
    assert!(manager.is_registered(&ClusterId::from("c1")));
    assert!(!manager.is_registered(&ClusterId::from("c2")));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_spawned_sweeper_runs_on_interval() {
    let factory = CountingFactory::new();
    factory.register(FakeCluster::new("c1"));
    let directory = Arc::new(InMemoryClusterDirectory::new());
    directory.insert(record("c2")).await;
    let manager = Arc::new(manager(factory));
    let shutdown = CancellationToken::new();

    manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let sweeper = manager.spawn_sweeper(
        directory.clone() as Arc<dyn ClusterDirectory>,
        Duration::from_secs(60),
        shutdown.clone(),
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(manager.is_registered(&ClusterId::from("c1")));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!manager.is_registered(&ClusterId::from("c1")));

    shutdown.cancel();
    sweeper.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_ensure_by_id_uses_directory() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let directory = Arc::new(InMemoryClusterDirectory::new());
    directory.insert(record("c1")).await;

    let bare = manager(factory.clone());
    assert!(matches!(
        bare.ensure_and_wait_by_id(&ClusterId::from("c1"), Duration::ZERO, &CancellationToken::new())
            .await,
        Err(K8sError::Internal(_))
    ));

    let manager = manager(factory).with_directory(directory);
    assert!(matches!(
        manager
            .ensure_and_wait_by_id(&ClusterId::from("nope"), Duration::ZERO, &CancellationToken::new())
            .await,
        Err(K8sError::ClusterNotFound(_))
    ));

    cluster.sync_required();
    let cache = manager
        .ensure_and_wait_by_id(&ClusterId::from("c1"), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();
    assert!(cache.is_ready());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_cache() {
    let factory = CountingFactory::new();
    factory.register(FakeCluster::new("c1"));
    factory.register(FakeCluster::new("c2"));
    let manager = manager(factory);

    let c1 = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let c2 = manager.ensure_for_cluster(&record("c2")).await.unwrap();
    manager.shutdown().await;

    assert!(c1.is_stopped() && c2.is_stopped());
    assert!(manager.cluster_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_crd_discovery_does_not_delay_readiness() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::with_discovery("c1", Discovery::Hangs);
    factory.register(cluster.clone());
    let manager = manager(factory);

    cluster.sync_required();
    let started = Instant::now();
    let cache = manager
        .ensure_and_wait(&record("c1"), Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(cache.readiness().ready);
    assert_eq!(cluster.nodes.opens(), 1);
    assert_eq!(cluster.rollouts.opens(), 0);

    // Stop cancels the pending discovery
    manager.shutdown().await;
    assert!(cache.is_stopped());
    assert_eq!(cache.kind_state(ResourceKind::Rollout), KindState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_failing_crd_discovery_marks_rollouts_unavailable() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::with_discovery("c1", Discovery::Fails);
    factory.register(cluster.clone());
    let manager = manager(factory);

    cluster.sync_required();
    let cache = manager
        .ensure_and_wait(&record("c1"), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();

    let mut rollouts = cache.subscribe(ResourceKind::Rollout);
    rollouts
        .wait_for(|s| *s == KindState::Unavailable)
        .await
        .unwrap();
    assert!(cache.readiness().ready);
    assert_eq!(cluster.rollouts.opens(), 0);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_slow_connect_returns_promptly() {
    let factory = CountingFactory::with_delay(Duration::from_secs(60));
    factory.register(FakeCluster::new("c1"));
    let manager = Arc::new(manager(factory.clone()));
    let cancel = CancellationToken::new();

    let waiter = {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            manager
                .ensure_and_wait(&record("c1"), Duration::from_secs(120), &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    cancel.cancel();
    assert!(matches!(waiter.await.unwrap(), Err(K8sError::Cancelled(_))));
    assert!(started.elapsed() < Duration::from_secs(1));

    // The creation itself is left running for other callers
    assert!(manager.is_registered(&ClusterId::from("c1")));
    assert_eq!(factory.connects(), 1);
    manager.shutdown().await;
    assert!(!manager.is_registered(&ClusterId::from("c1")));
}

#[tokio::test(start_paused = true)]
async fn test_slow_connect_is_bounded_by_timeout() {
    let factory = CountingFactory::with_delay(Duration::from_secs(10));
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = manager(factory.clone());
    let id = ClusterId::from("c1");

    let started = Instant::now();
    let err = manager
        .ensure_and_wait(&record("c1"), Duration::from_secs(1), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    match err {
        K8sError::NotReady { pending, .. } => assert!(pending.contains("node")),
        other => panic!("expected NotReady, got {:?}", other),
    }

    // Still connecting: registered and reported as pending
    let readiness = manager.readiness(&id).unwrap();
    assert_eq!(readiness.status, CacheStatus::Pending);
    assert!(manager.get(&id).is_none());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(manager.get(&id).is_some());
    assert_eq!(factory.connects(), 1);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_connection_failure() {
    let factory = CountingFactory::with_delay(Duration::from_millis(100));
    factory.register(FakeCluster::new("c1"));
    factory.refuse_next(1);
    let manager = manager(factory.clone());
    let id = ClusterId::from("c1");

    let (record_a, record_b) = (record("c1"), record("c1"));
    let (first, second) = tokio::join!(
        manager.ensure_for_cluster(&record_a),
        manager.ensure_for_cluster(&record_b),
    );
    assert!(matches!(first, Err(K8sError::Connection { .. })));
    assert!(matches!(second, Err(K8sError::Connection { .. })));
    assert_eq!(factory.connects(), 1);
    assert!(!manager.is_registered(&id));

    // The failed attempt is forgotten and the next call dials again
    let cache = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    assert!(!cache.is_stopped());
    assert_eq!(factory.connects(), 2);
    assert!(manager.is_registered(&id));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_crashed_required_watch_is_not_ready() {
    let factory = CountingFactory::new();
    let cluster = FakeCluster::new("c1");
    factory.register(cluster.clone());
    let manager = manager(factory);

    cluster.nodes.crash_on_open();
    cluster.pods.sync(vec![]);
    cluster.deployments.sync(vec![]);

    let started = Instant::now();
    let err = manager
        .ensure_and_wait(&record("c1"), Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    match err {
        K8sError::NotReady { pending, .. } => assert!(pending.contains("node")),
        other => panic!("expected NotReady, got {:?}", other),
    }
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_empty_directory_skips_sweep() {
    let factory = CountingFactory::new();
    factory.register(FakeCluster::new("c1"));
    let directory = InMemoryClusterDirectory::new();
    let manager = manager(factory);

    let cache = manager.ensure_for_cluster(&record("c1")).await.unwrap();
    let stopped = manager.sweep_once(&directory).await.unwrap();

    assert!(stopped.is_empty());
    assert!(!cache.is_stopped());
    assert!(manager.is_registered(&ClusterId::from("c1")));
    manager.shutdown().await;
}
