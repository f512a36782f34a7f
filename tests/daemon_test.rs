//! End-to-end daemon tests on paused time

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use common::{test_config, FakeCluster, NodeBehavior, RecordingChannel, SwitchableDiscovery};
use vault_unseal::daemon::Daemon;
use vault_unseal::error::Error;

fn spawn_daemon(
    daemon: Daemon,
) -> (
    oneshot::Sender<()>,
    tokio::task::JoinHandle<vault_unseal::error::Result<()>>,
) {
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(daemon.run(async move {
        let _ = rx.await;
    }));
    (tx, handle)
}

#[tokio::test(start_paused = true)]
async fn test_every_emitted_event_is_flushed_by_shutdown() {
    let api = Arc::new(FakeCluster::default().with_node("http://a:8200", NodeBehavior::Failing));
    let channel = RecordingChannel::default();

    let daemon = Daemon::new(test_config(&["http://a:8200"]))
        .with_seal_api(api.clone())
        .with_channel(Box::new(channel.clone()));
    let (shutdown, handle) = spawn_daemon(daemon);

    // Checks at 10s and 50s; the second event is still queued at 55s.
    tokio::time::sleep(Duration::from_secs(55)).await;
    assert_eq!(api.total_checks(), 2);
    assert_eq!(channel.reports().len(), 1);

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();

    let reports = channel.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(channel.event_total(), api.total_checks());
    assert!(reports[0].subject.starts_with("vault-unseal: test: 1 errors"));
}

#[tokio::test(start_paused = true)]
async fn test_no_checks_after_shutdown() {
    let api = Arc::new(FakeCluster::default());
    let mut config = test_config(&["http://a:8200", "http://b:8200"]);
    config.notifications.enabled = false;

    let (shutdown, handle) = spawn_daemon(Daemon::new(config).with_seal_api(api.clone()));

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(api.checks("http://a:8200"), 2);
    assert_eq!(api.checks("http://b:8200"), 2);

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();

    let total = api.total_checks();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(api.total_checks(), total);
}

#[tokio::test(start_paused = true)]
async fn test_initial_discovery_failure_is_fatal() {
    let discovery = Arc::new(SwitchableDiscovery::default());
    let channel = RecordingChannel::default();

    let result = Daemon::new(test_config(&[]))
        .with_seal_api(Arc::new(FakeCluster::default()))
        .with_discovery(discovery, Duration::from_millis(7500))
        .with_channel(Box::new(channel.clone()))
        .run(std::future::pending())
        .await;

    assert!(matches!(result, Err(Error::Discovery(_))));
    assert!(channel.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_discovery_changes_reach_the_worker_set() {
    let api = Arc::new(FakeCluster::default());
    let discovery = Arc::new(SwitchableDiscovery::default());
    discovery.set(&["http://a:8200"]);

    let daemon = Daemon::new(test_config(&[]))
        .with_seal_api(api.clone())
        .with_discovery(discovery.clone(), Duration::from_millis(7500));
    let (shutdown, handle) = spawn_daemon(daemon);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(api.checks("http://a:8200"), 1);
    assert_eq!(api.checks("http://b:8200"), 0);

    // Picked up on the 15s tick, first check 10s later.
    discovery.set(&["http://a:8200", "http://b:8200"]);
    tokio::time::sleep(Duration::from_secs(19)).await;
    assert_eq!(api.checks("http://b:8200"), 1);

    // Dropped on the 37.5s tick.
    discovery.set(&["http://a:8200"]);
    tokio::time::sleep(Duration::from_secs(10)).await;
    let b_checks = api.checks("http://b:8200");
    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(api.checks("http://b:8200"), b_checks);

    // A was never restarted: one check every 10s since start.
    assert_eq!(api.checks("http://a:8200"), 10);

    shutdown.send(()).unwrap();
    handle.await.unwrap().unwrap();
}
