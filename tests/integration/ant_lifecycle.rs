//! Ant lifecycle tests with real child processes.

use std::path::Path;
use std::time::Duration;

use antfarm::config::{AntConfig, AntSpec};
use antfarm::daemon::OUTPUT_LOG;
use antfarm::{Ant, AntStatus, Error};
use tempfile::TempDir;

use super::fixtures::{ant_config, eventually, process_alive, write_script, FakeDaemon, MockDaemon};

fn spec(config: &AntConfig, dir: &Path) -> AntSpec {
    AntSpec::resolve(0, config, dir, Path::new("siad")).expect("resolve ant")
}

#[tokio::test]
async fn test_start_and_stop() {
    // Given: A dev daemon whose API is served by the mock
    let mock = MockDaemon::start().await;
    let daemon = FakeDaemon::dev();
    let dir = TempDir::new().unwrap();
    let spec = spec(&ant_config(&mock, &daemon, &["gateway"]), dir.path());
    let data_dir = spec.data_dir.clone();

    // When: The ant starts
    let ant = Ant::start(spec).await.expect("ant starts");

    // Then: It runs its jobs against an initialised wallet
    assert_eq!(ant.status(), AntStatus::Running);
    assert_eq!(ant.running_jobs(), vec!["gateway".to_string()]);
    assert_eq!(ant.active_tasks(), 1);
    assert_eq!(mock.snapshot().wallet_inits, 1);
    assert!(data_dir.join(OUTPUT_LOG).exists());

    let pid = ant.pid().expect("daemon pid");
    assert!(process_alive(pid));

    // When: The ant stops
    ant.stop().await;

    // Then: The daemon was asked to stop and is gone
    assert_eq!(ant.status(), AntStatus::Stopped);
    assert_eq!(mock.snapshot().stop_requests, 1);
    assert_eq!(ant.active_tasks(), 0);
    assert_eq!(ant.pid(), None);
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn test_graceful_stop_within_timeout() {
    // Given: A running ant whose daemon exits when asked to
    let mock = MockDaemon::start().await;
    let daemon = FakeDaemon::dev();
    let dir = TempDir::new().unwrap();
    let config = AntConfig {
        stop_timeout: Some(Duration::from_secs(30)),
        ..ant_config(&mock, &daemon, &[])
    };
    let ant = Ant::start(spec(&config, dir.path())).await.unwrap();
    let pid = ant.pid().unwrap();
    mock.with(|s| s.kill_on_stop = Some(pid));

    // When: The ant stops
    let started = std::time::Instant::now();
    ant.stop().await;

    // Then: It did not wait for the stop timeout
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn test_stop_kills_unresponsive_daemon() {
    // Given: A daemon that ignores the stop request
    let mock = MockDaemon::start().await;
    let daemon = FakeDaemon::dev();
    let dir = TempDir::new().unwrap();
    let ant = Ant::start(spec(&ant_config(&mock, &daemon, &[]), dir.path()))
        .await
        .unwrap();
    let pid = ant.pid().unwrap();

    // When: The ant stops
    ant.stop().await;

    // Then: The process was killed after the short stop timeout
    assert_eq!(mock.snapshot().stop_requests, 1);
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let mock = MockDaemon::start().await;
    let daemon = FakeDaemon::dev();
    let dir = TempDir::new().unwrap();
    let ant = Ant::start(spec(&ant_config(&mock, &daemon, &["gateway"]), dir.path()))
        .await
        .unwrap();

    tokio::join!(ant.stop(), ant.stop());
    ant.stop().await;

    assert_eq!(ant.status(), AntStatus::Stopped);
    assert_eq!(mock.snapshot().stop_requests, 1);
}

#[tokio::test]
async fn test_release_build_is_rejected() {
    // Given: A daemon binary that is not a dev build
    let mock = MockDaemon::start().await;
    let daemon = FakeDaemon::release();
    let dir = TempDir::new().unwrap();

    // When: The ant starts
    let err = Ant::start(spec(&ant_config(&mock, &daemon, &[]), dir.path()))
        .await
        .unwrap_err();

    // Then: It fails before any wallet is touched
    assert!(matches!(err, Error::WrongBuild { .. }));
    assert_eq!(mock.snapshot().wallet_inits, 0);
}

#[tokio::test]
async fn test_missing_binary_is_rejected() {
    let mock = MockDaemon::start().await;
    let dir = TempDir::new().unwrap();
    let config = AntConfig {
        api_addr: Some(mock.addr()),
        daemon_path: Some(dir.path().join("no-such-siad")),
        ..Default::default()
    };

    let err = Ant::start(spec(&config, dir.path())).await.unwrap_err();

    assert!(matches!(err, Error::BinaryNotFound(_)));
}

#[tokio::test]
async fn test_early_exit_is_reported() {
    // Given: A daemon that exits immediately and no API to answer for it
    let daemon = FakeDaemon::exits(7);
    let dir = TempDir::new().unwrap();
    let config = AntConfig {
        daemon_path: Some(daemon.path.clone()),
        ..Default::default()
    };

    // When: The ant starts
    let err = Ant::start(spec(&config, dir.path())).await.unwrap_err();

    // Then: The exit is reported rather than waiting out the readiness timeout
    match err {
        Error::DaemonExited { status } => assert!(status.contains('7'), "status: {}", status),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_readiness_timeout_kills_daemon() {
    // Given: A daemon that never serves its API
    let daemon = FakeDaemon::dev();
    let dir = TempDir::new().unwrap();
    let config = AntConfig {
        daemon_path: Some(daemon.path.clone()),
        readiness_timeout: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let spec = spec(&config, dir.path());

    // When: The ant starts
    let err = Ant::start(spec).await.unwrap_err();

    // Then: The start times out
    assert!(matches!(err, Error::ReadinessTimeout { .. }));
}

#[tokio::test]
async fn test_spenders_default_to_own_address() {
    // Given: A funded daemon and a supplier with no configured destination
    let mock = MockDaemon::start().await;
    mock.with(|s| {
        s.balance = antfarm::api::Currency::from_coins(5_000);
        s.address = "own-address".to_string();
    });
    let daemon = FakeDaemon::dev();
    let dir = TempDir::new().unwrap();

    // When: The ant runs for a few supply intervals
    let ant = Ant::start(spec(&ant_config(&mock, &daemon, &["littlesupplier"]), dir.path()))
        .await
        .unwrap();

    // Then: Coins go back to the ant's own wallet
    assert!(eventually(Duration::from_secs(8), || !mock.snapshot().sends.is_empty()).await);
    assert_eq!(mock.snapshot().sends[0].1, "own-address");
    ant.stop().await;
}

#[tokio::test]
async fn test_desired_balance_starts_maintainer() {
    let mock = MockDaemon::start().await;
    let daemon = FakeDaemon::dev();
    let dir = TempDir::new().unwrap();
    let config = AntConfig {
        desired_balance: Some(100),
        ..ant_config(&mock, &daemon, &["gateway"])
    };

    let ant = Ant::start(spec(&config, dir.path())).await.unwrap();

    assert_eq!(
        ant.running_jobs(),
        vec!["gateway".to_string(), "balancemaintainer".to_string()]
    );
    assert!(eventually(Duration::from_secs(5), || mock.snapshot().mining).await);
    ant.stop().await;
}

#[tokio::test]
async fn test_upgrade_swaps_daemon() {
    // Given: An upgrade directory holding one newer build
    let mock = MockDaemon::start().await;
    let daemon = FakeDaemon::dev();
    let dir = TempDir::new().unwrap();
    let upgrades = dir.path().join("upgrades");
    let next = upgrades
        .join(format!(
            "1.3.8-{}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ))
        .join("siad");
    write_script(&next, "Sia Daemon v1.3.8-dev", "exec sleep 60");

    let config = AntConfig {
        upgrade_path: vec!["1.3.8".to_string()],
        upgrade_dir: Some(upgrades),
        upgrade_delay: Some(Duration::from_millis(200)),
        ..ant_config(&mock, &daemon, &[])
    };

    // When: The ant starts and the delay passes
    let ant = Ant::start(spec(&config, dir.path())).await.unwrap();
    let first = ant.pid().unwrap();

    // Then: A new daemon process replaces the old one
    assert!(
        eventually(Duration::from_secs(10), || {
            matches!(ant.pid(), Some(pid) if pid != first)
        })
        .await
    );
    assert!(!process_alive(first));
    assert!(mock.snapshot().stop_requests >= 1);

    ant.stop().await;
    assert_eq!(ant.status(), AntStatus::Stopped);
}
