//! Job behaviour against a mock daemon API.

use std::path::Path;
use std::time::{Duration, Instant};

use antfarm::api::Currency;
use antfarm::jobs::{
    BalanceMaintainer, GatewayJob, HostJob, JobArgs, JobRunner, RenterJob, RenterSettings, Spender,
};
use antfarm::{Error, NodeClient, TaskGroup};
use tempfile::TempDir;

use super::fixtures::{eventually, MockDaemon, MOCK_SEED};

async fn runner_for(mock: &MockDaemon, dir: &TempDir, group: &TaskGroup) -> JobRunner {
    JobRunner::initialize(
        "test-ant",
        NodeClient::new(&mock.addr()).unwrap(),
        dir.path(),
        group.clone(),
    )
    .await
    .expect("initialize runner")
}

#[tokio::test]
async fn test_initialize_creates_and_unlocks_wallet() {
    // Given: A fresh daemon
    let mock = MockDaemon::start().await;
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();

    // When: A runner is initialised against it
    let runner = runner_for(&mock, &dir, &group).await;

    // Then: The wallet was created once and unlocked with its seed
    let state = mock.snapshot();
    assert_eq!(state.wallet_inits, 1);
    assert_eq!(state.unlock_passwords, vec![MOCK_SEED.to_string()]);
    assert_eq!(runner.context().wallet_password, MOCK_SEED);
    assert!(runner.started_jobs().is_empty());
}

#[tokio::test]
async fn test_supplier_sends_to_destination() {
    // Given: A funded wallet
    let mock = MockDaemon::start().await;
    mock.with(|s| s.balance = Currency::from_coins(10_000));
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    // When: A fast spender runs
    let job = Spender::little("friend-address".to_string()).with_interval(Duration::from_millis(20));
    runner.spawn_job(Box::new(job)).unwrap();

    // Then: Coins arrive at the destination in fixed amounts
    assert!(eventually(Duration::from_secs(5), || mock.snapshot().sends.len() >= 2).await);
    group.stop().await.unwrap();

    let state = mock.snapshot();
    for (amount, destination) in &state.sends {
        assert_eq!(*amount, Currency::from_coins(1_000));
        assert_eq!(destination, "friend-address");
    }
    assert_eq!(runner.started_jobs(), vec!["littlesupplier".to_string()]);
}

#[tokio::test]
async fn test_spender_skips_when_balance_is_short() {
    // Given: A wallet holding less than one payment
    let mock = MockDaemon::start().await;
    mock.with(|s| s.balance = Currency::from_coins(10));
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    // When: The spender runs for a while
    let job = Spender::big("friend-address".to_string()).with_interval(Duration::from_millis(10));
    runner.spawn_job(Box::new(job)).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Then: Nothing was sent and the job is still alive
    assert!(mock.snapshot().sends.is_empty());
    assert_eq!(group.active_count(), 1);
    group.stop().await.unwrap();
    assert_eq!(group.active_count(), 0);
}

#[tokio::test]
async fn test_balance_maintainer_toggles_miner() {
    // Given: A poor wallet and a target balance
    let mock = MockDaemon::start().await;
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    let job = BalanceMaintainer::new(Currency::from_coins(100)).with_interval(Duration::from_millis(20));
    runner.spawn_job(Box::new(job)).unwrap();

    // Then: Mining starts right away
    assert!(eventually(Duration::from_secs(5), || mock.snapshot().mining).await);

    // When: The balance climbs above the target
    mock.with(|s| s.balance = Currency::from_coins(500));

    // Then: Mining stops
    assert!(eventually(Duration::from_secs(5), || !mock.snapshot().mining).await);
    assert!(mock.snapshot().miner_stops >= 1);

    // When: The balance drops again
    mock.with(|s| s.balance = Currency::from_coins(1));

    // Then: Mining resumes
    assert!(eventually(Duration::from_secs(5), || mock.snapshot().miner_starts >= 2).await);
    group.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_job_starts_nothing() {
    let mock = MockDaemon::start().await;
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    let err = runner.start_job("juggler", &JobArgs::default()).unwrap_err();

    assert!(matches!(err, Error::UnknownJob(ref name) if name == "juggler"));
    assert_eq!(group.active_count(), 0);
    assert!(runner.started_jobs().is_empty());
}

#[tokio::test]
async fn test_stop_interrupts_long_waits() {
    // Given: Jobs parked in long sleeps
    let mock = MockDaemon::start().await;
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    runner
        .spawn_job(Box::new(GatewayJob::new().with_interval(Duration::from_secs(600))))
        .unwrap();
    runner
        .spawn_job(Box::new(
            Spender::big("x".to_string()).with_interval(Duration::from_secs(600)),
        ))
        .unwrap();
    assert_eq!(group.active_count(), 2);

    // When: The group stops
    let started = Instant::now();
    group.stop().await.unwrap();

    // Then: Both jobs exit promptly
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(group.active_count(), 0);

    // And: No more jobs may start
    let err = runner
        .spawn_job(Box::new(GatewayJob::new()))
        .unwrap_err();
    assert!(matches!(err, Error::Stopped));
}

fn source_files(dir: &Path) -> usize {
    std::fs::read_dir(dir.join("renterSourceFiles"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

fn quick_renter() -> RenterSettings {
    RenterSettings {
        balance_poll: Duration::from_millis(20),
        allowance: Currency::from_coins(500),
        allowance_period: 10,
        allowance_retry: Duration::from_millis(20),
        upload_interval: Duration::from_millis(30),
        download_interval: Duration::from_millis(50),
        delete_interval: Duration::from_secs(600),
        upload_size: 4096,
        upload_poll: Duration::from_millis(10),
        upload_timeout: Duration::from_secs(5),
        download_poll: Duration::from_millis(10),
        queue_timeout: Duration::from_secs(5),
        download_timeout: Duration::from_secs(5),
        ..RenterSettings::default()
    }
}

#[tokio::test]
async fn test_renter_uploads_downloads_and_cleans_up() {
    // Given: A renter with enough coins and fast chores
    let mock = MockDaemon::start().await;
    mock.with(|s| s.balance = Currency::from_coins(150_000));
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    // When: The renter job runs
    runner
        .spawn_job(Box::new(RenterJob::with_settings(quick_renter())))
        .unwrap();

    // Then: It buys an allowance and completes uploads and a download
    assert!(
        eventually(Duration::from_secs(10), || {
            let state = mock.snapshot();
            state.uploads.len() >= 2 && !state.downloads.is_empty()
        })
        .await
    );
    let state = mock.snapshot();
    assert_eq!(state.allowance, Some((Currency::from_coins(500), 10)));
    for (siapath, source) in &state.uploads {
        assert!(source.ends_with(siapath.as_str()));
        assert!(source.contains("renterSourceFiles"));
    }
    assert!(state.deletes.is_empty());
    assert!(source_files(dir.path()) >= 2);

    // When: The group stops
    group.stop().await.unwrap();

    // Then: Every upload source is gone
    assert_eq!(source_files(dir.path()), 0);
    assert_eq!(group.active_count(), 0);
}

#[tokio::test]
async fn test_renter_deletes_once_threshold_reached() {
    // Given: A renter that deletes as soon as two files are tracked
    let mock = MockDaemon::start().await;
    mock.with(|s| s.balance = Currency::from_coins(100_000));
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    let settings = RenterSettings {
        download_interval: Duration::from_secs(600),
        delete_interval: Duration::from_millis(40),
        delete_threshold: 2,
        ..quick_renter()
    };
    runner
        .spawn_job(Box::new(RenterJob::with_settings(settings)))
        .unwrap();

    // When: Enough files have been uploaded
    assert!(eventually(Duration::from_secs(10), || !mock.snapshot().deletes.is_empty()).await);
    group.stop().await.unwrap();

    // Then: Deleted files are gone from the daemon and were uploaded before
    let state = mock.snapshot();
    for deleted in &state.deletes {
        assert!(state.uploads.iter().any(|(siapath, _)| siapath == deleted));
        assert!(state.files.iter().all(|f| &f.siapath != deleted));
    }
    assert_eq!(source_files(dir.path()), 0);
}

#[tokio::test]
async fn test_renter_waits_for_funds() {
    // Given: A renter whose wallet is short
    let mock = MockDaemon::start().await;
    mock.with(|s| s.balance = Currency::from_coins(10));
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    runner
        .spawn_job(Box::new(RenterJob::with_settings(quick_renter())))
        .unwrap();

    // When: Time passes without funding
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Then: No allowance is bought and nothing is uploaded
    let state = mock.snapshot();
    assert!(state.allowance.is_none());
    assert!(state.uploads.is_empty());
    group.stop().await.unwrap();
}

#[tokio::test]
async fn test_host_announces_and_watches_revenue() {
    // Given: A funded wallet whose first announcement is rejected
    let mock = MockDaemon::start().await;
    mock.with(|s| {
        s.balance = Currency::from_coins(60_000);
        s.failing_announces = 1;
        s.storage_revenue = Currency::from_coins(3);
    });
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    // When: A fast host job runs
    let job = HostJob::new()
        .with_funding(Duration::from_millis(10), Duration::from_secs(5))
        .with_announce_backoff(Duration::from_millis(10))
        .with_interval(Duration::from_millis(20));
    runner.spawn_job(Box::new(job)).unwrap();

    // Then: It offers storage, retries the announcement and starts checking revenue
    assert!(
        eventually(Duration::from_secs(5), || {
            let state = mock.snapshot();
            state.accepting_contracts && state.host_reads >= 2
        })
        .await
    );
    let state = mock.snapshot();
    assert_eq!(state.announces, 2);
    assert_eq!(state.storage_folders.len(), 1);
    let folder = state.storage_folders[0].clone();
    assert!(Path::new(&folder).is_dir());

    // When: The group stops
    group.stop().await.unwrap();

    // Then: The temporary storage folder is removed with the job
    assert!(!Path::new(&folder).exists());
}

#[tokio::test]
async fn test_host_gives_up_without_funds() {
    // Given: A wallet that never reaches the hosting target
    let mock = MockDaemon::start().await;
    mock.with(|s| s.balance = Currency::from_coins(50_000));
    let dir = TempDir::new().unwrap();
    let group = TaskGroup::new();
    let runner = runner_for(&mock, &dir, &group).await;

    // When: The host job's funding wait times out
    let job = HostJob::new().with_funding(Duration::from_millis(10), Duration::from_millis(100));
    runner.spawn_job(Box::new(job)).unwrap();

    // Then: The job exits without offering storage
    assert!(eventually(Duration::from_secs(5), || group.active_count() == 0).await);
    let state = mock.snapshot();
    assert!(state.storage_folders.is_empty());
    assert_eq!(state.announces, 0);
    group.stop().await.unwrap();
}
