//! Consensus group detection against live daemon APIs.

use std::sync::Arc;

use antfarm::farm::{consensus_groups, SyncReport};
use antfarm::{AntHandle, Error};

use super::fixtures::MockDaemon;

async fn mocks(n: usize) -> Vec<MockDaemon> {
    let mut mocks = Vec::with_capacity(n);
    for _ in 0..n {
        mocks.push(MockDaemon::start().await);
    }
    mocks
}

fn handles(mocks: &[MockDaemon]) -> Vec<Arc<AntHandle>> {
    mocks
        .iter()
        .enumerate()
        .map(|(i, mock)| {
            Arc::new(AntHandle::new(&format!("ant-{}", i), &mock.addr(), "127.0.0.1:1", false).unwrap())
        })
        .collect()
}

fn advance(mock: &MockDaemon, chain: &str) {
    mock.with(|s| {
        s.height += 1;
        s.chain = chain.to_string();
    });
}

fn names(group: &[Arc<AntHandle>]) -> Vec<&str> {
    group.iter().map(|a| a.name()).collect()
}

#[tokio::test]
async fn test_agreeing_ants_form_one_group() {
    let mocks = mocks(3).await;
    let ants = handles(&mocks);

    let groups = consensus_groups(&ants, 8).await.unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(names(&groups[0]), vec!["ant-0", "ant-1", "ant-2"]);
    for ant in &ants {
        assert_eq!(ant.height().await, Some(10));
    }
}

#[tokio::test]
async fn test_fork_splits_once_deeper_than_window() {
    // Given: Three ants that agree at height 10
    let mocks = mocks(3).await;
    let ants = handles(&mocks);
    assert_eq!(consensus_groups(&ants, 2).await.unwrap().len(), 1);

    // When: One ant forks at height 11
    advance(&mocks[0], "main");
    advance(&mocks[1], "main");
    advance(&mocks[2], "fork");

    // Then: Shared history at 10 still holds them together
    assert_eq!(consensus_groups(&ants, 2).await.unwrap().len(), 1);

    // When: The fork grows past the window
    advance(&mocks[0], "main");
    advance(&mocks[1], "main");
    advance(&mocks[2], "fork");

    // Then: The forked ant stands alone
    let groups = consensus_groups(&ants, 2).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(names(&groups[0]), vec!["ant-0", "ant-1"]);
    assert_eq!(names(&groups[1]), vec!["ant-2"]);

    let report = SyncReport::from_groups(&groups).await;
    assert!(!report.is_synced());
    assert_eq!(report.ant_count(), 3);
    assert_eq!(report.group_of("ant-2"), Some(1));
    assert_eq!(report.groups[1][0].height, Some(12));
}

#[tokio::test]
async fn test_lagging_ant_stays_with_its_chain() {
    // Given: Ants that agree at height 10
    let mocks = mocks(2).await;
    let ants = handles(&mocks);
    consensus_groups(&ants, 8).await.unwrap();

    // When: Only one ant keeps mining
    advance(&mocks[0], "main");
    advance(&mocks[0], "main");

    // Then: The laggard is compared at its own tip and still agrees
    let groups = consensus_groups(&ants, 8).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(ants[0].height().await, Some(12));
    assert_eq!(ants[1].height().await, Some(10));
}

#[tokio::test]
async fn test_unreachable_ant_fails_round() {
    // Given: One ant whose API errors
    let mocks = mocks(3).await;
    mocks[1].with(|s| s.fail_consensus = true);
    let ants = handles(&mocks);

    // When: A round runs
    let err = consensus_groups(&ants, 8).await.unwrap_err();

    // Then: The round fails but the others' observations are kept
    assert!(matches!(err, Error::Api { status: 500, .. }));
    assert_eq!(ants[0].height().await, Some(10));
    assert_eq!(ants[1].height().await, None);
    assert_eq!(ants[2].height().await, Some(10));
}
