//! Consensus group detection.
//!
//! Each poll records every ant's `(height, block id)` into its
//! [`SeenBlocks`]. Ants are then grouped: an ant joins the first group that
//! has a member agreeing with it on the block at some height within the
//! look-back window below the lower of the two tips. Ants that match no
//! group start their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::ant::AntHandle;
use crate::api::BlockId;
use crate::Result;

/// Block ids observed for one ant, keyed by height.
///
/// Grows for the life of the ant. A later poll that sees a different block
/// at a recorded height overwrites it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenBlocks {
    blocks: BTreeMap<u64, BlockId>,
}

impl SeenBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, height: u64, id: BlockId) {
        self.blocks.insert(height, id);
    }

    pub fn get(&self, height: u64) -> Option<&BlockId> {
        self.blocks.get(&height)
    }

    /// Highest recorded height.
    pub fn tip(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Whether `a` and `b` recorded the same block at some height in the
/// `window` heights ending at the lower of their tips.
fn shares_history(a: &SeenBlocks, b: &SeenBlocks, window: u64) -> bool {
    let (Some(tip_a), Some(tip_b)) = (a.tip(), b.tip()) else {
        return false;
    };
    let top = tip_a.min(tip_b);
    (0..window)
        .map_while(|back| top.checked_sub(back))
        .any(|height| match (a.get(height), b.get(height)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        })
}

/// Partition `histories` into consensus groups, as indices into the slice.
///
/// Groups keep the order in which their first member appears, and members
/// keep input order.
pub fn group_histories(histories: &[&SeenBlocks], window: u64) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (index, history) in histories.iter().enumerate() {
        let home = groups.iter().position(|group| {
            group
                .iter()
                .any(|&member| shares_history(history, histories[member], window))
        });
        match home {
            Some(g) => groups[g].push(index),
            None => groups.push(vec![index]),
        }
    }
    groups
}

/// Poll every ant, record what it reports and group the ants.
///
/// Observations from ants that answered are recorded even when another ant
/// fails, but any failure fails the whole round.
pub async fn consensus_groups(
    ants: &[Arc<AntHandle>],
    window: u64,
) -> Result<Vec<Vec<Arc<AntHandle>>>> {
    let polls = join_all(ants.iter().map(|ant| ant.client().consensus())).await;

    let mut first_error = None;
    for (ant, poll) in ants.iter().zip(polls) {
        match poll {
            Ok(info) => ant.record_block(info.height, info.currentblock).await,
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let mut snapshots = Vec::with_capacity(ants.len());
    for ant in ants {
        snapshots.push(ant.seen_blocks().await);
    }
    let refs: Vec<&SeenBlocks> = snapshots.iter().collect();

    Ok(group_histories(&refs, window)
        .into_iter()
        .map(|group| group.into_iter().map(|i| Arc::clone(&ants[i])).collect())
        .collect())
}

/// One ant's place in a [`SyncReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub name: String,
    pub api_addr: String,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub height: Option<u64>,
}

/// Result of one monitor round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub checked_at: DateTime<Utc>,
    pub groups: Vec<Vec<GroupMember>>,
}

impl SyncReport {
    pub async fn from_groups(groups: &[Vec<Arc<AntHandle>>]) -> Self {
        let mut report = Vec::with_capacity(groups.len());
        for group in groups {
            let mut members = Vec::with_capacity(group.len());
            for ant in group {
                members.push(GroupMember {
                    name: ant.name().to_string(),
                    api_addr: ant.api_addr().to_string(),
                    external: ant.is_external(),
                    height: ant.seen_blocks().await.tip(),
                });
            }
            report.push(members);
        }
        Self {
            checked_at: Utc::now(),
            groups: report,
        }
    }

    /// Every ant is in one group.
    pub fn is_synced(&self) -> bool {
        self.groups.len() == 1
    }

    pub fn ant_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Index of the group containing the ant named `name`.
    pub fn group_of(&self, name: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|group| group.iter().any(|m| m.name == name))
    }
}
