use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{Job, JobContext, HOST};
use crate::api::{
    Currency, HostContract, OBLIGATION_FAILED, OBLIGATION_REJECTED, OBLIGATION_SUCCEEDED,
};
use crate::error::{Error, Result};

const FUNDING_TARGET: Currency = Currency::from_coins(50_000);
const FUNDING_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const FUNDING_POLL: Duration = Duration::from_secs(1);

/// Size in bytes of the temporary storage folder offered to renters.
const STORAGE_FOLDER_SIZE: u64 = 30_000_000_000;

const ANNOUNCE_ATTEMPTS: u32 = 5;
const ANNOUNCE_BACKOFF: Duration = Duration::from_secs(5);

const HOST_INTERVAL: Duration = Duration::from_secs(15);

/// Tracks the highest storage revenue seen so far.
#[derive(Debug, Clone, Default)]
pub struct RevenueTracker {
    max: Currency,
}

impl RevenueTracker {
    /// Record `revenue`. Returns the previous maximum if revenue went down.
    pub fn observe(&mut self, revenue: Currency) -> Option<Currency> {
        if revenue >= self.max {
            self.max = revenue;
            None
        } else {
            Some(self.max)
        }
    }
}

/// Contracts already reported, so each problem is logged once.
#[derive(Debug, Clone, Default)]
pub struct ContractLog {
    failed: HashSet<String>,
    rejected: HashSet<String>,
    expired: HashSet<String>,
}

impl ContractLog {
    /// Problems in `contracts` at chain `height` that have not been reported
    /// before.
    pub fn check(&mut self, contracts: &[HostContract], height: u64) -> Vec<String> {
        let mut problems = Vec::new();
        for contract in contracts {
            let id = &contract.obligationid;
            match contract.obligationstatus.as_str() {
                OBLIGATION_FAILED => {
                    if self.failed.insert(id.clone()) {
                        problems.push(format!("contract {} failed", id));
                    }
                }
                OBLIGATION_REJECTED => {
                    if self.rejected.insert(id.clone()) {
                        problems.push(format!("contract {} rejected", id));
                    }
                }
                OBLIGATION_SUCCEEDED => {}
                _ if contract.proofdeadline < height => {
                    if self.expired.insert(id.clone()) {
                        problems.push(format!(
                            "contract {} passed its proof deadline {} at height {} without succeeding",
                            id, contract.proofdeadline, height
                        ));
                    }
                }
                _ => {}
            }
        }
        problems
    }
}

/// Funds itself, offers storage and then watches its contracts and revenue.
///
/// Revenue and contract history belong to the job instance, so two hosts in
/// one process never share reports.
#[derive(Debug, Clone)]
pub struct HostJob {
    funding_timeout: Duration,
    funding_poll: Duration,
    announce_backoff: Duration,
    interval: Duration,
    revenue: RevenueTracker,
    contracts: ContractLog,
}

impl Default for HostJob {
    fn default() -> Self {
        Self::new()
    }
}

impl HostJob {
    pub fn new() -> Self {
        Self {
            funding_timeout: FUNDING_TIMEOUT,
            funding_poll: FUNDING_POLL,
            announce_backoff: ANNOUNCE_BACKOFF,
            interval: HOST_INTERVAL,
            revenue: RevenueTracker::default(),
            contracts: ContractLog::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_funding(mut self, poll: Duration, timeout: Duration) -> Self {
        self.funding_poll = poll;
        self.funding_timeout = timeout;
        self
    }

    pub fn with_announce_backoff(mut self, backoff: Duration) -> Self {
        self.announce_backoff = backoff;
        self
    }

    async fn announce(&self, ctx: &JobContext) -> Result<()> {
        let mut last = None;
        for attempt in 1..=ANNOUNCE_ATTEMPTS {
            match ctx.client.host_announce().await {
                Ok(()) => {
                    info!("[{} {}] announced (attempt {})", ctx.label, HOST, attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!("[{} {}] announce attempt {}: {}", ctx.label, HOST, attempt, e);
                    last = Some(e);
                }
            }
            if attempt < ANNOUNCE_ATTEMPTS {
                ctx.sleep(self.announce_backoff).await?;
            }
        }
        Err(last.unwrap_or(Error::Timeout(self.announce_backoff * ANNOUNCE_ATTEMPTS)))
    }

    async fn check(&mut self, ctx: &JobContext) {
        match ctx.client.host().await {
            Ok(info) => {
                let revenue = info.financialmetrics.storagerevenue;
                if let Some(previous) = self.revenue.observe(revenue) {
                    error!(
                        "[{} {}] storage revenue decreased from {} to {}",
                        ctx.label, HOST, previous, revenue
                    );
                }
            }
            Err(e) => warn!("[{} {}] reading host info: {}", ctx.label, HOST, e),
        }

        let contracts = ctx.client.host_contracts().await;
        let consensus = ctx.client.consensus().await;
        match (contracts, consensus) {
            (Ok(contracts), Ok(consensus)) => {
                for problem in self.contracts.check(&contracts.contracts, consensus.height) {
                    error!("[{} {}] {}", ctx.label, HOST, problem);
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("[{} {}] checking contracts: {}", ctx.label, HOST, e)
            }
        }
    }
}

#[async_trait]
impl Job for HostJob {
    fn name(&self) -> &'static str {
        HOST
    }

    async fn run(mut self: Box<Self>, ctx: JobContext) -> Result<()> {
        let balance = ctx
            .wait_for_balance(
                HOST,
                FUNDING_TARGET,
                self.funding_poll,
                Some(self.funding_timeout),
            )
            .await?;
        info!("[{} {}] funded with {}", ctx.label, HOST, balance);

        // Removed when the job returns.
        let storage = tempfile::Builder::new().prefix("hostdata").tempdir()?;
        ctx.client
            .host_add_storage_folder(&storage.path().to_string_lossy(), STORAGE_FOLDER_SIZE)
            .await?;

        self.announce(&ctx).await?;
        ctx.client.host_accept_contracts().await?;
        info!("[{} {}] accepting contracts", ctx.label, HOST);

        loop {
            ctx.sleep(self.interval).await?;
            self.check(&ctx).await;
        }
    }
}
