//! Per-ant job scheduling.
//!
//! A job is a named background behaviour driven against one daemon's API.
//! [`JobRunner::start_job`] looks the name up in a static registry, builds
//! the job and runs it as a task registered in the ant's [`TaskGroup`]. The
//! runner never waits for jobs; stopping the group stops them.
//!
//! Every wait inside a job goes through [`JobContext::sleep`] so a stop is
//! observed within one polling interval.

mod balance;
mod gateway;
mod host;
mod miner;
mod renter;
mod spender;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::api::Currency;
use crate::client::NodeClient;
use crate::error::{Error, Result};
use crate::group::TaskGroup;

pub use balance::BalanceMaintainer;
pub use gateway::GatewayJob;
pub use host::{ContractLog, HostJob, RevenueTracker};
pub use miner::MinerJob;
pub use renter::{RenterJob, RenterSettings};
pub use spender::Spender;

pub const GATEWAY: &str = "gateway";
pub const MINER: &str = "miner";
pub const HOST: &str = "host";
pub const RENTER: &str = "renter";
pub const BIG_SPENDER: &str = "bigspender";
pub const LITTLE_SUPPLIER: &str = "littlesupplier";
pub const BALANCE_MAINTAINER: &str = "balancemaintainer";

type Constructor = fn(&JobArgs) -> Result<Box<dyn Job>>;

const REGISTRY: &[(&str, Constructor)] = &[
    (GATEWAY, |_| Ok(Box::new(GatewayJob::new()))),
    (MINER, |_| Ok(Box::new(MinerJob::new()))),
    (HOST, |_| Ok(Box::new(HostJob::new()))),
    (RENTER, |_| Ok(Box::new(RenterJob::new()))),
    (BIG_SPENDER, |args| {
        Ok(Box::new(Spender::big(args.require_destination(BIG_SPENDER)?)))
    }),
    (LITTLE_SUPPLIER, |args| {
        Ok(Box::new(Spender::little(
            args.require_destination(LITTLE_SUPPLIER)?,
        )))
    }),
    (BALANCE_MAINTAINER, |args| {
        let desired = args.desired_balance.ok_or_else(|| Error::InvalidJobArgs {
            job: BALANCE_MAINTAINER.to_string(),
            reason: "a desired balance is required".to_string(),
        })?;
        Ok(Box::new(BalanceMaintainer::new(desired)))
    }),
];

pub fn is_known(name: &str) -> bool {
    REGISTRY.iter().any(|(n, _)| *n == name)
}

/// Whether `name` sends coins somewhere and so needs a destination address.
pub fn needs_destination(name: &str) -> bool {
    name == BIG_SPENDER || name == LITTLE_SUPPLIER
}

/// Build the job registered under `name`.
pub fn build(name: &str, args: &JobArgs) -> Result<Box<dyn Job>> {
    let (_, constructor) = REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| Error::UnknownJob(name.to_string()))?;
    constructor(args)
}

/// Inputs some jobs need, resolved before the job is launched.
#[derive(Debug, Clone, Default)]
pub struct JobArgs {
    pub destination: Option<String>,
    pub desired_balance: Option<Currency>,
}

impl JobArgs {
    fn require_destination(&self, job: &str) -> Result<String> {
        self.destination.clone().ok_or_else(|| Error::InvalidJobArgs {
            job: job.to_string(),
            reason: "a destination address is required".to_string(),
        })
    }
}

/// A named background behaviour run against one daemon.
#[async_trait]
pub trait Job: Send + 'static {
    fn name(&self) -> &'static str;

    /// Run until done or until the group stops.
    ///
    /// Returning `Err(Error::Stopped)` is the normal way out on a stop.
    async fn run(self: Box<Self>, ctx: JobContext) -> Result<()>;
}

/// Everything a job may touch.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Ant name, used to prefix log lines.
    pub label: String,
    pub client: NodeClient,
    pub data_dir: PathBuf,
    pub wallet_password: String,
    pub group: TaskGroup,
}

impl JobContext {
    /// Sleep unless the group stops first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.group.sleep(duration).await
    }

    /// Poll the confirmed balance every `poll` until it exceeds `target`.
    ///
    /// Gives up with [`Error::Timeout`] after `timeout` when one is given.
    /// Balance read failures are logged and retried.
    pub async fn wait_for_balance(
        &self,
        job: &str,
        target: Currency,
        poll: Duration,
        timeout: Option<Duration>,
    ) -> Result<Currency> {
        let start = Instant::now();
        loop {
            match self.client.confirmed_balance().await {
                Ok(balance) if balance > target => return Ok(balance),
                Ok(_) => {}
                Err(e) => warn!("[{} {}] reading balance: {}", self.label, job, e),
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return Err(Error::Timeout(limit));
                }
            }
            self.sleep(poll).await?;
        }
    }
}

/// Starts named jobs for one ant.
#[derive(Debug)]
pub struct JobRunner {
    ctx: JobContext,
    started: Arc<Mutex<Vec<&'static str>>>,
}

impl JobRunner {
    pub fn new(ctx: JobContext) -> Self {
        Self {
            ctx,
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create and unlock a fresh wallet on the daemon behind `client`, then
    /// return a runner that uses it.
    ///
    /// Expects a newly initialised daemon. The wallet seed doubles as the
    /// wallet password.
    pub async fn initialize(
        label: &str,
        client: NodeClient,
        data_dir: &Path,
        group: TaskGroup,
    ) -> Result<Self> {
        let seed = client.wallet_init().await?.primaryseed;
        client.wallet_unlock(&seed).await?;
        info!("[{}] wallet initialised and unlocked", label);

        Ok(Self::new(JobContext {
            label: label.to_string(),
            client,
            data_dir: data_dir.to_path_buf(),
            wallet_password: seed,
            group,
        }))
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    /// Build the job registered as `name` and launch it.
    ///
    /// Unknown names fail with [`Error::UnknownJob`] and register nothing.
    pub fn start_job(&self, name: &str, args: &JobArgs) -> Result<()> {
        let job = build(name, args)?;
        self.spawn_job(job)
    }

    /// Launch an already built job in the ant's task group.
    pub fn spawn_job(&self, job: Box<dyn Job>) -> Result<()> {
        let name = job.name();
        let ctx = self.ctx.clone();
        let label = ctx.label.clone();

        self.ctx.group.spawn(async move {
            debug!("[{} {}] job started", label, name);
            match job.run(ctx).await {
                Ok(()) => debug!("[{} {}] job finished", label, name),
                Err(Error::Stopped) => debug!("[{} {}] job stopped", label, name),
                Err(e) => error!("[{} {}] job failed: {}", label, name, e),
            }
        })?;

        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(name);
        Ok(())
    }

    /// Names of the jobs launched so far, in launch order.
    pub fn started_jobs(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|name| name.to_string())
            .collect()
    }
}
