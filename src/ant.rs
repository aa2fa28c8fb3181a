//! Ants: one supervised daemon, its jobs and its observed chain history.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::api::{BlockId, Currency};
use crate::client::NodeClient;
use crate::config::{AntSpec, UpgradePlan};
use crate::daemon::Daemon;
use crate::error::{Error, Result};
use crate::farm::consensus::SeenBlocks;
use crate::group::TaskGroup;
use crate::jobs::{self, JobArgs, JobRunner, BALANCE_MAINTAINER};
use crate::util::dialable;

/// Lifecycle of an [`Ant`].
///
/// `Starting -> Ready -> Running -> Stopping -> Stopped`, or
/// `Starting -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntStatus {
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// What the farm needs to poll and connect one ant, owned or not.
#[derive(Debug)]
pub struct AntHandle {
    name: String,
    api_addr: String,
    rpc_addr: String,
    client: NodeClient,
    external: bool,
    seen: RwLock<SeenBlocks>,
}

impl AntHandle {
    pub fn new(name: &str, api_addr: &str, rpc_addr: &str, external: bool) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            api_addr: api_addr.to_string(),
            rpc_addr: rpc_addr.to_string(),
            client: NodeClient::new(api_addr)?,
            external,
            seen: RwLock::new(SeenBlocks::new()),
        })
    }

    /// A reference to an ant owned by another farm.
    pub fn external(info: &AntInfo) -> Result<Self> {
        Self::new(&info.name, &info.api_addr, &info.rpc_addr, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_addr(&self) -> &str {
        &self.api_addr
    }

    /// The gateway address other daemons dial to reach this one.
    pub fn peer_addr(&self) -> String {
        dialable(&self.rpc_addr)
    }

    pub fn client(&self) -> &NodeClient {
        &self.client
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub async fn record_block(&self, height: u64, id: BlockId) {
        self.seen.write().await.record(height, id);
    }

    pub async fn seen_blocks(&self) -> SeenBlocks {
        self.seen.read().await.clone()
    }

    /// Highest height observed so far.
    pub async fn height(&self) -> Option<u64> {
        self.seen.read().await.tip()
    }
}

/// Public description of an ant, served by the farm API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntInfo {
    pub name: String,
    pub api_addr: String,
    pub rpc_addr: String,
    #[serde(default)]
    pub host_addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_balance: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AntStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// One supervised daemon plus the jobs driving it.
///
/// The ant exclusively owns its daemon process. Jobs and the upgrader share
/// one [`TaskGroup`]; [`Ant::stop`] stops that group before touching the
/// daemon.
#[derive(Debug)]
pub struct Ant {
    spec: AntSpec,
    handle: Arc<AntHandle>,
    group: TaskGroup,
    daemon: Arc<Mutex<Option<Daemon>>>,
    runner: OnceLock<JobRunner>,
    status: StdMutex<AntStatus>,
}

impl Ant {
    fn new(spec: AntSpec) -> Result<Self> {
        let handle = AntHandle::new(&spec.name, &spec.api_addr, &spec.rpc_addr, false)?;
        Ok(Self {
            spec,
            handle: Arc::new(handle),
            group: TaskGroup::new(),
            daemon: Arc::new(Mutex::new(None)),
            runner: OnceLock::new(),
            status: StdMutex::new(AntStatus::Starting),
        })
    }

    /// Spawn the daemon, wait for it, initialise its wallet and start the
    /// configured jobs.
    ///
    /// On failure nothing is left running.
    pub async fn start(spec: AntSpec) -> Result<Arc<Self>> {
        let ant = Arc::new(Self::new(spec)?);
        info!(
            "[{}] starting with jobs {:?} in {}",
            ant.spec.name,
            ant.spec.jobs,
            ant.spec.data_dir.display()
        );

        if let Err(e) = ant.launch().await {
            error!("[{}] failed to start: {}", ant.spec.name, e);
            ant.stop().await;
            ant.set_status(AntStatus::Failed);
            return Err(e);
        }
        Ok(ant)
    }

    async fn launch(&self) -> Result<()> {
        let daemon = Daemon::start(&self.spec.daemon_path, &self.spec).await?;
        *self.daemon.lock().await = Some(daemon);
        self.set_status(AntStatus::Ready);

        let runner = JobRunner::initialize(
            &self.spec.name,
            self.handle.client().clone(),
            &self.spec.data_dir,
            self.group.clone(),
        )
        .await?;
        let runner = self.runner.get_or_init(|| runner);

        let args = self.job_args().await?;
        for job in &self.spec.jobs {
            runner.start_job(job, &args)?;
        }
        if self.spec.desired_balance.is_some()
            && !self.spec.jobs.iter().any(|j| j == BALANCE_MAINTAINER)
        {
            runner.start_job(BALANCE_MAINTAINER, &args)?;
        }

        if let Some(plan) = &self.spec.upgrade {
            self.spawn_upgrader(plan.clone())?;
        }

        self.set_status(AntStatus::Running);
        info!("[{}] running", self.spec.name);
        Ok(())
    }

    /// Resolve job inputs before any job launches.
    async fn job_args(&self) -> Result<JobArgs> {
        let destination = match &self.spec.spend_destination {
            Some(addr) => Some(addr.clone()),
            None if self.spec.jobs.iter().any(|j| jobs::needs_destination(j)) => {
                let addr = self.handle.client().wallet_address().await?;
                debug!("[{}] spending to own address {}", self.spec.name, addr);
                Some(addr)
            }
            None => None,
        };
        Ok(JobArgs {
            destination,
            desired_balance: self.spec.desired_balance,
        })
    }

    fn spawn_upgrader(&self, plan: UpgradePlan) -> Result<()> {
        let spec = self.spec.clone();
        let client = self.handle.client().clone();
        let daemon = Arc::clone(&self.daemon);
        let group = self.group.clone();
        self.group.spawn(async move {
            upgrade_through(plan, spec, client, daemon, group).await;
        })?;
        Ok(())
    }

    /// Stop every job and the upgrader, then shut the daemon down.
    ///
    /// Safe to call more than once, concurrently, or on an ant whose start
    /// never finished.
    pub async fn stop(&self) {
        if !matches!(self.status(), AntStatus::Stopped | AntStatus::Failed) {
            self.set_status(AntStatus::Stopping);
        }

        if let Err(Error::Stopped) = self.group.stop().await {
            debug!("[{}] task group already stopped", self.spec.name);
        }

        let mut slot = self.daemon.lock().await;
        if let Some(daemon) = slot.take() {
            daemon
                .shutdown(self.handle.client(), self.spec.stop_timeout)
                .await;
        }
        drop(slot);

        if self.status() != AntStatus::Failed {
            self.set_status(AntStatus::Stopped);
        }
        info!("[{}] stopped", self.spec.name);
    }

    fn set_status(&self, status: AntStatus) {
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    pub fn status(&self) -> AntStatus {
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &AntSpec {
        &self.spec
    }

    pub fn handle(&self) -> &Arc<AntHandle> {
        &self.handle
    }

    pub fn client(&self) -> &NodeClient {
        self.handle.client()
    }

    /// Tasks currently registered in this ant's group.
    pub fn active_tasks(&self) -> usize {
        self.group.active_count()
    }

    pub fn running_jobs(&self) -> Vec<String> {
        self.runner
            .get()
            .map(JobRunner::started_jobs)
            .unwrap_or_default()
    }

    /// Current daemon pid, if a daemon is running and not being swapped.
    pub fn pid(&self) -> Option<u32> {
        self.daemon
            .try_lock()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(Daemon::pid))
    }

    pub fn info(&self) -> AntInfo {
        AntInfo {
            name: self.spec.name.clone(),
            api_addr: self.spec.api_addr.clone(),
            rpc_addr: self.spec.rpc_addr.clone(),
            host_addr: self.spec.host_addr.clone(),
            data_dir: Some(self.spec.data_dir.clone()),
            jobs: self.spec.jobs.clone(),
            desired_balance: self.spec.desired_balance,
            status: Some(self.status()),
            pid: self.pid(),
        }
    }
}

/// Swap the daemon for each version in `plan`, waiting `plan.delay` before
/// each step. A version that fails to start is logged and skipped.
async fn upgrade_through(
    plan: UpgradePlan,
    spec: AntSpec,
    client: NodeClient,
    daemon: Arc<Mutex<Option<Daemon>>>,
    group: TaskGroup,
) {
    for version in &plan.versions {
        if group.sleep(plan.delay).await.is_err() {
            return;
        }

        let binary = plan.binary_for(version);
        info!("[{}] upgrading to {} ({})", spec.name, version, binary.display());

        let mut slot = daemon.lock().await;
        if let Some(current) = slot.take() {
            current.shutdown(&client, spec.stop_timeout).await;
        }

        tokio::select! {
            _ = group.cancelled() => {
                warn!("[{}] upgrade to {} interrupted by stop", spec.name, version);
                return;
            }
            started = Daemon::start(&binary, &spec) => match started {
                Ok(next) => {
                    info!("[{}] now running {}", spec.name, version);
                    *slot = Some(next);
                }
                Err(e) => error!("[{}] starting {} after upgrade: {}", spec.name, version, e),
            }
        }
    }
}
