//! The ant farm: a fleet of ants, wired into one network and watched for
//! consensus splits.

pub mod consensus;
pub mod server;

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::ant::{Ant, AntHandle, AntInfo};
use crate::client::NodeClient;
use crate::config::{AntSpec, FarmConfig, MonitorConfig};
use crate::error::{Error, Result};
use crate::group::TaskGroup;

pub use consensus::{consensus_groups, group_histories, GroupMember, SeenBlocks, SyncReport};
pub use server::{ApiServer, ApiState};

/// Every ant the farm knows: its own plus those federated from other farms.
#[derive(Debug, Default)]
struct Roster {
    owned: Vec<Arc<AntHandle>>,
    external: RwLock<Vec<Arc<AntHandle>>>,
}

impl Roster {
    fn external(&self) -> Vec<Arc<AntHandle>> {
        self.external
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn add_external(&self, ants: Vec<Arc<AntHandle>>) {
        self.external
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(ants);
    }

    fn all(&self) -> Vec<Arc<AntHandle>> {
        let mut all = self.owned.clone();
        all.extend(self.external());
        all
    }
}

/// Connect every ant to the first one, forming a star the daemons' own peer
/// exchange turns into a mesh.
///
/// Peers the hub already has are skipped.
pub async fn connect_ants(ants: &[Arc<AntHandle>]) -> Result<()> {
    let Some((hub, rest)) = ants.split_first().filter(|_| ants.len() >= 2) else {
        return Err(Error::NotEnoughAnts { count: ants.len() });
    };

    let known = hub.client().gateway().await?;
    for ant in rest {
        let peer = ant.peer_addr();
        if peer == hub.peer_addr() || known.has_peer(&peer) {
            continue;
        }
        hub.client().gateway_connect(&peer).await?;
        info!("connected {} to hub {} via {}", ant.name(), hub.name(), peer);
    }
    Ok(())
}

/// Start every ant concurrently. If any fails, the rest are stopped and the
/// first failure is returned tagged with its ant index.
async fn start_ants(specs: Vec<AntSpec>) -> Result<Vec<Arc<Ant>>> {
    let results = join_all(specs.into_iter().map(Ant::start)).await;

    let mut ants = Vec::with_capacity(results.len());
    let mut failure = None;
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(ant) => ants.push(ant),
            Err(e) => {
                error!("ant {} failed to start: {}", index, e);
                failure.get_or_insert(e.for_ant(index));
            }
        }
    }

    if let Some(e) = failure {
        join_all(ants.iter().map(|ant| ant.stop())).await;
        return Err(e);
    }
    Ok(ants)
}

/// A running fleet of ants.
pub struct AntFarm {
    ants: Vec<Arc<Ant>>,
    roster: Arc<Roster>,
    monitor: TaskGroup,
    reports: watch::Receiver<Option<SyncReport>>,
    report_tx: Arc<watch::Sender<Option<SyncReport>>>,
    server: Mutex<Option<ApiServer>>,
    api_addr: RwLock<Option<SocketAddr>>,
    closed: Mutex<bool>,
}

impl AntFarm {
    /// Build the farm described by `config`.
    ///
    /// Configuration problems are reported before any daemon is spawned.
    /// The farm's data directory is wiped first. If any later step fails,
    /// everything started so far is stopped before the error is returned.
    pub async fn create(config: FarmConfig) -> Result<Arc<Self>> {
        let specs = config.resolve()?;

        if config.data_dir.exists() {
            std::fs::remove_dir_all(&config.data_dir)?;
        }
        std::fs::create_dir_all(&config.data_dir)?;

        info!("starting {} ants", specs.len());
        let ants = start_ants(specs).await?;

        let (report_tx, reports) = watch::channel(None);
        let farm = Arc::new(Self {
            roster: Arc::new(Roster {
                owned: ants.iter().map(|ant| Arc::clone(ant.handle())).collect(),
                external: RwLock::new(Vec::new()),
            }),
            ants,
            monitor: TaskGroup::new(),
            reports,
            report_tx: Arc::new(report_tx),
            server: Mutex::new(None),
            api_addr: RwLock::new(None),
            closed: Mutex::new(false),
        });

        if let Err(e) = farm.finish_setup(&config).await {
            error!("farm setup failed: {}", e);
            farm.close().await;
            return Err(e);
        }
        Ok(farm)
    }

    async fn finish_setup(&self, config: &FarmConfig) -> Result<()> {
        // A lone ant is connected to the network when its farm federates.
        if config.auto_connect
            && (self.roster.owned.len() >= 2 || config.external_farms.is_empty())
        {
            connect_ants(&self.roster.owned).await?;
        }

        for addr in &config.external_farms {
            self.connect_external_farm(addr).await?;
        }

        if let Some(listen) = &config.listen_address {
            let state = Arc::new(ApiState {
                ants: self.ants.clone(),
                reports: self.reports.clone(),
            });
            let server = ApiServer::bind(listen, state).await?;
            *self
                .api_addr
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(server.local_addr());
            *self.server.lock().await = Some(server);
        }

        if config.monitor.enabled {
            self.spawn_monitor(config.monitor.clone())?;
        }
        Ok(())
    }

    /// Fetch the ants of the farm serving its API at `addr`, track them as
    /// external and connect the whole network.
    pub async fn connect_external_farm(&self, addr: &str) -> Result<()> {
        let infos: Vec<AntInfo> = NodeClient::new(addr)?.get("/ants").await?;
        let handles = infos
            .iter()
            .map(AntHandle::external)
            .map(|handle| handle.map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        info!("federating {} ants from farm at {}", handles.len(), addr);

        self.roster.add_external(handles);
        connect_ants(&self.roster.all()).await
    }

    fn spawn_monitor(&self, config: MonitorConfig) -> Result<()> {
        let roster = Arc::clone(&self.roster);
        let tx = Arc::clone(&self.report_tx);
        let group = self.monitor.clone();
        self.monitor.spawn(async move {
            monitor(roster, config, tx, group).await;
        })?;
        Ok(())
    }

    /// Ants started and owned by this farm.
    pub fn ants(&self) -> &[Arc<Ant>] {
        &self.ants
    }

    /// Ants federated from other farms. Never stopped by this farm.
    pub fn external_ants(&self) -> Vec<Arc<AntHandle>> {
        self.roster.external()
    }

    /// Owned ants followed by external ones.
    pub fn all_ants(&self) -> Vec<Arc<AntHandle>> {
        self.roster.all()
    }

    /// Address the control API is bound to, if it was enabled.
    pub fn api_addr(&self) -> Option<SocketAddr> {
        *self
            .api_addr
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receiver of every monitor report. Holds `None` until the first one.
    pub fn sync_reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.clone()
    }

    pub fn latest_report(&self) -> Option<SyncReport> {
        self.reports.borrow().clone()
    }

    /// Stop the monitor, then every owned ant, then the control API.
    ///
    /// Idempotent. Concurrent callers wait for the first to finish.
    pub async fn close(&self) {
        let mut closed = self.closed.lock().await;
        if *closed {
            return;
        }

        let _ = self.monitor.stop().await;
        info!("stopping {} ants", self.ants.len());
        join_all(self.ants.iter().map(|ant| ant.stop())).await;

        if let Some(server) = self.server.lock().await.take() {
            server.shutdown().await;
        }
        *closed = true;
        info!("farm closed");
    }
}

async fn monitor(
    roster: Arc<Roster>,
    config: MonitorConfig,
    tx: Arc<watch::Sender<Option<SyncReport>>>,
    group: TaskGroup,
) {
    if group.sleep(config.settle).await.is_err() {
        return;
    }

    loop {
        let ants = roster.all();
        let round = tokio::select! {
            _ = group.cancelled() => return,
            round = consensus_groups(&ants, config.window) => round,
        };

        match round {
            Ok(groups) => {
                let report = SyncReport::from_groups(&groups).await;
                log_report(&report);
                tx.send_replace(Some(report));
            }
            Err(e) => warn!("checking sync status of the farm: {}", e),
        }

        if group.sleep(config.interval).await.is_err() {
            return;
        }
    }
}

fn log_report(report: &SyncReport) {
    if report.is_synced() {
        info!("{} ants are synchronized", report.ant_count());
        return;
    }
    warn!("ants split into {} groups", report.groups.len());
    for (i, group) in report.groups.iter().enumerate() {
        let members: Vec<String> = group
            .iter()
            .map(|m| format!("{} ({}) @ {:?}", m.name, m.api_addr, m.height))
            .collect();
        warn!("group {}: {}", i + 1, members.join(", "));
    }
}
