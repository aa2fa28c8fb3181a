use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::api::Currency;
use crate::jobs;
use crate::util::{expand_tilde, free_addrs};
use crate::{Error, Result};

pub const DEFAULT_DATA_DIR: &str = "./antfarm-data";
pub const DEFAULT_DAEMON: &str = "siad";

/// How long to wait for a fresh daemon's API to answer.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// How often the readiness gate polls the API.
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_millis(100);
/// How long a graceful daemon shutdown may take before the process is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_UPGRADE_DELAY: Duration = Duration::from_secs(60);

pub const DEFAULT_MONITOR_SETTLE: Duration = Duration::from_secs(30);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_CONSENSUS_WINDOW: u64 = 8;

/// Sync monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Delay before the first check, giving daemons time to connect.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How many heights back two ants' histories are compared.
    pub window: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settle: DEFAULT_MONITOR_SETTLE,
            interval: DEFAULT_MONITOR_INTERVAL,
            window: DEFAULT_CONSENSUS_WINDOW,
        }
    }
}

/// Per-ant settings as written in the farm configuration file.
///
/// Every address and path is optional; [`FarmConfig::resolve`] fills the gaps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AntConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_path: Option<PathBuf>,
    #[serde(default)]
    pub jobs: Vec<String>,
    /// Balance, in whole coins, the ant keeps by mining on demand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_balance: Option<u64>,
    /// Where `bigspender` and `littlesupplier` send coins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_destination: Option<String>,
    /// Daemon versions to upgrade through, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrade_path: Vec<String>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub upgrade_delay: Option<Duration>,
    /// Laid out as `<dir>/<version>-<os>-<arch>/siad`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_dir: Option<PathBuf>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub readiness_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<Duration>,
}

impl AntConfig {
    pub fn with_jobs(jobs: &[&str]) -> Self {
        Self {
            jobs: jobs.iter().map(|j| j.to_string()).collect(),
            ..Default::default()
        }
    }

    fn explicit_addrs(&self) -> impl Iterator<Item = &String> {
        [&self.api_addr, &self.rpc_addr, &self.host_addr]
            .into_iter()
            .flatten()
    }

    /// Number of addresses left for the farm to allocate.
    fn missing_addrs(&self) -> usize {
        [&self.api_addr, &self.rpc_addr, &self.host_addr]
            .into_iter()
            .filter(|a| a.is_none())
            .count()
    }

    fn desired_currency(&self, index: usize) -> Result<Option<Currency>> {
        self.desired_balance
            .map(|coins| {
                Currency::checked_from_coins(coins).ok_or_else(|| {
                    Error::Config(format!("ant {}: desired_balance too large", index))
                })
            })
            .transpose()
    }

    fn validate(&self, index: usize) -> Result<()> {
        let invalid = |msg: String| Error::Config(format!("ant {}: {}", index, msg));

        self.desired_currency(index)?;

        for job in &self.jobs {
            if !jobs::is_known(job) {
                return Err(invalid(format!("unknown job {:?}", job)));
            }
        }
        if self.desired_balance.is_some() && self.jobs.iter().any(|j| j == jobs::MINER) {
            return Err(invalid(format!(
                "desired_balance and the {} job are mutually exclusive",
                jobs::MINER
            )));
        }
        if self.desired_balance.is_none()
            && self.jobs.iter().any(|j| j == jobs::BALANCE_MAINTAINER)
        {
            return Err(invalid(format!(
                "the {} job requires desired_balance",
                jobs::BALANCE_MAINTAINER
            )));
        }
        if !self.upgrade_path.is_empty() && self.upgrade_dir.is_none() {
            return Err(invalid("upgrade_path requires upgrade_dir".to_string()));
        }
        Ok(())
    }
}

/// Staged daemon upgrades for one ant.
#[derive(Debug, Clone, PartialEq)]
pub struct UpgradePlan {
    pub versions: Vec<String>,
    pub delay: Duration,
    pub dir: PathBuf,
}

impl UpgradePlan {
    /// Path of the daemon binary for `version` on this platform.
    pub fn binary_for(&self, version: &str) -> PathBuf {
        self.dir
            .join(format!(
                "{}-{}-{}",
                version,
                std::env::consts::OS,
                std::env::consts::ARCH
            ))
            .join(DEFAULT_DAEMON)
    }
}

/// Fully resolved, immutable description of one ant.
#[derive(Debug, Clone)]
pub struct AntSpec {
    pub index: usize,
    pub name: String,
    pub api_addr: String,
    pub rpc_addr: String,
    pub host_addr: String,
    pub data_dir: PathBuf,
    pub daemon_path: PathBuf,
    pub jobs: Vec<String>,
    pub desired_balance: Option<Currency>,
    pub spend_destination: Option<String>,
    pub upgrade: Option<UpgradePlan>,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
    pub stop_timeout: Duration,
}

impl AntSpec {
    /// Resolve a single ant against farm-wide defaults, allocating free local
    /// addresses for any the config leaves unset.
    ///
    /// Fleets go through [`FarmConfig::resolve`], which allocates every ant's
    /// addresses at once.
    pub fn resolve(
        index: usize,
        config: &AntConfig,
        farm_data_dir: &Path,
        default_daemon: &Path,
    ) -> Result<Self> {
        let explicit: Vec<&str> = config.explicit_addrs().map(String::as_str).collect();
        let mut generated = allocate_addrs(config.missing_addrs(), &explicit)?.into_iter();
        Self::resolve_with(index, config, farm_data_dir, default_daemon, &mut generated)
    }

    /// Resolve `config`, taking unset addresses from `generated`.
    fn resolve_with(
        index: usize,
        config: &AntConfig,
        farm_data_dir: &Path,
        default_daemon: &Path,
        generated: &mut impl Iterator<Item = String>,
    ) -> Result<Self> {
        let mut pick = |explicit: &Option<String>| match explicit {
            Some(addr) => Ok(addr.clone()),
            None => generated.next().ok_or_else(|| {
                Error::Config(format!("ant {}: ran out of generated addresses", index))
            }),
        };
        let api_addr = pick(&config.api_addr)?;
        let rpc_addr = pick(&config.rpc_addr)?;
        let host_addr = pick(&config.host_addr)?;

        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("ant-{}", index));
        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(|| farm_data_dir.join(&name));
        let daemon_path = config
            .daemon_path
            .clone()
            .unwrap_or_else(|| default_daemon.to_path_buf());

        let upgrade = match (&config.upgrade_dir, config.upgrade_path.is_empty()) {
            (Some(dir), false) => Some(UpgradePlan {
                versions: config.upgrade_path.clone(),
                delay: config.upgrade_delay.unwrap_or(DEFAULT_UPGRADE_DELAY),
                dir: dir.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            index,
            name,
            api_addr,
            rpc_addr,
            host_addr,
            data_dir,
            daemon_path,
            jobs: config.jobs.clone(),
            desired_balance: config.desired_currency(index)?,
            spend_destination: config.spend_destination.clone(),
            upgrade,
            readiness_timeout: config
                .readiness_timeout
                .unwrap_or(DEFAULT_READINESS_TIMEOUT),
            readiness_interval: DEFAULT_READINESS_INTERVAL,
            stop_timeout: config.stop_timeout.unwrap_or(DEFAULT_STOP_TIMEOUT),
        })
    }

    pub fn addrs(&self) -> [&str; 3] {
        [&self.api_addr, &self.rpc_addr, &self.host_addr]
    }
}

/// Reserve `n` free local addresses in one batch, skipping any whose port an
/// explicitly configured address already claims.
fn allocate_addrs(n: usize, explicit: &[&str]) -> Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let taken: HashSet<&str> = explicit.iter().filter_map(|a| port_of(a)).collect();
    // Each explicit port can shadow at most one of the distinct generated ones.
    let addrs: Vec<String> = free_addrs(n + taken.len())?
        .into_iter()
        .filter(|a| port_of(a).map_or(true, |p| !taken.contains(p)))
        .take(n)
        .collect();
    debug!("allocated {} addresses, {} explicit", addrs.len(), explicit.len());
    Ok(addrs)
}

fn port_of(addr: &str) -> Option<&str> {
    addr.rsplit_once(':').map(|(_, port)| port)
}

/// The farm configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmConfig {
    /// Address for the farm's own control API. No API when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_address: Option<String>,
    /// Connect every ant to the first one after startup.
    #[serde(default)]
    pub auto_connect: bool,
    /// Control API addresses of other farms to federate with.
    #[serde(default)]
    pub external_farms: Vec<String>,
    /// Root for per-ant data directories. Cleared when the farm starts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_daemon")]
    pub daemon_path: PathBuf,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub ants: Vec<AntConfig>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_daemon() -> PathBuf {
    PathBuf::from(DEFAULT_DAEMON)
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            auto_connect: false,
            external_farms: Vec::new(),
            data_dir: default_data_dir(),
            daemon_path: default_daemon(),
            monitor: MonitorConfig::default(),
            ants: Vec::new(),
        }
    }
}

impl FarmConfig {
    /// Load a farm configuration. Files ending in `.json` are read as JSON,
    /// anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        debug!("FarmConfig::load path={}", path.display());
        let contents = fs::read_to_string(path)?;
        let mut config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => toml::from_str(&contents)?,
        };
        config.expand_paths();
        debug!(
            "FarmConfig loaded: ants={}, auto_connect={}, listen_address={:?}, external_farms={:?}",
            config.ants.len(),
            config.auto_connect,
            config.listen_address,
            config.external_farms
        );
        Ok(config)
    }

    fn expand_paths(&mut self) {
        let expand = |p: &Path| expand_tilde(&p.to_string_lossy());
        self.data_dir = expand(&self.data_dir);
        self.daemon_path = expand(&self.daemon_path);
        for ant in &mut self.ants {
            ant.data_dir = ant.data_dir.as_deref().map(expand);
            ant.daemon_path = ant.daemon_path.as_deref().map(expand);
            ant.upgrade_dir = ant.upgrade_dir.as_deref().map(expand);
        }
    }

    /// Reject configurations that cannot work, before anything is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.ants.is_empty() && self.external_farms.is_empty() {
            return Err(Error::Config("no ants configured".to_string()));
        }
        if self.auto_connect && self.ants.len() + self.external_farms.len() < 2 {
            return Err(Error::Config(format!(
                "auto_connect needs at least two ants, {} configured",
                self.ants.len()
            )));
        }
        if self.monitor.window == 0 {
            return Err(Error::Config("monitor.window must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for (index, ant) in self.ants.iter().enumerate() {
            ant.validate(index)?;
            for addr in ant.explicit_addrs() {
                if !seen.insert(addr.as_str()) {
                    return Err(Error::Config(format!(
                        "ant {}: address {} is used more than once",
                        index, addr
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate, then resolve every ant's configuration.
    pub fn resolve(&self) -> Result<Vec<AntSpec>> {
        self.validate()?;

        let missing = self.ants.iter().map(AntConfig::missing_addrs).sum();
        let explicit: Vec<&str> = self
            .ants
            .iter()
            .flat_map(AntConfig::explicit_addrs)
            .map(String::as_str)
            .collect();
        let mut generated = allocate_addrs(missing, &explicit)?.into_iter();

        let specs = self
            .ants
            .iter()
            .enumerate()
            .map(|(index, ant)| {
                AntSpec::resolve_with(index, ant, &self.data_dir, &self.daemon_path, &mut generated)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut seen = HashSet::new();
        for spec in &specs {
            for addr in spec.addrs() {
                if !seen.insert(addr.to_string()) {
                    return Err(Error::Config(format!(
                        "ant {}: address {} collides with another ant",
                        spec.index, addr
                    )));
                }
            }
            if !seen.insert(spec.data_dir.to_string_lossy().into_owned()) {
                return Err(Error::Config(format!(
                    "ant {}: data directory {} is shared with another ant",
                    spec.index,
                    spec.data_dir.display()
                )));
            }
        }
        Ok(specs)
    }
}
