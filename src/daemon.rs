//! One spawned daemon process.
//!
//! [`Daemon`] exclusively owns the child handle. It is started with
//! [`Daemon::start`], which returns only once the daemon's API answers, and
//! torn down with [`Daemon::shutdown`], which asks politely and then kills.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::client::NodeClient;
use crate::config::AntSpec;
use crate::error::{Error, Result};

/// Daemon stdout and stderr land here, inside the ant's data directory.
pub const OUTPUT_LOG: &str = "daemon-output.log";

/// Substring the `version` output must carry for a testing build.
const DEV_MARKER: &str = "-dev";

const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout used while probing readiness.
const READY_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve `binary` and check that it is a dev build.
///
/// Bare names are looked up on `PATH`. Returns the resolved path.
pub async fn check_build(binary: &Path) -> Result<PathBuf> {
    let resolved = resolve_binary(binary)?;

    let output = tokio::time::timeout(
        VERSION_TIMEOUT,
        Command::new(&resolved)
            .arg("version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| Error::Timeout(VERSION_TIMEOUT))??;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if !text.contains(DEV_MARKER) {
        return Err(Error::WrongBuild {
            binary: resolved,
            output: text.trim().to_string(),
        });
    }

    debug!("check_build: {} -> {}", resolved.display(), text.trim());
    Ok(resolved)
}

fn resolve_binary(binary: &Path) -> Result<PathBuf> {
    let bare = binary.components().count() == 1 && !binary.is_absolute();
    if bare {
        return which::which(binary).map_err(|_| Error::BinaryNotFound(binary.to_path_buf()));
    }
    if binary.is_file() {
        Ok(binary.to_path_buf())
    } else {
        Err(Error::BinaryNotFound(binary.to_path_buf()))
    }
}

fn exit_description(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {}", e),
    }
}

#[derive(Debug)]
pub struct Daemon {
    child: Child,
    binary: PathBuf,
    label: String,
}

impl Daemon {
    /// Spawn `binary` for the ant described by `spec` and wait until its API
    /// is reachable.
    ///
    /// If the process exits first, fails with [`Error::DaemonExited`]. If the
    /// readiness timeout passes, the process is killed and the call fails
    /// with [`Error::ReadinessTimeout`]. No child outlives a failed start.
    pub async fn start(binary: &Path, spec: &AntSpec) -> Result<Self> {
        let binary = check_build(binary).await?;
        std::fs::create_dir_all(&spec.data_dir)?;

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(spec.data_dir.join(OUTPUT_LOG))?;
        let log_err = log.try_clone()?;

        let child = Command::new(&binary)
            .arg("--no-bootstrap")
            .arg(format!("--sia-directory={}", spec.data_dir.display()))
            .arg(format!("--api-addr={}", spec.api_addr))
            .arg(format!("--rpc-addr={}", spec.rpc_addr))
            .arg(format!("--host-addr={}", spec.host_addr))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()?;

        let mut daemon = Self {
            child,
            binary,
            label: spec.name.clone(),
        };
        info!(
            "[{}] spawned {} (pid {:?}) api={} rpc={} host={}",
            daemon.label,
            daemon.binary.display(),
            daemon.child.id(),
            spec.api_addr,
            spec.rpc_addr,
            spec.host_addr
        );

        let ready_client = NodeClient::with_timeout(&spec.api_addr, READY_POLL_TIMEOUT)?;
        let ready = daemon
            .wait_ready(&ready_client, spec.readiness_timeout, spec.readiness_interval)
            .await;
        match ready {
            Ok(()) => {
                info!("[{}] daemon API ready at {}", daemon.label, spec.api_addr);
                Ok(daemon)
            }
            Err(e) => {
                warn!("[{}] daemon failed to become ready: {}", daemon.label, e);
                daemon.kill().await;
                Err(e)
            }
        }
    }

    async fn wait_ready(
        &mut self,
        ready_client: &NodeClient,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let child = &mut self.child;
        let gate = async {
            loop {
                let attempt = async {
                    match ready_client.consensus().await {
                        Ok(_) => true,
                        Err(_) => {
                            tokio::time::sleep(interval).await;
                            false
                        }
                    }
                };
                tokio::select! {
                    status = child.wait() => {
                        return Err(Error::DaemonExited { status: exit_description(status) });
                    }
                    ready = attempt => {
                        if ready {
                            return Ok(());
                        }
                    }
                }
            }
        };

        tokio::time::timeout(timeout, gate)
            .await
            .map_err(|_| Error::ReadinessTimeout {
                addr: ready_client.addr().to_string(),
                timeout,
            })?
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stop the daemon: request a graceful stop through its API, wait up to
    /// `timeout` for the process to exit, then kill it.
    ///
    /// Never fails because the process is already gone.
    pub async fn shutdown(mut self, client: &NodeClient, timeout: Duration) {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("[{}] daemon already exited: {}", self.label, status);
            return;
        }

        let graceful = async {
            client.daemon_stop().await?;
            Ok::<_, Error>(self.child.wait().await?)
        };
        let outcome = tokio::time::timeout(timeout, graceful).await;
        match outcome {
            Ok(Ok(status)) => {
                info!("[{}] daemon stopped: {}", self.label, status);
            }
            Ok(Err(e)) => {
                warn!("[{}] graceful stop failed, killing: {}", self.label, e);
                self.kill().await;
            }
            Err(_) => {
                warn!(
                    "[{}] daemon did not stop within {:?}, killing",
                    self.label, timeout
                );
                self.kill().await;
            }
        }
    }

    /// Kill the process and reap it.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("[{}] kill: {}", self.label, e);
        }
    }
}
