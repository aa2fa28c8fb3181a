//! Shared utility functions.

use std::net::TcpListener;
use std::path::PathBuf;

use tokio::task::spawn_blocking;

use crate::{Error, Result};

/// Run blocking `f` on the blocking thread pool.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Reserve `n` distinct free localhost addresses.
///
/// All listeners are held until every port has been picked so the OS cannot
/// hand out the same port twice, then released for the daemon to bind.
pub fn free_addrs(n: usize) -> Result<Vec<String>> {
    let mut listeners = Vec::with_capacity(n);
    for _ in 0..n {
        listeners.push(TcpListener::bind("127.0.0.1:0")?);
    }
    listeners
        .iter()
        .map(|l| Ok(l.local_addr()?.to_string()))
        .collect()
}

/// Turn a bare `:port` into a dialable `127.0.0.1:port`.
pub fn dialable(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("127.0.0.1{}", addr)
    } else {
        addr.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
