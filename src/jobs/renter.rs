use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::{Rng, RngCore};
use tracing::{debug, error, info, warn};

use super::{Job, JobContext, RENTER};
use crate::api::{Currency, DownloadInfo};
use crate::error::{Error, Result};
use crate::util::blocking;

/// Directory under the ant's data dir holding upload sources.
const SOURCE_DIR: &str = "renterSourceFiles";

const WRITE_CHUNK: usize = 1 << 20;

/// Timing and sizing of the renter's work.
#[derive(Debug, Clone)]
pub struct RenterSettings {
    pub required_balance: Currency,
    pub balance_poll: Duration,
    /// After this long without funds, each further poll logs an error.
    pub balance_warning: Duration,
    pub allowance: Currency,
    /// Allowance period in blocks.
    pub allowance_period: u64,
    pub allowance_retry: Duration,
    pub allowance_warning: Duration,
    pub upload_interval: Duration,
    pub download_interval: Duration,
    pub delete_interval: Duration,
    /// Files are only deleted once at least this many are tracked.
    pub delete_threshold: usize,
    pub upload_size: u64,
    pub upload_poll: Duration,
    pub upload_timeout: Duration,
    pub download_poll: Duration,
    pub queue_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for RenterSettings {
    fn default() -> Self {
        let upload_interval = Duration::from_secs(60);
        Self {
            required_balance: Currency::from_coins(100_000),
            balance_poll: Duration::from_secs(15),
            balance_warning: Duration::from_secs(10 * 60),
            allowance: Currency::from_coins(20_000),
            allowance_period: 100,
            allowance_retry: Duration::from_secs(15),
            allowance_warning: Duration::from_secs(2 * 60),
            upload_interval,
            download_interval: upload_interval * 3 / 2,
            delete_interval: Duration::from_secs(2 * 60),
            delete_threshold: 30,
            upload_size: 100_000_000,
            upload_poll: Duration::from_secs(20),
            upload_timeout: Duration::from_secs(10 * 60),
            download_poll: Duration::from_secs(1),
            queue_timeout: Duration::from_secs(3 * 60),
            download_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// A file this renter uploaded and still tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFile {
    pub siapath: String,
    pub source: PathBuf,
}

/// Files shared by the uploader, downloader and deleter of one renter.
///
/// The lock only guards list edits; no network call happens under it.
#[derive(Debug, Clone, Default)]
struct FileList {
    files: Arc<Mutex<Vec<TrackedFile>>>,
}

impl FileList {
    fn lock(&self) -> MutexGuard<'_, Vec<TrackedFile>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, file: TrackedFile) {
        self.lock().push(file);
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    /// Remove and return a random file if at least `threshold` are tracked.
    fn take_random(&self, threshold: usize) -> Option<TrackedFile> {
        let mut files = self.lock();
        if files.is_empty() || files.len() < threshold {
            return None;
        }
        let index = rand::rng().random_range(0..files.len());
        Some(files.swap_remove(index))
    }

    fn drain(&self) -> Vec<TrackedFile> {
        std::mem::take(&mut *self.lock())
    }
}

/// Siapath for an upload source: its path without the root.
fn siapath_for(source: &Path) -> String {
    source
        .to_string_lossy()
        .trim_start_matches('/')
        .to_string()
}

fn fill_random(path: &Path, size: u64) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut rng = rand::rng();
    let mut chunk = vec![0u8; WRITE_CHUNK];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(WRITE_CHUNK as u64) as usize;
        rng.fill_bytes(&mut chunk[..n]);
        out.write_all(&chunk[..n])?;
        remaining -= n as u64;
    }
    out.flush()
}

#[derive(Debug, Clone, Copy)]
enum Chore {
    Upload,
    Download,
    Delete,
}

impl Chore {
    fn name(self) -> &'static str {
        match self {
            Chore::Upload => "uploader",
            Chore::Download => "downloader",
            Chore::Delete => "deleter",
        }
    }

    fn interval(self, settings: &RenterSettings) -> Duration {
        match self {
            Chore::Upload => settings.upload_interval,
            Chore::Download => settings.download_interval,
            Chore::Delete => settings.delete_interval,
        }
    }
}

/// Shared state of the three renter loops.
#[derive(Debug, Clone)]
struct Worker {
    ctx: JobContext,
    settings: Arc<RenterSettings>,
    files: FileList,
    source_dir: PathBuf,
}

impl Worker {
    async fn run_chore(self, chore: Chore) {
        let interval = chore.interval(&self.settings);
        loop {
            if self.ctx.sleep(interval).await.is_err() {
                return;
            }
            let outcome = match chore {
                Chore::Upload => self.upload().await,
                Chore::Download => self.download().await,
                Chore::Delete => self.delete_random().await,
            };
            match outcome {
                Ok(()) => {}
                Err(Error::Stopped) => return,
                Err(e) => error!("[{} {} {}] {}", self.ctx.label, RENTER, chore.name(), e),
            }
        }
    }

    async fn upload(&self) -> Result<()> {
        let source = tempfile::Builder::new()
            .prefix("renterFile")
            .tempfile_in(&self.source_dir)?
            .into_temp_path()
            .keep()
            .map_err(|e| Error::Io(e.error))?;

        let size = self.settings.upload_size;
        let path = source.clone();
        blocking(move || Ok(fill_random(&path, size)?)).await?;

        let siapath = siapath_for(&source);
        self.files.push(TrackedFile {
            siapath: siapath.clone(),
            source: source.clone(),
        });
        debug!("[{} {}] uploading {}", self.ctx.label, RENTER, siapath);

        self.ctx
            .client
            .renter_upload(&siapath, &source.to_string_lossy())
            .await?;

        let start = Instant::now();
        let mut progress = 0.0;
        while start.elapsed() < self.settings.upload_timeout {
            self.ctx.sleep(self.settings.upload_poll).await?;

            let files = self.ctx.client.renter_files().await?;
            if let Some(file) = files.files.iter().find(|f| f.siapath == siapath) {
                progress = file.uploadprogress;
            }
            debug!(
                "[{} {}] {} upload progress {:.1}%",
                self.ctx.label, RENTER, siapath, progress
            );
            if progress >= 100.0 {
                info!("[{} {}] uploaded {}", self.ctx.label, RENTER, siapath);
                return Ok(());
            }
        }
        Err(Error::Timeout(self.settings.upload_timeout))
    }

    async fn queued(&self, siapath: &str) -> Result<Option<DownloadInfo>> {
        let downloads = self.ctx.client.renter_downloads().await?;
        Ok(downloads.downloads.into_iter().find(|d| d.siapath == siapath))
    }

    async fn download(&self) -> Result<()> {
        let files = self.ctx.client.renter_files().await?;
        let available: Vec<_> = files.files.into_iter().filter(|f| f.available).collect();
        let Some(file) = available.choose(&mut rand::rng()).cloned() else {
            warn!("[{} {}] no files available to download", self.ctx.label, RENTER);
            return Ok(());
        };

        let destination =
            std::env::temp_dir().join(format!("antfarm-renter-{}", uuid::Uuid::new_v4()));
        info!(
            "[{} {}] downloading {} to {}",
            self.ctx.label,
            RENTER,
            file.siapath,
            destination.display()
        );
        self.ctx
            .client
            .renter_download(&file.siapath, &destination.to_string_lossy())
            .await?;

        let start = Instant::now();
        loop {
            if start.elapsed() >= self.settings.queue_timeout {
                return Err(Error::Timeout(self.settings.queue_timeout));
            }
            self.ctx.sleep(self.settings.download_poll).await?;
            if self.queued(&file.siapath).await?.is_some() {
                break;
            }
        }

        let start = Instant::now();
        while start.elapsed() < self.settings.download_timeout {
            self.ctx.sleep(self.settings.download_poll).await?;
            match self.queued(&file.siapath).await? {
                Some(info) if info.is_complete() => {
                    info!(
                        "[{} {}] downloaded {} ({} bytes)",
                        self.ctx.label, RENTER, file.siapath, info.received
                    );
                    if let Err(e) = tokio::fs::remove_file(&destination).await {
                        debug!("[{} {}] removing download: {}", self.ctx.label, RENTER, e);
                    }
                    return Ok(());
                }
                Some(info) => debug!(
                    "[{} {}] {} received {} of {} bytes",
                    self.ctx.label, RENTER, file.siapath, info.received, info.filesize
                ),
                None => warn!(
                    "[{} {}] {} missing from the download queue",
                    self.ctx.label, RENTER, file.siapath
                ),
            }
        }
        Err(Error::Timeout(self.settings.download_timeout))
    }

    async fn delete_random(&self) -> Result<()> {
        let Some(file) = self.files.take_random(self.settings.delete_threshold) else {
            return Ok(());
        };

        if let Err(e) = self.ctx.client.renter_delete(&file.siapath).await {
            self.files.push(file);
            return Err(e);
        }

        info!("[{} {}] deleted {}", self.ctx.label, RENTER, file.siapath);
        if let Err(e) = tokio::fs::remove_file(&file.source).await {
            debug!("[{} {}] removing source: {}", self.ctx.label, RENTER, e);
        }
        Ok(())
    }
}

/// Funds itself, buys an allowance and then keeps uploading, downloading
/// and deleting files.
///
/// `run` returns once the three loops are launched; they are registered in
/// the ant's task group on their own.
#[derive(Debug, Clone, Default)]
pub struct RenterJob {
    settings: RenterSettings,
}

impl RenterJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: RenterSettings) -> Self {
        Self { settings }
    }

    async fn wait_for_funds(&self, ctx: &JobContext) -> Result<()> {
        let start = Instant::now();
        loop {
            match ctx.client.confirmed_balance().await {
                Ok(balance) if balance >= self.settings.required_balance => {
                    info!("[{} {}] funded with {}", ctx.label, RENTER, balance);
                    return Ok(());
                }
                Ok(balance) if start.elapsed() > self.settings.balance_warning => error!(
                    "[{} {}] balance {} still below {} after {:?}",
                    ctx.label,
                    RENTER,
                    balance,
                    self.settings.required_balance,
                    start.elapsed()
                ),
                Ok(_) => {}
                Err(e) => warn!("[{} {}] reading balance: {}", ctx.label, RENTER, e),
            }
            ctx.sleep(self.settings.balance_poll).await?;
        }
    }

    async fn set_allowance(&self, ctx: &JobContext) -> Result<()> {
        let start = Instant::now();
        loop {
            match ctx
                .client
                .renter_set_allowance(self.settings.allowance, self.settings.allowance_period)
                .await
            {
                Ok(()) => {
                    info!(
                        "[{} {}] allowance of {} set",
                        ctx.label, RENTER, self.settings.allowance
                    );
                    return Ok(());
                }
                Err(e) if start.elapsed() > self.settings.allowance_warning => {
                    error!("[{} {}] setting allowance: {}", ctx.label, RENTER, e)
                }
                Err(e) => debug!("[{} {}] setting allowance: {}", ctx.label, RENTER, e),
            }
            ctx.sleep(self.settings.allowance_retry).await?;
        }
    }
}

#[async_trait]
impl Job for RenterJob {
    fn name(&self) -> &'static str {
        RENTER
    }

    async fn run(self: Box<Self>, ctx: JobContext) -> Result<()> {
        self.wait_for_funds(&ctx).await?;
        self.set_allowance(&ctx).await?;

        let source_dir = ctx.data_dir.join(SOURCE_DIR);
        tokio::fs::create_dir_all(&source_dir).await?;

        let worker = Worker {
            ctx: ctx.clone(),
            settings: Arc::new(self.settings.clone()),
            files: FileList::default(),
            source_dir,
        };

        let files = worker.files.clone();
        let label = ctx.label.clone();
        ctx.group.on_stop(move || {
            let leftovers = files.drain();
            debug!("[{} {}] removing {} source files", label, RENTER, leftovers.len());
            for file in leftovers {
                let _ = std::fs::remove_file(&file.source);
            }
        });

        for chore in [Chore::Upload, Chore::Download, Chore::Delete] {
            ctx.group.spawn(worker.clone().run_chore(chore))?;
        }
        info!(
            "[{} {}] uploader, downloader and deleter running ({} files tracked)",
            ctx.label,
            RENTER,
            worker.files.len()
        );
        Ok(())
    }
}
