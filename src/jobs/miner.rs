use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{Job, JobContext, MINER};
use crate::Result;

/// How long the balance may stay flat before the miner is reported stuck.
const MINER_INTERVAL: Duration = Duration::from_secs(100);

/// Mines continuously and checks that the balance keeps growing.
#[derive(Debug, Clone)]
pub struct MinerJob {
    interval: Duration,
}

impl Default for MinerJob {
    fn default() -> Self {
        Self::new()
    }
}

impl MinerJob {
    pub fn new() -> Self {
        Self {
            interval: MINER_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl Job for MinerJob {
    fn name(&self) -> &'static str {
        MINER
    }

    async fn run(self: Box<Self>, ctx: JobContext) -> Result<()> {
        // A wallet unlocked during initialisation may refuse a second unlock.
        if let Err(e) = ctx.client.wallet_unlock(&ctx.wallet_password).await {
            warn!("[{} {}] unlock: {}", ctx.label, MINER, e);
        }
        ctx.client.miner_start().await?;

        let mut last = ctx.client.confirmed_balance().await?;
        info!("[{} {}] mining from balance {}", ctx.label, MINER, last);

        loop {
            ctx.sleep(self.interval).await?;

            match ctx.client.confirmed_balance().await {
                Ok(balance) if balance > last => {
                    info!("[{} {}] balance grew to {}", ctx.label, MINER, balance);
                    last = balance;
                }
                Ok(balance) => error!(
                    "[{} {}] no new funds within {:?} (balance {})",
                    ctx.label, MINER, self.interval, balance
                ),
                Err(e) => warn!("[{} {}] reading balance: {}", ctx.label, MINER, e),
            }
        }
    }
}
