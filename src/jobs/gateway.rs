use std::time::Duration;

use async_trait::async_trait;
use tracing::{trace, warn};

use super::{Job, JobContext, GATEWAY};
use crate::Result;

const GATEWAY_INTERVAL: Duration = Duration::from_secs(5);

/// Warns whenever the node has no peers.
#[derive(Debug, Clone)]
pub struct GatewayJob {
    interval: Duration,
}

impl Default for GatewayJob {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayJob {
    pub fn new() -> Self {
        Self {
            interval: GATEWAY_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl Job for GatewayJob {
    fn name(&self) -> &'static str {
        GATEWAY
    }

    async fn run(self: Box<Self>, ctx: JobContext) -> Result<()> {
        loop {
            ctx.sleep(self.interval).await?;

            let info = ctx.client.gateway().await?;
            if info.peers.is_empty() {
                warn!("[{} {}] node has no peers", ctx.label, GATEWAY);
            } else {
                trace!("[{} {}] {} peers", ctx.label, GATEWAY, info.peers.len());
            }
        }
    }
}
