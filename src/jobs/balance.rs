use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{Job, JobContext, BALANCE_MAINTAINER};
use crate::api::Currency;
use crate::Result;

const BALANCE_INTERVAL: Duration = Duration::from_secs(20);

/// Mines while the balance is at or below a target and idles the miner once
/// it is above.
#[derive(Debug, Clone)]
pub struct BalanceMaintainer {
    desired: Currency,
    interval: Duration,
}

impl BalanceMaintainer {
    pub fn new(desired: Currency) -> Self {
        Self {
            desired,
            interval: BALANCE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// What the miner should do given its state and the current balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MinerAction {
    Start,
    Stop,
    Keep,
}

pub(crate) fn next_action(mining: bool, balance: Currency, desired: Currency) -> MinerAction {
    let satisfied = balance > desired;
    match (mining, satisfied) {
        (false, false) => MinerAction::Start,
        (true, true) => MinerAction::Stop,
        _ => MinerAction::Keep,
    }
}

#[async_trait]
impl Job for BalanceMaintainer {
    fn name(&self) -> &'static str {
        BALANCE_MAINTAINER
    }

    async fn run(self: Box<Self>, ctx: JobContext) -> Result<()> {
        ctx.client.miner_start().await?;
        let mut mining = true;

        loop {
            ctx.sleep(self.interval).await?;

            let balance = ctx.client.confirmed_balance().await?;
            match next_action(mining, balance, self.desired) {
                MinerAction::Start => {
                    info!(
                        "[{} {}] balance {} below {}, starting the miner",
                        ctx.label, BALANCE_MAINTAINER, balance, self.desired
                    );
                    ctx.client.miner_start().await?;
                    mining = true;
                }
                MinerAction::Stop => {
                    info!(
                        "[{} {}] balance {} above {}, stopping the miner",
                        ctx.label, BALANCE_MAINTAINER, balance, self.desired
                    );
                    ctx.client.miner_stop().await?;
                    mining = false;
                }
                MinerAction::Keep => {}
            }
        }
    }
}
