use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{Job, JobContext, BIG_SPENDER, LITTLE_SUPPLIER};
use crate::api::Currency;
use crate::Result;

const BIG_SPEND_INTERVAL: Duration = Duration::from_secs(30);
const BIG_SPEND_AMOUNT: Currency = Currency::from_coins(50_000);

const LITTLE_SUPPLY_INTERVAL: Duration = Duration::from_secs(2);
const LITTLE_SUPPLY_AMOUNT: Currency = Currency::from_coins(1_000);

/// Periodically sends a fixed amount to one address whenever the wallet can
/// cover it.
///
/// `bigspender` moves large sums rarely, `littlesupplier` trickles small
/// sums often.
#[derive(Debug, Clone)]
pub struct Spender {
    name: &'static str,
    destination: String,
    amount: Currency,
    interval: Duration,
}

impl Spender {
    pub fn big(destination: String) -> Self {
        Self {
            name: BIG_SPENDER,
            destination,
            amount: BIG_SPEND_AMOUNT,
            interval: BIG_SPEND_INTERVAL,
        }
    }

    pub fn little(destination: String) -> Self {
        Self {
            name: LITTLE_SUPPLIER,
            destination,
            amount: LITTLE_SUPPLY_AMOUNT,
            interval: LITTLE_SUPPLY_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_amount(mut self, amount: Currency) -> Self {
        self.amount = amount;
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

#[async_trait]
impl Job for Spender {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(self: Box<Self>, ctx: JobContext) -> Result<()> {
        loop {
            ctx.sleep(self.interval).await?;

            let balance = ctx.client.confirmed_balance().await?;
            if balance < self.amount {
                debug!(
                    "[{} {}] balance {} cannot cover {}",
                    ctx.label, self.name, balance, self.amount
                );
                continue;
            }

            match ctx.client.send_siacoins(self.amount, &self.destination).await {
                Ok(()) => info!(
                    "[{} {}] sent {} to {}",
                    ctx.label, self.name, self.amount, self.destination
                ),
                Err(e) => warn!("[{} {}] send failed: {}", ctx.label, self.name, e),
            }
        }
    }
}
