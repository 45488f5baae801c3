use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info, warn};

use thermostat_common::{BusHandle, Event, ThermostatCore};

const MIN_POLL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    #[serde(rename = "nextUpdateSeconds")]
    pub next_update_secs: u64,
}

impl PriceQuote {
    pub fn into_event(self) -> Event {
        Event::PowerPriceChanged {
            price: self.price,
            next_update_secs: self.next_update_secs,
        }
    }

    pub fn next_poll(&self) -> Duration {
        Duration::from_secs(self.next_update_secs.max(MIN_POLL_SECS))
    }
}

pub struct PriceFeed {
    http: reqwest::Client,
    url: String,
    retry: Duration,
}

impl PriceFeed {
    pub fn new(url: impl Into<String>, retry_secs: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build price feed HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
            retry: Duration::from_secs(retry_secs),
        })
    }

    pub async fn fetch(&self) -> anyhow::Result<PriceQuote> {
        let quote = self
            .http
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("price request to {} failed", self.url))?
            .error_for_status()?
            .json::<PriceQuote>()
            .await
            .context("price response did not parse")?;
        anyhow::ensure!(quote.price.is_finite(), "price {} is not finite", quote.price);
        Ok(quote)
    }

    /// Fetches until the loop stops, firing `PowerPriceChanged` on each quote.
    pub async fn run(self, bus: BusHandle<ThermostatCore>) {
        info!(url = %self.url, "price feed started");
        while !bus.is_stopped() {
            let wait = match self.fetch().await {
                Ok(quote) => {
                    debug!(price = quote.price, next = quote.next_update_secs, "price quote");
                    let wait = quote.next_poll();
                    bus.fire_event(quote.into_event());
                    wait
                }
                Err(err) => {
                    warn!("price feed error, retrying in {:?}: {err:#}", self.retry);
                    self.retry
                }
            };
            tokio::time::sleep(wait).await;
        }
        info!("price feed stopped");
    }
}
