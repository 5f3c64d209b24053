use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    config::RelayConfig, error::RelayError, gateway::MetricsPusher, metrics::MetricsScraper,
};

/// Periodically scrap a target and push its metrics to a gateway
pub struct Relay<S, P> {
    scraper: S,
    pusher: P,
    /// Period between two cycles
    interval: Duration,
    /// Deadline of a single cycle
    cycle_timeout: Duration,
    /// Deadline of the cleanup request
    cleanup_timeout: Duration,
    /// Delete the grouping key from the gateway on shutdown
    auto_cleanup: bool,
}

impl<S, P> Relay<S, P>
where
    S: MetricsScraper + Sync,
    P: MetricsPusher + Sync,
{
    /// Create a new [`Relay`] with the timings of `config`
    pub fn new(scraper: S, pusher: P, config: &RelayConfig) -> Self {
        Self {
            scraper,
            pusher,
            interval: config.interval,
            cycle_timeout: config.cycle_timeout,
            cleanup_timeout: config.cleanup_timeout,
            auto_cleanup: config.auto_cleanup,
        }
    }

    /// Run a single scrap and push cycle
    ///
    /// Nothing is pushed if the scrap fails.
    pub async fn cycle(&self) -> Result<(), RelayError> {
        let payload = self.scraper.scrape().await?;
        self.pusher.push(payload).await
    }

    /// Run cycles until `shutdown` is cancelled, then clean up the gateway
    ///
    /// Cycles never overlap: ticks missed while a cycle is running are skipped.
    /// Cycle errors are logged and the relay waits for the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!("Relay running");

        loop {
            // Shutdown has priority over a ready tick
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let cycle = tokio::time::timeout(self.cycle_timeout, self.cycle());
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!("Shutdown requested, abandoning current cycle");
                    break;
                }
                result = cycle => result.unwrap_or_else(|_| Err(RelayError::Timeout {
                    operation: "scrap and push cycle",
                    after: self.cycle_timeout,
                })),
            };

            if let Err(err) = result {
                log::error!("{err}");
            }
        }

        log::info!("Shutting down push-proxy");

        if self.auto_cleanup {
            if let Err(err) = self.cleanup().await {
                log::error!("{err}");
            }
        }
    }

    /// Delete the grouping key from the gateway
    ///
    /// Runs under its own deadline, as the shutdown token is already cancelled.
    pub async fn cleanup(&self) -> Result<(), RelayError> {
        match tokio::time::timeout(self.cleanup_timeout, self.pusher.delete()).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout {
                operation: "Pushgateway cleanup",
                after: self.cleanup_timeout,
            }),
        }
    }
}
