use clap::Parser;
use tokio_util::sync::CancellationToken;

mod config;
mod error;
mod gateway;
mod metrics;
mod relay;
mod signal;

use config::{Cli, RelayConfig};
use gateway::pushgateway::Pushgateway;
use metrics::http::HttpScraper;
use relay::Relay;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let config = match RelayConfig::resolve(cli, |name| std::env::var(name).ok()) {
        Ok(config) => config,
        Err(err) => {
            log::error!("Invalid configuration: {err}");
            return Err(err.into());
        }
    };
    config.log_startup();

    let client = reqwest::Client::builder()
        .user_agent(concat!("push-proxy/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let scraper = HttpScraper::new(client.clone(), config.target.target_addr.clone());
    let pusher = Pushgateway::new(
        client,
        config.push_url.clone(),
        config.target.credentials.clone(),
        &config.identity.job,
        &config.identity.instance,
    );
    let relay = Relay::new(scraper, pusher, &config);

    let shutdown = CancellationToken::new();
    let signal_future = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            signal::wait_terminate().await;
            log::info!("Application stopping");
            shutdown.cancel();
        }
    });

    relay.run(shutdown).await;

    signal_future.abort();
    _ = signal_future.await;

    log::info!("Application stopped");

    Ok(())
}
