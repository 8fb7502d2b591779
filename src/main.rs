use chain_sync_engine::engine::fees::{FeeEstimator, FeeRate, OperationKind};
use chain_sync_engine::engine::persistence::FileWalletStateRepository;
use chain_sync_engine::engine::types::{EngineCallbacks, Transaction};
use chain_sync_engine::engine::{EngineConfig, WalletEngine};
use chain_sync_engine::source::{EndpointConfig, MidgardNormalizer, MidgardSource, SourceClient};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Callback implementation that narrates engine events to the log.
struct LogCallbacks;

impl EngineCallbacks for LogCallbacks {
    fn on_transactions_changed(&self, transactions: &[Transaction]) {
        info!("{} transaction(s) changed", transactions.len());
        for tx in transactions {
            info!(
                "  {} height={} amount={} fee={}",
                tx.id, tx.block_height, tx.amount, tx.fee
            );
        }
    }

    fn on_balance_changed(&self, asset: &str, balance: i128) {
        info!("Balance changed: {} = {}", asset, balance);
    }

    fn on_block_height_changed(&self, height: u64) {
        info!("Block height: {}", height);
    }

    fn on_addresses_checked(&self, progress: f64) {
        info!("Sync progress: {:.0}%", progress * 100.0);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::time())
        .init();

    info!("Starting wallet sync engine");

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "thor1g98cy3n9mmjrpn0sxmn63lztelera37n8n67c0".to_string());

    let mut endpoints = vec![EndpointConfig::new("https://midgard.ninerealms.com")];
    if let Ok(api_key) = std::env::var("MIDGARD_API_KEY") {
        endpoints.insert(
            0,
            EndpointConfig::new("https://midgard.thorchain.info").with_header("x-api-key", api_key),
        );
    }

    let client = SourceClient::new(endpoints);
    let chain_source = Arc::new(MidgardSource::new(client, address.clone()));
    let normalizer = Arc::new(MidgardNormalizer::new("THOR.RUNE", address.clone()));
    let repository = Arc::new(FileWalletStateRepository::new(
        PathBuf::from("./wallet-data"),
        address.clone(),
    ));

    // Flat transfer fee of 0.02 RUNE, overestimated by 1% because the
    // exact fee is only known once the chain confirms.
    let mut rates = HashMap::new();
    rates.insert(
        OperationKind::Transfer,
        FeeRate {
            flat: 2_000_000,
            proportional_bps: 0,
        },
    );
    let fee_estimator = FeeEstimator::new(rates, 10_100);

    let config = EngineConfig::new("THOR.RUNE", address);

    let engine = WalletEngine::new(
        config,
        chain_source,
        normalizer,
        repository,
        Arc::new(LogCallbacks),
        fee_estimator,
    );

    if let Err(e) = engine.start_engine().await {
        error!("Failed to start wallet engine: {}", e);
        return;
    }

    info!("Engine running, press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    if let Err(e) = engine.kill_engine().await {
        error!("Failed to stop wallet engine cleanly: {}", e);
    }
}
