//! Paywatch Server
//!
//! Watches EVM chains for stablecoin transfers into derived deposit wallets
//! and settles payment orders against them.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use anyhow::Context;
use clap::Parser;
use config::{ConfigLoader, LoadedConfig, get_database_url};
use paywatch_core::cache::CachedPaymentStore;
use paywatch_core::chain::RpcChainClient;
use paywatch_core::config::{ConfigStore, MatchingConfig};
use paywatch_core::events::{chain_event_channel, order_status_channel};
use paywatch_core::orders::OrderService;
use paywatch_core::processors::{
    ChainPoller, EventConsumer, ExpiredOrderCatchup, ExpirySweeper, OrderCleaner, PaymentMatcher,
    WebhookSender,
};
use paywatch_core::store::PgPaymentStore;
use paywatch_core::wallet_pool::WalletPool;
use paywatch_core::working_set::WorkingSet;
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler, wait_for_shutdown};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// How long background tasks get to finish after the HTTP server stops.
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Paywatch - EVM payment detection service
#[derive(Parser, Debug)]
#[command(name = "paywatch-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./paywatch.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,

    /// Wallet mnemonic; overrides `[wallet] mnemonic`
    #[arg(long, env = "WALLET_MNEMONIC", hide_env_values = true)]
    mnemonic: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting paywatch-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(
        &args.config,
        args.listen,
        args.mnemonic.clone(),
    ));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!(
        networks = loaded_config.networks.len(),
        "Configuration loaded from {:?}",
        args.config
    );

    let address = loaded_config
        .wallet
        .deriver
        .validate()
        .context("wallet mnemonic cannot derive addresses")?;
    tracing::debug!(%address, "Wallet derivation checked");

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state, mut tasks, matching) = start_pipeline(&loaded_config, db_pool.clone(), &shutdown_rx)
        .await
        .context("failed to start the payment pipeline")?;

    spawn_config_reload_handler(config_loader, matching, shutdown_rx.clone());

    let router = build_router(state);
    tracing::info!("Starting HTTP server on {}", loaded_config.listen);
    let serve_shutdown = {
        let shutdown_tx = shutdown_tx.clone();
        let shutdown_rx = shutdown_rx.clone();
        async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    let _ = shutdown_tx.send(true);
                }
                _ = wait_for_shutdown(shutdown_rx) => {}
            }
        }
    };
    let result = run_server(router, loaded_config.listen, serve_shutdown).await;

    // Stop background tasks whether the server exited cleanly or not.
    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(TASK_SHUTDOWN_GRACE, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Background task failed");
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            remaining = tasks.len(),
            "Background tasks did not stop in time, aborting"
        );
        tasks.abort_all();
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

type Store = CachedPaymentStore<PgPaymentStore>;

/// Wire every network's poller, consumer, sweeper and late payment catch-up
/// plus the shared cleaner and webhook sender.
async fn start_pipeline(
    config: &LoadedConfig,
    db_pool: sqlx::PgPool,
    shutdown_rx: &watch::Receiver<bool>,
) -> anyhow::Result<(AppState<Store>, JoinSet<()>, ConfigStore<MatchingConfig>)> {
    let store: Store = CachedPaymentStore::new(PgPaymentStore::new(db_pool));
    let matching = ConfigStore::new(config.matching.clone());
    let working_set_size = config.matching.working_set_size;

    let wallet_pool = WalletPool::new(config.wallet.deriver.clone());
    let created = wallet_pool
        .initialize(&store, config.wallet.initial_pool_size)
        .await?;
    if created > 0 {
        tracing::info!(created, "Derived initial deposit wallets");
    }

    let (status_tx, status_rx) = order_status_channel();
    let mut tasks = JoinSet::new();
    let mut orders = OrderService::new(store.clone(), wallet_pool, matching.clone());

    for network in &config.networks {
        let registry = network
            .registry()
            .with_context(|| format!("invalid contracts for {}", network.network))?;
        let working_set = WorkingSet::shared(network.network, working_set_size);
        orders = orders.with_network(network.network, network.tokens.clone(), working_set.clone());

        let client = RpcChainClient::http(network.rpc_url.clone());
        let (event_tx, event_rx) = chain_event_channel(config.event_channel_capacity);
        let poller = ChainPoller::new(
            network.network,
            client.clone(),
            store.clone(),
            Arc::new(registry),
            config.poller_for(network),
            event_tx,
            shutdown_rx.clone(),
        );
        let matcher = PaymentMatcher::new(
            store.clone(),
            working_set.clone(),
            matching.clone(),
            status_tx.clone(),
        );
        let catchup = ExpiredOrderCatchup::new(
            network.network,
            client,
            store.clone(),
            matcher.clone(),
            &network.tokens,
            config.catchup.clone(),
        );
        let consumer = EventConsumer::new(
            network.network,
            store.clone(),
            matcher,
            event_rx,
            shutdown_rx.clone(),
        );
        let sweeper = ExpirySweeper::new(network.network, store.clone(), working_set, status_tx.clone());
        let loaded = sweeper.refill().await?;
        tracing::info!(network = %network.network, loaded, "Working set loaded");

        tasks.spawn(poller.run());
        tasks.spawn(consumer.run());
        tasks.spawn(catchup.run(shutdown_rx.clone()));
        tasks.spawn(sweeper.run(
            config.maintenance.sweep_interval,
            matching.clone(),
            shutdown_rx.clone(),
        ));
    }

    let cleaner = OrderCleaner::new(store.clone(), config.maintenance.clone(), status_tx);
    tasks.spawn(cleaner.run(shutdown_rx.clone()));
    let webhooks = WebhookSender::new(
        store.clone(),
        config.webhook.clone(),
        status_rx,
        shutdown_rx.clone(),
    );
    tasks.spawn(webhooks.run());

    let state = AppState::new(orders, config.networks.iter().map(|n| n.network));
    Ok((state, tasks, matching))
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
