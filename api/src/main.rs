use std::sync::Arc;

use anyhow::Context;
use chain_api::batching::{self, RollupQueue};
use chain_api::config::{Args, Settings};
use chain_api::db::{self, PgStore};
use chain_api::memory::{MemoryEntityStore, MemoryTimeSeries};
use chain_api::metrics;
use chain_api::mqtt::MqttPublisher;
use chain_api::publish::{EventPublisher, LogPublisher, Publisher};
use chain_api::rest::{self, AppState};
use chain_api::store::{EntityStore, TimeSeriesStore};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    info!("Starting Chain API");
    info!("HTTP server: {}", args.http_addr);
    info!("Local time zone: {}", args.time_zone);

    metrics::init_metrics().context("registering metrics")?;

    let (entities, series): (Arc<dyn EntityStore>, Arc<dyn TimeSeriesStore>) =
        match &args.database_url {
            Some(url) => {
                info!("Database: {}", url.split('@').last().unwrap_or("***"));
                let pool = db::make_pool(url)
                    .await
                    .context("connecting to database")?;
                let store = Arc::new(PgStore::new(pool));
                (
                    store.clone() as Arc<dyn EntityStore>,
                    store as Arc<dyn TimeSeriesStore>,
                )
            }
            None => {
                warn!("DATABASE_URL not set, keeping all data in memory");
                (
                    Arc::new(MemoryEntityStore::new()) as Arc<dyn EntityStore>,
                    Arc::new(MemoryTimeSeries::new()) as Arc<dyn TimeSeriesStore>,
                )
            }
        };

    let transport: Arc<dyn Publisher> = match &args.mqtt_broker {
        Some(broker) => {
            info!("MQTT broker: {}:{}", broker, args.mqtt_port);
            let client_id = format!("chain-api-{}", uuid::Uuid::new_v4());
            Arc::new(MqttPublisher::connect(
                broker,
                args.mqtt_port,
                client_id,
                args.topic_root.clone(),
            ))
        }
        None => {
            warn!("MQTT_BROKER not set, change notifications will only be logged");
            Arc::new(LogPublisher)
        }
    };

    info!("Rollup queue capacity: {}", args.rollup_queue);
    let (rollups, rx) = RollupQueue::channel(args.rollup_queue);
    let batcher_series = series.clone();
    let (rollup_batch, rollup_interval_ms) = (args.rollup_batch, args.rollup_interval_ms);
    let batcher_handle = tokio::spawn(async move {
        batching::run_batcher(rx, batcher_series, rollup_batch, rollup_interval_ms).await;
    });

    let state = AppState::new(
        entities,
        series,
        EventPublisher::new(transport),
        rollups,
        Settings::from(&args),
    );
    let app = rest::create_router(state);

    let listener = tokio::net::TcpListener::bind(&args.http_addr)
        .await
        .with_context(|| format!("binding to {}", args.http_addr))?;
    info!("HTTP server listening on {}", args.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = batcher_handle => {
            error!("Rollup worker terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    Ok(())
}
