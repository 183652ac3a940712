//! Prediction Market Indexer API server
//!
//! Wires the pipeline together: storage, backfill, bus, ingesters,
//! aggregator, WebSocket hub and the HTTP query surface. Owns the
//! shutdown order: ingesters stop first, the bus drains, the hub closes
//! its connections, the server exits, storage drops last.

mod config;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use indexer_kalshi::KalshiClient;
use indexer_polymarket::{
    http_url_from_ws, ChainLogStream, ChainStreamConfig, GammaClient, RpcHttpClient,
};
use indexer_services::{
    run_backfill, CandleAggregator, HubConfig, KalshiIngester, KalshiIngesterConfig,
    MetadataCache, PerfTracker, PolymarketIngester, TradeBus, TradeHub,
};
use indexer_storage::StorageGateway;

use crate::config::Config;

/// How long each pipeline stage gets to drain on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<StorageGateway>,
    pub hub: Arc<TradeHub>,
    pub perf: Arc<PerfTracker>,
    pub metadata: Arc<MetadataCache>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,indexer_api=debug")),
        )
        .init();

    info!("Starting Prediction Market Indexer");
    let config = Config::from_env()?;

    // Storage first; everything else depends on it
    let storage = Arc::new(StorageGateway::open(&config.database_url)?);
    storage.ping()?;
    info!("Storage ready at {}", config.database_url);

    // Backfill completes before any ingester starts, so live events
    // never race a rebuild over the same bucket
    let rebuilt = run_backfill(&storage)?;
    info!("Backfill rebuilt {} candles", rebuilt);

    let bus = Arc::new(TradeBus::new());
    let perf = Arc::new(PerfTracker::new());
    let hub = Arc::new(TradeHub::new(HubConfig::default()));
    let aggregator = Arc::new(CandleAggregator::new(Arc::clone(&storage)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Consumers subscribe before producers start
    let aggregator_task = tokio::spawn(Arc::clone(&aggregator).run(
        bus.subscribe("aggregator", 4096),
        shutdown_rx.clone(),
    ));
    let hub_task = tokio::spawn(
        Arc::clone(&hub).dispatch(bus.subscribe("hub", 4096), shutdown_rx.clone()),
    );

    // Kalshi ingester
    let kalshi_client = KalshiClient::new(config.kalshi_credentials.clone());
    if !kalshi_client.is_authenticated() {
        info!("No Kalshi credentials; polling public endpoints unauthenticated");
    }
    let kalshi_ingester = Arc::new(KalshiIngester::new(
        kalshi_client.clone(),
        Arc::clone(&storage),
        Arc::clone(&bus),
        Arc::clone(&perf),
        KalshiIngesterConfig {
            markets: config.kalshi_markets.clone(),
            ..KalshiIngesterConfig::default()
        },
    ));
    let kalshi_task = tokio::spawn(kalshi_ingester.run(shutdown_rx.clone()));

    // Polymarket ingester, only when a chain endpoint is configured
    let polymarket_task = match config.alchemy_ws_url {
        Some(ref ws_url) => {
            let (stream, events) = ChainLogStream::new(ChainStreamConfig {
                ws_url: ws_url.clone(),
            });
            stream.start(shutdown_rx.clone());

            let ingester = Arc::new(PolymarketIngester::new(
                Arc::clone(&storage),
                Arc::clone(&bus),
                Arc::clone(&perf),
                RpcHttpClient::new(http_url_from_ws(ws_url)),
            ));
            Some(tokio::spawn(ingester.run(events, shutdown_rx.clone())))
        }
        None => {
            warn!("ALCHEMY_WS_URL not set; Polymarket ingestion disabled");
            None
        }
    };

    let metadata = Arc::new(MetadataCache::new(kalshi_client, GammaClient::new()));

    let state = AppState {
        storage: Arc::clone(&storage),
        hub: Arc::clone(&hub),
        perf: Arc::clone(&perf),
        metadata,
    };

    let cors = match config.frontend_url {
        Some(ref origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .map_err(|e| anyhow::anyhow!("invalid FRONTEND_URL: {}", e))?;
            CorsLayer::new()
                .allow_origin(AllowOrigin::list([origin]))
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE])
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]),
    };

    let app = Router::new()
        .merge(routes::api_routes())
        .merge(routes::ws_routes())
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    let (server_stop_tx, server_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = server_stop_rx.await;
        });
        if let Err(e) = server.await {
            warn!("server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Stage 1: producers stop polling/subscribing and drain in-flight
    // persistence
    let _ = shutdown_tx.send(true);
    join_with_grace("kalshi ingester", kalshi_task).await;
    if let Some(task) = polymarket_task {
        join_with_grace("polymarket ingester", task).await;
    }

    // Stage 2: no more publishes; close the bus so consumers drain and
    // return
    bus.close();
    join_with_grace("aggregator", aggregator_task).await;
    join_with_grace("hub", hub_task).await;

    // Stage 3: stop accepting HTTP, then let storage drop last
    let _ = server_stop_tx.send(());
    join_with_grace("server", server_task).await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for a task within the grace period, aborting it if it overruns
async fn join_with_grace(name: &str, mut task: JoinHandle<()>) {
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("{} task failed: {}", name, e),
        Err(_) => {
            warn!("{} did not stop within {:?}, aborting", name, SHUTDOWN_GRACE);
            task.abort();
        }
    }
}
