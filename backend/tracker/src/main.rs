//! FoodLink tracker — entry point.
//!
//! Serves the donation lifecycle over an Axum REST API backed by SQLite and
//! runs one background tracking loop per en-route pickup, moving the
//! acceptor's position either from an external feed or by simulation.

mod api;
mod config;
mod db;
mod errors;
mod location;
mod scheduler;
mod service;
mod store;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use db::SqliteDonationStore;
use location::{HttpLocationSource, LocationSource, SimulatedLocationSource};
use scheduler::TrackingScheduler;
use service::DonationService;
use store::DonationStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;
    let store: Arc<dyn DonationStore> = Arc::new(SqliteDonationStore::new(pool));

    let tracking_interval = Duration::from_secs(config.tracking_interval_secs);
    let locations: Arc<dyn LocationSource> = match &config.location_feed_url {
        Some(url) => {
            let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
            info!("Acceptor positions from {url}");
            Arc::new(HttpLocationSource::new(client, url.clone()))
        }
        None => {
            info!(
                "Simulating acceptor movement at {} km/h",
                config.tracking_speed_kmh
            );
            Arc::new(SimulatedLocationSource::new(
                config.tracking_speed_kmh,
                tracking_interval,
            ))
        }
    };

    // ─── Tracking ─────────────────────────────────────────
    let scheduler = Arc::new(TrackingScheduler::new(
        Arc::clone(&store),
        locations,
        tracking_interval,
        Duration::from_secs(config.pending_refresh_secs),
    ));
    let service = Arc::new(DonationService::new(
        store,
        Arc::clone(&scheduler),
        config.tracking_speed_kmh,
    ));
    if let Err(e) = service.resume_all_tracking().await {
        warn!("Could not resume tracking: {e}");
    }

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(api::ApiState {
        service,
        default_radius_km: config.default_radius_km,
    }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
            // Ends tracking loops and every open event stream.
            scheduler.shutdown();
        })
        .await?;

    Ok(())
}
