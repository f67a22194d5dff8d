// region:    --- Imports
use crate::broadcast::KafkaBroadcaster;
use crate::config::EngineConfig;
use crate::database::DatabaseManager;
use crate::ledger::pg::{PgCreditLedger, PgItemRegistry};
use crate::service::AuctionService;
use crate::store::PgAuctionStore;
use crate::sweeper::ExpirySweeper;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
// endregion: --- Imports

// region:    --- Modules
mod auction;
mod broadcast;
mod config;
mod database;
mod error;
mod handlers;
mod ledger;
mod service;
mod store;
mod sweeper;

// endregion: --- Modules

// region:    --- Main
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();

    let db_manager = DatabaseManager::new().await?;
    if let Err(e) = db_manager.initialize_database().await {
        error!("{:<12} --> database initialization failed: {:?}", "Main", e);
        return Err(e.into());
    }
    info!("{:<12} --> database ready", "Main");

    let pool = db_manager.get_pool();
    let store = Arc::new(PgAuctionStore::new(Arc::clone(&pool)));
    let ledger = Arc::new(PgCreditLedger::new(
        Arc::clone(&pool),
        config.marketplace_account_id,
    ));
    let registry = Arc::new(PgItemRegistry::new(Arc::clone(&pool)));

    let brokers = std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
    let broadcaster = KafkaBroadcaster::new(&brokers)?;
    broadcaster.create_topic(5, 1).await?;
    info!("{:<12} --> kafka ready on {}", "Main", brokers);

    let service = Arc::new(AuctionService::new(
        store,
        ledger,
        registry,
        Arc::new(broadcaster),
        config,
    ));

    let sweeper = ExpirySweeper::new(Arc::clone(&service));
    sweeper.start();
    info!("{:<12} --> expiry sweeper started", "Main");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let routes_all = Router::new()
        .route(
            "/auctions",
            post(handlers::handle_create_auction).get(handlers::handle_list_active),
        )
        .route("/auctions/:id", get(handlers::handle_get_listing))
        .route(
            "/auctions/:id/bids",
            post(handlers::handle_place_bid).get(handlers::handle_bid_history),
        )
        .route("/auctions/:id/buyout", post(handlers::handle_buyout))
        .route("/auctions/:id/cancel", post(handlers::handle_cancel))
        .layer(cors)
        .with_state(Arc::clone(&service));

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    if let Err(err) = axum::serve(listener, routes_all.into_make_service()).await {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}
// endregion: --- Main
