// region:    --- Imports
use crate::auction::model::{
    ActiveFilter, Bid, BuyoutCommand, CancelCommand, CreateAuctionCommand, Listing,
    PlaceBidCommand,
};
use crate::error::AuctionError;
use crate::service::AuctionService;
use axum::extract::{Path, Query, State};
use axum::Json;
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

pub type AppState = Arc<AuctionService>;

// region:    --- Command Handlers

pub async fn handle_create_auction(
    State(service): State<AppState>,
    Json(cmd): Json<CreateAuctionCommand>,
) -> Result<Json<Listing>, AuctionError> {
    info!("{:<12} --> create auction request: {:?}", "Handler", cmd);
    let listing = service.create_auction(cmd).await?;
    Ok(Json(listing))
}

pub async fn handle_place_bid(
    State(service): State<AppState>,
    Path(listing_id): Path<i64>,
    Json(cmd): Json<PlaceBidCommand>,
) -> Result<Json<Listing>, AuctionError> {
    info!(
        "{:<12} --> bid request on listing {}: {:?}",
        "Handler", listing_id, cmd
    );
    let listing = service.place_bid(listing_id, cmd).await?;
    Ok(Json(listing))
}

pub async fn handle_buyout(
    State(service): State<AppState>,
    Path(listing_id): Path<i64>,
    Json(cmd): Json<BuyoutCommand>,
) -> Result<Json<Listing>, AuctionError> {
    info!(
        "{:<12} --> buyout request on listing {}: {:?}",
        "Handler", listing_id, cmd
    );
    let listing = service.execute_buyout(listing_id, cmd).await?;
    Ok(Json(listing))
}

pub async fn handle_cancel(
    State(service): State<AppState>,
    Path(listing_id): Path<i64>,
    Json(cmd): Json<CancelCommand>,
) -> Result<Json<Listing>, AuctionError> {
    info!(
        "{:<12} --> cancel request on listing {}: {:?}",
        "Handler", listing_id, cmd
    );
    let listing = service.cancel_auction(listing_id, cmd).await?;
    Ok(Json(listing))
}

// endregion: --- Command Handlers

// region:    --- Query Handlers

pub async fn handle_get_listing(
    State(service): State<AppState>,
    Path(listing_id): Path<i64>,
) -> Result<Json<Listing>, AuctionError> {
    info!("{:<12} --> get listing {}", "Handler", listing_id);
    let listing = service.get_listing(listing_id).await?;
    Ok(Json(listing))
}

pub async fn handle_list_active(
    State(service): State<AppState>,
    Query(filter): Query<ActiveFilter>,
) -> Result<Json<Vec<Listing>>, AuctionError> {
    info!("{:<12} --> list active: {:?}", "Handler", filter);
    let listings = service.list_active(&filter).await?;
    Ok(Json(listings))
}

pub async fn handle_bid_history(
    State(service): State<AppState>,
    Path(listing_id): Path<i64>,
) -> Result<Json<Vec<Bid>>, AuctionError> {
    info!("{:<12} --> bid history for listing {}", "Handler", listing_id);
    let bids = service.bid_history(listing_id).await?;
    Ok(Json(bids))
}

// endregion: --- Query Handlers
