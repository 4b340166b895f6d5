use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use mavuno_db::ListingFilter;
use mavuno_db::queries::NewListing;
use mavuno_types::api::{Claims, CreateListingRequest, ListingQuery, LocationResponse};
use mavuno_types::catalog;
use mavuno_types::models::{HarvestListing, UserRole};
use mavuno_types::validation;

use crate::auth::AppState;
use crate::error::ApiError;

fn load_listing(state: &AppState, id: Uuid) -> Result<HarvestListing, ApiError> {
    let listing = state
        .db
        .get_listing(&id.to_string())?
        .ok_or(ApiError::NotFound("listing"))?
        .into_listing()?;
    Ok(listing)
}

/// GET /listings: marketplace view, optionally filtered by county and crop.
pub async fn list_listings(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = ListingFilter {
        county: query.county.filter(|c| !c.is_empty()),
        search: query.search,
    };
    let listings = state
        .db
        .list_listings(&filter)?
        .into_iter()
        .map(|row| row.into_listing())
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Json(listings))
}

pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_listing(&state, id)?))
}

/// GET /listings/{id}/location: where the farm is and how saturated the
/// local market is.
pub async fn get_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = load_listing(&state, id)?;
    let coordinates = listing.coordinates.unwrap_or(catalog::DEFAULT_COORDINATES);

    Ok(Json(LocationResponse {
        listing_id: listing.id,
        crop_type: listing.crop_type,
        county: listing.location,
        coordinates,
        saturation_level: listing.saturation_level,
        map_url: catalog::map_url(coordinates),
    }))
}

pub async fn create_listing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateListingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.role != UserRole::Farmer {
        return Err(ApiError::Forbidden("only farmers can list a harvest"));
    }
    validation::crop(&req.crop_type)?;
    validation::county(&req.county)?;
    validation::positive("quantity_kg", req.quantity_kg)?;
    validation::positive("price_per_kg", req.price_per_kg)?;
    if let Some(coordinates) = &req.coordinates {
        validation::coordinates(coordinates)?;
    }

    let listing_id = Uuid::new_v4();
    let saturation = state.db.insert_listing(&NewListing {
        id: &listing_id.to_string(),
        farmer_id: &claims.sub.to_string(),
        crop_type: &req.crop_type,
        quantity_kg: req.quantity_kg,
        location: &req.county,
        lat: req.coordinates.map(|c| c.lat),
        lng: req.coordinates.map(|c| c.lng),
        grade: req.grade,
        price_per_kg: req.price_per_kg,
        image_url: req.image_url.as_deref(),
    })?;
    info!(
        "Farmer {} listed {} kg of {} in {} (supply {})",
        claims.sub, req.quantity_kg, req.crop_type, req.county, saturation
    );

    Ok((StatusCode::CREATED, Json(load_listing(&state, listing_id)?)))
}

/// DELETE /listings/{id}: owner only. Existing orders are kept.
pub async fn delete_listing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = load_listing(&state, id)?;
    if listing.farmer_id != claims.sub {
        return Err(ApiError::Forbidden("only the owner can remove a listing"));
    }

    if !state
        .db
        .delete_listing(&id.to_string(), &claims.sub.to_string())?
    {
        return Err(ApiError::NotFound("listing"));
    }
    info!("Farmer {} removed listing {}", claims.sub, id);

    Ok(StatusCode::NO_CONTENT)
}
