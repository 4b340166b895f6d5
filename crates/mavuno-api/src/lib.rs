pub mod auth;
pub mod error;
pub mod escrow;
pub mod listings;
pub mod middleware;
pub mod orders;
pub mod profile;

use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};

use crate::auth::AppState;

/// All marketplace routes, public and authenticated, with state applied.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/listings", get(listings::list_listings))
        .route("/listings/{id}", get(listings::get_listing))
        .route("/listings/{id}/location", get(listings::get_location))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/listings", post(listings::create_listing))
        .route("/listings/{id}", delete(listings::delete_listing))
        .route("/listings/{id}/checkout", post(orders::checkout))
        .route("/orders", get(orders::list_orders))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/payment", post(orders::check_payment))
        .route("/orders/{id}/release", post(orders::release))
        .route("/orders/{id}/cancel", post(orders::cancel))
        .route("/me", get(profile::get_profile).patch(profile::update_profile))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
