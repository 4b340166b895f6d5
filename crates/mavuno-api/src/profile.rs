use axum::{Extension, Json, extract::State, response::IntoResponse};

use mavuno_types::api::{Claims, ProfileResponse, UpdateProfileRequest};
use mavuno_types::models::UserRole;
use mavuno_types::validation;

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;
use crate::orders::orders_for;

fn load_profile(state: &AppStateInner, claims: &Claims) -> Result<ProfileResponse, ApiError> {
    let user = state
        .db
        .get_user_by_id(&claims.sub.to_string())?
        .ok_or(ApiError::Unauthorized)?
        .into_user()?;

    let orders = orders_for(state, user.id, user.role)?;
    let listings = match user.role {
        UserRole::Farmer => Some(
            state
                .db
                .listings_for_farmer(&user.id.to_string())?
                .into_iter()
                .map(|row| row.into_listing())
                .collect::<anyhow::Result<Vec<_>>>()?,
        ),
        UserRole::Buyer => None,
    };

    Ok(ProfileResponse {
        user,
        orders,
        listings,
    })
}

/// GET /me: the signed-in user with statistics, orders and listings.
pub async fn get_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_profile(&state, &claims)?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(name) = &req.name {
        validation::name(name)?;
    }
    if let Some(phone) = &req.phone {
        validation::phone(phone)?;
    }

    let updated = state.db.update_profile(
        &claims.sub.to_string(),
        req.name.as_deref().map(str::trim),
        req.phone.as_deref(),
    )?;
    if !updated {
        return Err(ApiError::Unauthorized);
    }

    Ok(Json(load_profile(&state, &claims)?))
}
