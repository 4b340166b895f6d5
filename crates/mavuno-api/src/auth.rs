use std::sync::Arc;
use std::time::Duration;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::{info, warn};
use uuid::Uuid;

use mavuno_db::Database;
use mavuno_payments::PaymentProvider;
use mavuno_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use mavuno_types::models::User;
use mavuno_types::validation;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub payments: Arc<dyn PaymentProvider>,
    /// How long an STK push may stay unanswered before the order is dropped.
    pub payment_timeout: Duration,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validation::name(&req.name)?;
    validation::email(&req.email)?;
    validation::phone(&req.phone)?;
    validation::password(&req.password)?;

    let email = normalize_email(&req.email);

    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(email_taken());
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    // The lookup above can lose a race with a concurrent registration.
    if !state.db.create_user(
        &user_id.to_string(),
        req.name.trim(),
        &email,
        &req.phone,
        req.role,
        &password_hash,
    )? {
        return Err(email_taken());
    }

    let user = state
        .db
        .get_user_by_id(&user_id.to_string())?
        .ok_or_else(|| anyhow::anyhow!("user {} missing after insert", user_id))?
        .into_user()?;

    let token = create_token(&state.jwt_secret, &user)?;
    info!("Registered {} {}", user.role, user.id);

    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .db
        .get_user_by_email(&normalize_email(&req.email))?
        .ok_or(ApiError::Unauthorized)?;

    // Accounts without a usable hash (the seeded demo farmer) cannot log in.
    let parsed_hash = PasswordHash::new(&row.password).map_err(|_| {
        warn!("Login attempt for account {} without a password hash", row.id);
        ApiError::Unauthorized
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user = row.into_user()?;
    let token = create_token(&state.jwt_secret, &user)?;

    Ok(Json(AuthResponse { user, token }))
}

fn email_taken() -> ApiError {
    ApiError::Conflict("user with this email already exists".into())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn create_token(secret: &str, user: &User) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        name: user.name.clone(),
        role: user.role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
