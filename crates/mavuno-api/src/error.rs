use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use mavuno_types::api::ErrorBody;
use mavuno_types::validation::ValidationError;

use crate::escrow::EscrowError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid or missing credentials")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Escrow(e) => escrow_status(e),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn escrow_status(err: &EscrowError) -> StatusCode {
    match err {
        EscrowError::ListingNotFound | EscrowError::OrderNotFound => StatusCode::NOT_FOUND,
        EscrowError::NotBuyer
        | EscrowError::OwnListing
        | EscrowError::NotParticipant
        | EscrowError::BuyerOnly => StatusCode::FORBIDDEN,
        EscrowError::InvalidQuantity { .. }
        | EscrowError::Validation(_)
        | EscrowError::HandshakeMismatch => StatusCode::BAD_REQUEST,
        EscrowError::InsufficientStock { .. }
        | EscrowError::InvalidTransition { .. }
        | EscrowError::SettlementInProgress => StatusCode::CONFLICT,
        EscrowError::PaymentRejected(_) | EscrowError::Payment(_) => StatusCode::BAD_GATEWAY,
        EscrowError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) | Self::Escrow(EscrowError::Storage(e)) => {
                error!("Request failed: {:#}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
