//! Mobile-money payment provider seam.
//!
//! The marketplace talks to Pay Hero through [`PaymentProvider`]: an STK
//! push to collect money into escrow, a status check standing in for the
//! provider's callback, and a B2C disbursement to pay money out. Only the
//! simulated provider in [`mock`] exists today.

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use mock::{MockOptions, MockPayHero};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayHeroResponse {
    pub success: bool,
    pub message: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Send an STK push prompt to `phone` for `amount` KES.
    async fn initiate_stk_push(&self, phone: &str, amount: i64)
    -> Result<PayHeroResponse, PaymentError>;

    /// Poll the outcome of a previously initiated STK push.
    async fn check_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionStatus, PaymentError>;

    /// B2C transfer out of escrow to `phone`.
    async fn disburse_funds(&self, phone: &str, amount: i64)
    -> Result<PayHeroResponse, PaymentError>;
}
