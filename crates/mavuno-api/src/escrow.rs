//! Escrow order lifecycle.
//!
//! ```text
//! checkout ──> PENDING_PAYMENT ──(STK success)──> ESCROW_HELD ──(handshake)──> COMPLETED
//!                    │                                 │
//!                    └──(STK failed / timeout / cancel)┴──(cancel, refunded)──> CANCELLED
//! ```
//!
//! Every transition goes through a guarded update in the database, so the
//! reconciler and request handlers can race on the same order without
//! applying a transition twice. Leaving escrow moves money, so release and
//! refund first claim the order (`Settlement`) and only the claimant calls
//! the provider.

use anyhow::anyhow;
use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mavuno_db::queries::NewOrder;
use mavuno_db::{Reservation, Settlement};
use mavuno_payments::{PayHeroResponse, PaymentError, TransactionStatus};
use mavuno_types::api::{CheckoutRequest, Claims};
use mavuno_types::models::{Order, OrderStatus, UserRole};
use mavuno_types::validation::{self, ValidationError};

use crate::auth::AppStateInner;

#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("listing not found")]
    ListingNotFound,
    #[error("order not found")]
    OrderNotFound,
    #[error("only buyers can place orders")]
    NotBuyer,
    #[error("farmers cannot buy their own harvest")]
    OwnListing,
    #[error("not a party to this order")]
    NotParticipant,
    #[error("only the buyer can release escrow")]
    BuyerOnly,
    #[error("quantity must be between 1 and {available} kg")]
    InvalidQuantity { available: i64 },
    #[error("only {available} kg left on this listing")]
    InsufficientStock { available: i64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("order is {from}, cannot move to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("a payout for this order is already in progress")]
    SettlementInProgress,
    #[error("handshake code does not match")]
    HandshakeMismatch,
    #[error("payment was not accepted: {0}")]
    PaymentRejected(String),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Result of one reconciler sweep over pending payments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub held: usize,
    pub failed: usize,
    pub expired: usize,
    pub still_pending: usize,
    pub errors: usize,
}

fn handshake_code() -> String {
    let code: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    code.to_uppercase()
}

fn load_order(state: &AppStateInner, id: Uuid) -> Result<Order, EscrowError> {
    let order = state
        .db
        .get_order(&id.to_string())?
        .ok_or(EscrowError::OrderNotFound)?
        .into_order()?;
    Ok(order)
}

fn accepted(response: PayHeroResponse) -> Result<String, EscrowError> {
    match response {
        PayHeroResponse {
            success: true,
            transaction_id: Some(id),
            ..
        } => Ok(id),
        PayHeroResponse { message, .. } => Err(EscrowError::PaymentRejected(message)),
    }
}

/// Reserve stock for the buyer and send the STK push for the total.
pub async fn checkout(
    state: &AppStateInner,
    buyer: &Claims,
    listing_id: Uuid,
    req: &CheckoutRequest,
) -> Result<Order, EscrowError> {
    if buyer.role != UserRole::Buyer {
        return Err(EscrowError::NotBuyer);
    }
    validation::phone(&req.phone)?;

    let listing = state
        .db
        .get_listing(&listing_id.to_string())?
        .ok_or(EscrowError::ListingNotFound)?
        .into_listing()?;
    if listing.farmer_id == buyer.sub {
        return Err(EscrowError::OwnListing);
    }
    if req.quantity_kg < 1 || req.quantity_kg > listing.quantity_kg {
        return Err(EscrowError::InvalidQuantity {
            available: listing.quantity_kg,
        });
    }

    let order_id = Uuid::new_v4();
    let reservation = state.db.reserve_order(&NewOrder {
        id: &order_id.to_string(),
        listing_id: &listing_id.to_string(),
        buyer_id: &buyer.sub.to_string(),
        quantity: req.quantity_kg,
        phone: &req.phone,
    })?;
    let order = match reservation {
        Reservation::Reserved(row) => row.into_order()?,
        Reservation::ListingNotFound => return Err(EscrowError::ListingNotFound),
        Reservation::InsufficientStock { available } => {
            return Err(EscrowError::InsufficientStock { available });
        }
    };

    let pushed = state
        .payments
        .initiate_stk_push(&req.phone, order.total_amount)
        .await
        .map_err(EscrowError::from)
        .and_then(accepted);

    let transaction_id = match pushed {
        Ok(id) => id,
        Err(e) => {
            warn!("STK push for order {} failed: {}", order.id, e);
            state
                .db
                .cancel_order(&order.id.to_string(), OrderStatus::PendingPayment, None)?;
            return Err(e);
        }
    };

    match state.db.set_transaction_id(&order.id.to_string(), &transaction_id) {
        Ok(true) => {}
        Ok(false) => {
            let current = load_order(state, order.id)?;
            warn!(
                "Order {} became {} during its STK push; {} needs manual review",
                order.id, current.status, transaction_id
            );
            return Ok(current);
        }
        Err(e) => {
            warn!(
                "Could not record {} on order {}: {:#}; cancelling",
                transaction_id, order.id, e
            );
            if let Err(cancel_err) =
                state
                    .db
                    .cancel_order(&order.id.to_string(), OrderStatus::PendingPayment, None)
            {
                warn!("Cancelling order {} failed: {:#}", order.id, cancel_err);
            }
            return Err(e.into());
        }
    }
    info!(
        "Order {} awaiting payment of KES {} ({})",
        order.id, order.total_amount, transaction_id
    );

    load_order(state, order.id)
}

/// Ask the provider about a pending order's STK push and apply the answer.
/// Buyer only. Orders that are no longer pending come back unchanged.
pub async fn refresh_payment(
    state: &AppStateInner,
    requester: Uuid,
    order_id: Uuid,
) -> Result<Order, EscrowError> {
    let order = load_order(state, order_id)?;
    require_buyer(&order, requester)?;
    poll_payment(state, order).await
}

fn require_buyer(order: &Order, requester: Uuid) -> Result<(), EscrowError> {
    if order.buyer_id == requester {
        Ok(())
    } else if order.is_participant(requester) {
        Err(EscrowError::BuyerOnly)
    } else {
        Err(EscrowError::NotParticipant)
    }
}

/// Claim an escrowed order for `settlement` and pay its total to `phone`.
/// The claim is given back if the provider does not accept the payout.
async fn disburse_claimed(
    state: &AppStateInner,
    order: &Order,
    settlement: Settlement,
    phone: &str,
) -> Result<String, EscrowError> {
    let id = order.id.to_string();
    if !state.db.claim_settlement(&id, settlement)? {
        let current = load_order(state, order.id)?;
        return Err(match current.status {
            OrderStatus::EscrowHeld => EscrowError::SettlementInProgress,
            from => EscrowError::InvalidTransition {
                from,
                to: match settlement {
                    Settlement::Release => OrderStatus::Completed,
                    Settlement::Refund => OrderStatus::Cancelled,
                },
            },
        });
    }

    let paid = state
        .payments
        .disburse_funds(phone, order.total_amount)
        .await
        .map_err(EscrowError::from)
        .and_then(accepted);

    if let Err(e) = &paid {
        warn!("{:?} payout for order {} failed: {}", settlement, order.id, e);
        if let Err(abandon_err) = state.db.abandon_settlement(&id, settlement) {
            warn!(
                "Order {} stays claimed for {:?}: {:#}",
                order.id, settlement, abandon_err
            );
        }
    }
    paid
}

async fn poll_payment(state: &AppStateInner, order: Order) -> Result<Order, EscrowError> {
    if order.status != OrderStatus::PendingPayment {
        return Ok(order);
    }
    let Some(transaction_id) = order.mpesa_transaction_id.as_deref() else {
        return Ok(order);
    };

    let status = state
        .payments
        .check_transaction_status(transaction_id)
        .await?;
    let id = order.id.to_string();

    match status {
        TransactionStatus::Pending => {
            debug!("Order {} still waiting on {}", order.id, transaction_id);
            return Ok(order);
        }
        TransactionStatus::Success => {
            if state.db.mark_escrow_held(&id, &handshake_code())? {
                info!("Order {} funds held in escrow", order.id);
            }
        }
        TransactionStatus::Failed => {
            if state
                .db
                .cancel_order(&id, OrderStatus::PendingPayment, None)?
            {
                warn!("Order {} payment failed, order cancelled", order.id);
            }
        }
    }

    load_order(state, order.id)
}

/// The handshake: the buyer presents the code from the farmer's QR code and
/// the escrowed amount is paid out to the farmer.
pub async fn release(
    state: &AppStateInner,
    requester: Uuid,
    order_id: Uuid,
    handshake_code: &str,
) -> Result<Order, EscrowError> {
    let order = load_order(state, order_id)?;
    require_buyer(&order, requester)?;
    if order.status != OrderStatus::EscrowHeld {
        return Err(EscrowError::InvalidTransition {
            from: order.status,
            to: OrderStatus::Completed,
        });
    }
    if order.qr_code_data.as_deref() != Some(handshake_code.trim()) {
        return Err(EscrowError::HandshakeMismatch);
    }

    let farmer = state
        .db
        .get_user_by_id(&order.farmer_id.to_string())?
        .ok_or_else(|| anyhow!("farmer {} of order {} is missing", order.farmer_id, order.id))?;

    let disbursement_id =
        disburse_claimed(state, &order, Settlement::Release, &farmer.phone).await?;

    if !state
        .db
        .complete_order(&order.id.to_string(), &disbursement_id)?
    {
        let current = load_order(state, order.id)?;
        warn!(
            "Order {} moved to {} while releasing; disbursement {} needs manual review",
            order.id, current.status, disbursement_id
        );
        return Err(EscrowError::InvalidTransition {
            from: current.status,
            to: OrderStatus::Completed,
        });
    }
    info!(
        "Order {} completed, KES {} released to farmer {} ({})",
        order.id, order.total_amount, order.farmer_id, disbursement_id
    );

    load_order(state, order.id)
}

/// Cancel an order. Escrowed funds are refunded to the number that paid.
pub async fn cancel(
    state: &AppStateInner,
    requester: Uuid,
    order_id: Uuid,
) -> Result<Order, EscrowError> {
    let order = load_order(state, order_id)?;
    if !order.is_participant(requester) {
        return Err(EscrowError::NotParticipant);
    }
    let id = order.id.to_string();

    let cancelled = match order.status {
        OrderStatus::PendingPayment => {
            state
                .db
                .cancel_order(&id, OrderStatus::PendingPayment, None)?
        }
        OrderStatus::EscrowHeld => {
            let refund_id =
                disburse_claimed(state, &order, Settlement::Refund, &order.phone).await?;
            info!("Order {} refunded to buyer ({})", order.id, refund_id);
            let cancelled = state
                .db
                .cancel_order(&id, OrderStatus::EscrowHeld, Some(&refund_id))?;
            if !cancelled {
                warn!(
                    "Order {} left escrow while refunding; refund {} needs manual review",
                    order.id, refund_id
                );
            }
            cancelled
        }
        terminal => {
            return Err(EscrowError::InvalidTransition {
                from: terminal,
                to: OrderStatus::Cancelled,
            });
        }
    };

    if !cancelled {
        let current = load_order(state, order.id)?;
        return Err(EscrowError::InvalidTransition {
            from: current.status,
            to: OrderStatus::Cancelled,
        });
    }
    info!("Order {} cancelled by {}", order.id, requester);

    load_order(state, order.id)
}

/// One sweep over orders waiting on an STK push: drop the ones past the
/// payment timeout, poll the rest.
pub async fn reconcile_pending(state: &AppStateInner) -> Result<ReconcileSummary, EscrowError> {
    let mut summary = ReconcileSummary::default();
    let timeout = chrono::Duration::from_std(state.payment_timeout)
        .map_err(|e| anyhow!("payment timeout out of range: {}", e))?;
    let now = Utc::now();

    for row in state.db.pending_payments()? {
        let order = row.into_order()?;

        if now - order.created_at > timeout {
            if state
                .db
                .cancel_order(&order.id.to_string(), OrderStatus::PendingPayment, None)?
            {
                warn!("Order {} payment timed out, order cancelled", order.id);
                summary.expired += 1;
            }
            continue;
        }

        match poll_payment(state, order).await {
            Ok(order) => match order.status {
                OrderStatus::EscrowHeld => summary.held += 1,
                OrderStatus::Cancelled => summary.failed += 1,
                _ => summary.still_pending += 1,
            },
            Err(e) => {
                warn!("Reconcile poll failed: {}", e);
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}
