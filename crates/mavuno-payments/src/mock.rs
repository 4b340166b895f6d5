use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{debug, info};

use crate::{PayHeroResponse, PaymentError, PaymentProvider, TransactionStatus};

/// Knobs for the simulated provider.
#[derive(Debug, Clone)]
pub struct MockOptions {
    pub stk_delay: Duration,
    pub poll_delay: Duration,
    pub disburse_delay: Duration,
    /// What every STK push eventually resolves to.
    pub outcome: TransactionStatus,
    /// Number of status checks per transaction that report `Pending`
    /// before `outcome` is returned.
    pub pending_polls: u32,
    /// Refuse every STK push outright, as when the handset is unreachable.
    pub reject_stk: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            stk_delay: Duration::from_millis(2000),
            poll_delay: Duration::from_millis(1500),
            disburse_delay: Duration::from_millis(2000),
            outcome: TransactionStatus::Success,
            pending_polls: 0,
            reject_stk: false,
        }
    }
}

impl MockOptions {
    /// Zero latency, immediate success. Used by tests.
    pub fn instant() -> Self {
        Self {
            stk_delay: Duration::ZERO,
            poll_delay: Duration::ZERO,
            disburse_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Scale all three delays from a single base latency.
    pub fn with_base_delay(base: Duration) -> Self {
        Self {
            stk_delay: base,
            poll_delay: base * 3 / 4,
            disburse_delay: base,
            ..Self::default()
        }
    }
}

/// In-process stand-in for the Pay Hero API.
pub struct MockPayHero {
    options: MockOptions,
    /// transaction id -> remaining pending polls, dropped once settled
    transactions: Mutex<HashMap<String, u32>>,
}

impl MockPayHero {
    pub fn new(options: MockOptions) -> Self {
        Self {
            options,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    fn transactions(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, u32>>, PaymentError> {
        self.transactions
            .lock()
            .map_err(|e| PaymentError::Unavailable(format!("state lock poisoned: {}", e)))
    }
}

impl Default for MockPayHero {
    fn default() -> Self {
        Self::new(MockOptions::default())
    }
}

fn reference(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{}-{}", prefix, suffix.to_uppercase())
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl PaymentProvider for MockPayHero {
    async fn initiate_stk_push(
        &self,
        phone: &str,
        amount: i64,
    ) -> Result<PayHeroResponse, PaymentError> {
        if amount <= 0 {
            return Err(PaymentError::InvalidAmount(amount));
        }
        info!("[PayHero] Initiating STK push to {} for KES {}", phone, amount);
        pause(self.options.stk_delay).await;

        if self.options.reject_stk {
            info!("[PayHero] STK push to {} rejected", phone);
            return Ok(PayHeroResponse {
                success: false,
                message: "STK push could not be delivered to the handset.".into(),
                transaction_id: None,
            });
        }

        let transaction_id = reference("PH");
        self.transactions()?
            .insert(transaction_id.clone(), self.options.pending_polls);

        Ok(PayHeroResponse {
            success: true,
            message: "STK push sent. Please check your phone.".into(),
            transaction_id: Some(transaction_id),
        })
    }

    async fn check_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionStatus, PaymentError> {
        pause(self.options.poll_delay).await;

        let mut transactions = self.transactions()?;
        let remaining = transactions
            .get_mut(transaction_id)
            .ok_or_else(|| PaymentError::UnknownTransaction(transaction_id.to_string()))?;

        let status = if *remaining > 0 {
            *remaining -= 1;
            TransactionStatus::Pending
        } else {
            transactions.remove(transaction_id);
            self.options.outcome
        };
        debug!("[PayHero] {} -> {:?}", transaction_id, status);
        Ok(status)
    }

    async fn disburse_funds(
        &self,
        phone: &str,
        amount: i64,
    ) -> Result<PayHeroResponse, PaymentError> {
        if amount <= 0 {
            return Err(PaymentError::InvalidAmount(amount));
        }
        info!("[PayHero] Disbursing (B2C) KES {} to {}", amount, phone);
        pause(self.options.disburse_delay).await;

        Ok(PayHeroResponse {
            success: true,
            message: "Funds disbursed successfully.".into(),
            transaction_id: Some(reference("B2C")),
        })
    }
}
