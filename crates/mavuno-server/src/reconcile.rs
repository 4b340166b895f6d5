use std::time::Duration;

use tracing::{info, warn};

use mavuno_api::auth::AppState;
use mavuno_api::escrow;

/// Background task standing in for the provider's payment callback.
///
/// Runs on an interval, polls every order still waiting on its STK push
/// and moves it into escrow or cancels it. Orders older than the payment
/// timeout are cancelled without polling.
pub async fn run_reconcile_loop(state: AppState, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match escrow::reconcile_pending(&state).await {
            Ok(summary) => {
                if summary != Default::default() {
                    info!(
                        "Reconcile: {} held, {} failed, {} expired, {} pending, {} errors",
                        summary.held,
                        summary.failed,
                        summary.expired,
                        summary.still_pending,
                        summary.errors
                    );
                }
            }
            Err(e) => {
                warn!("Reconcile error: {}", e);
            }
        }
    }
}
