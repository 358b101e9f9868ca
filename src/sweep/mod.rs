//! Escrow reconciliation sweep
//!
//! Periodic background task with two jobs: crash-recovery release of escrow
//! for transfers that already completed but whose release write was lost,
//! and alerting on transfers stuck at `ownership_transferred` with funds
//! still held past the grace period. The sweep never releases funds for a
//! transaction purely because its release date passed.

use std::time::Duration;

use crate::transaction::TransactionService;

#[derive(Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub reconciliation_grace_hours: i64,
}

/// Spawn the sweep loop. Runs until the process shuts down.
pub fn spawn_sweep(service: TransactionService, config: SweepConfig) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            run_sweep_once(&service, &config).await;
        }
    });
}

/// One sweep pass. Errors are logged and the loop continues.
pub async fn run_sweep_once(service: &TransactionService, config: &SweepConfig) {
    match service.release_overdue_completed_transfers().await {
        Ok(released) if !released.is_empty() => {
            tracing::info!(
                count = released.len(),
                transaction_ids = ?released,
                "Sweep released overdue escrow for completed transfers"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "Sweep escrow release pass failed");
        }
    }

    match service
        .find_stuck_ownership_transfers(config.reconciliation_grace_hours)
        .await
    {
        Ok(stuck) => {
            for transaction_id in stuck {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    grace_hours = config.reconciliation_grace_hours,
                    "Ownership transferred but escrow still held past grace period"
                );
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Sweep stuck-transfer pass failed");
        }
    }
}
