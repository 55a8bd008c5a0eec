//! Periodic job turning queued reward grants into batch mint transactions.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, DurationRound, Utc};
use tokio::sync::{Mutex, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::ReconcilerConfig;
use crate::error::ServiceResult;
use crate::ethereum::{Signer, U256, parse_address};
use crate::reward::REWARD_WINDOW;
use crate::rpc::ChainClient;
use crate::store::{self, PendingReward, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pending grants old enough to mint
    pub scanned: usize,
    pub batches: usize,
    /// Grants stamped with a mint transaction
    pub minted: usize,
    /// Batches left alone because the event had no capacity
    pub skipped: usize,
    pub failed: usize,
}

enum BatchOutcome {
    Minted(usize),
    Skipped,
}

pub struct BatchReconciler {
    store: Store,
    chain: Arc<dyn ChainClient>,
    clock: Arc<dyn Clock>,
    signer: Signer,
    event_id: U256,
    config: ReconcilerConfig,
    lock: Arc<Mutex<()>>,
}

impl BatchReconciler {
    pub fn new(
        store: Store,
        chain: Arc<dyn ChainClient>,
        clock: Arc<dyn Clock>,
        signer: Signer,
        event_id: u64,
        config: ReconcilerConfig,
        lock: Arc<Mutex<()>>,
    ) -> Self {
        assert!(config.batch_size > 0, "Reconciler batch size must be positive");
        Self {
            store,
            chain,
            clock,
            signer,
            event_id: U256::from(event_id),
            config,
            lock,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Starting reward reconciler every {}s",
            self.config.period_seconds
        );
        let period = chrono::Duration::from_std(self.config.period())
            .context("Reconciler period out of range")?;

        let mut previous = None;
        loop {
            let now = self.clock.now();
            let reference = following_run(now, previous, period);
            let wait = (reference - now).to_std().unwrap_or_default();

            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Reconciler shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting reconciler loop");
                            break;
                        }
                    }
                }
                _ = sleep(wait) => {
                    previous = Some(reference);
                    match self.run_once(reference).await {
                        Ok(report) if report.scanned == 0 => {
                            debug!("No pending rewards at {reference}");
                        }
                        Ok(report) => info!("Reconciler run at {reference}: {report:?}"),
                        Err(err) => error!("Reconciler run at {reference} failed: {err}"),
                    }
                }
            }
        }

        Ok(())
    }

    /// One pass over grants created at least a full window before `reference`.
    pub async fn run_once(&self, reference: DateTime<Utc>) -> ServiceResult<ReconcileReport> {
        let _guard = self.lock.lock().await;
        let cutoff = (reference - REWARD_WINDOW).timestamp_millis();

        let txn = self.store.begin().await?;
        let pending = store::pending_rewards(&txn, cutoff).await?;
        store::commit(txn).await?;

        let mut report = ReconcileReport {
            scanned: pending.len(),
            ..ReconcileReport::default()
        };
        for batch in pending.chunks(self.config.batch_size) {
            report.batches += 1;
            match self.submit_batch(batch).await {
                Ok(BatchOutcome::Minted(count)) => report.minted += count,
                Ok(BatchOutcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    error!(
                        "Mint batch starting at grant {} failed: {err:#}",
                        batch[0].id
                    );
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn submit_batch(&self, batch: &[PendingReward]) -> Result<BatchOutcome> {
        let requested = U256::from(batch.len() as u64);
        let capacity = self
            .chain
            .can_mint(self.event_id, requested)
            .await
            .context("canMint query failed")?;
        if capacity.is_zero() {
            warn!(
                "Reward event {} has no capacity, {} grants stay pending",
                self.event_id,
                batch.len()
            );
            return Ok(BatchOutcome::Skipped);
        }

        // Earliest grants go first when capacity runs short.
        let included = &batch[..capacity.min(requested).low_u64() as usize];
        let recipients = included
            .iter()
            .map(|grant| parse_address(&grant.address))
            .collect::<Result<Vec<_>>>()?;
        let tx_id = self
            .chain
            .mint_for_multiple(&self.signer, self.event_id, &recipients)
            .await
            .context("Mint submission failed")?;

        let ids: Vec<i64> = included.iter().map(|grant| grant.id).collect();
        let updated =
            store::assign_reward_transaction(self.store.connection(), &ids, &tx_id).await?;
        info!(
            "Minted {} of {} grants in transaction {tx_id}",
            updated,
            batch.len()
        );
        Ok(BatchOutcome::Minted(updated as usize))
    }
}

/// Start of the first period boundary after `now`.
pub fn next_run(now: DateTime<Utc>, period: chrono::Duration) -> DateTime<Utc> {
    let target = now + period;
    target.duration_trunc(period).unwrap_or(target)
}

/// Like [`next_run`], but never repeats or precedes the boundary after
/// `previous`, even when the sleep wakes a little early.
pub fn following_run(
    now: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
    period: chrono::Duration,
) -> DateTime<Utc> {
    let next = next_run(now, period);
    match previous {
        Some(previous) => next.max(previous + period),
        None => next,
    }
}
