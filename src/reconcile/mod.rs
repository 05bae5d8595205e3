//! Reconciliation poller.
//!
//! A single background task that repeatedly fetches a batch of unresolved
//! orders, asks the accrual oracle about each of them and applies the answer
//! to the ledger. Failures are isolated: an oracle error skips one order, a
//! storage error while fetching the batch aborts one cycle, a panic is caught
//! at the loop boundary. An order goes to the back of the rotation only once
//! the oracle has actually been asked about it, so orders left unasked by an
//! early end of cycle lead the next batch.

mod trigger;

pub use trigger::{IntervalTrigger, Trigger};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use ledger::{Currency, LedgerAdapter, LedgerError, Order, OrderState};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PollerConfig;
use crate::oracle::{AccrualOracle, AccrualStatus, OracleError};

/// What one cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Orders the oracle was asked about
    pub examined: usize,
    pub finalized: usize,
    pub invalidated: usize,
    /// Reported as still being processed
    pub in_progress: usize,
    /// Not known to the oracle yet, or already finalized by someone else
    pub skipped: usize,
    pub failed: usize,
    /// The oracle asked us to back off; the rest of the batch was left for later
    pub rate_limited: bool,
    /// How long the oracle asked us to stay away, when it said so
    pub retry_after: Option<Duration>,
}

enum Outcome {
    Finalized,
    Invalidated,
    InProgress,
    Skipped,
    Failed,
    RateLimited(Option<Duration>),
}

pub struct Reconciler {
    ledger: Arc<dyn LedgerAdapter>,
    oracle: Arc<dyn AccrualOracle>,
    config: PollerConfig,
    currency: Currency,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerAdapter>,
        oracle: Arc<dyn AccrualOracle>,
        config: PollerConfig,
    ) -> Self {
        Self {
            ledger,
            oracle,
            config,
            currency: Currency::points(),
        }
    }

    /// Run cycles whenever `trigger` fires until `shutdown` is cancelled or
    /// the trigger is exhausted. Cancellation drops the in-flight cycle; its
    /// uncommitted work is rolled back and redone by a later cycle.
    /// After a rate-limited cycle with a `Retry-After` hint, triggers firing
    /// before the hint expires are skipped.
    pub async fn run<T: Trigger>(&self, mut trigger: T, shutdown: CancellationToken) {
        tracing::info!(
            period = ?self.config.period,
            call_timeout = ?self.config.call_timeout,
            batch_size = self.config.batch_size,
            "reconciler started"
        );

        let mut resume_at: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fired = trigger.fire() => {
                    if !fired {
                        break;
                    }
                }
            }

            if let Some(at) = resume_at {
                if Instant::now() < at {
                    counter!("reconcile.cycles.total", "status" => "backoff").increment(1);
                    tracing::debug!(remaining = ?(at - Instant::now()), "oracle backoff, cycle skipped");
                    continue;
                }
                resume_at = None;
            }

            let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = cycle => match outcome {
                    Ok(Ok(report)) => {
                        resume_at = report.retry_after.map(|wait| Instant::now() + wait);
                        counter!("reconcile.cycles.total", "status" => "success").increment(1);
                        tracing::debug!(?report, "reconciliation cycle finished");
                    }
                    Ok(Err(err)) => {
                        counter!("reconcile.cycles.total", "status" => "failed").increment(1);
                        tracing::error!(error = %err, "reconciliation cycle aborted");
                    }
                    Err(panic) => {
                        counter!("reconcile.cycles.total", "status" => "panicked").increment(1);
                        tracing::error!(panic = %panic_message(panic.as_ref()), "reconciliation cycle panicked");
                    }
                },
            }
        }

        tracing::info!("reconciler stopped");
    }

    /// One pass over a fresh batch. Only a failure to fetch the batch is
    /// returned as an error; per-order failures are counted.
    pub async fn run_cycle(&self) -> Result<CycleReport, LedgerError> {
        let orders = self
            .ledger
            .unresolved_orders(self.config.batch_size)
            .await?;

        let mut report = CycleReport::default();
        for order in &orders {
            report.examined += 1;
            match self.reconcile_order(order).await {
                Outcome::Finalized => report.finalized += 1,
                Outcome::Invalidated => report.invalidated += 1,
                Outcome::InProgress => report.in_progress += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::RateLimited(retry_after) => {
                    report.rate_limited = true;
                    report.retry_after = retry_after;
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn reconcile_order(&self, order: &Order) -> Outcome {
        let number = order.number.as_str();

        let fetched = tokio::time::timeout(
            self.config.call_timeout,
            self.oracle.fetch_state(number),
        )
        .await
        .unwrap_or(Err(OracleError::Timeout(self.config.call_timeout)));

        // Asked, whatever the answer: rotate to the back of the queue
        if let Err(err) = self.ledger.mark_polled(number).await {
            tracing::warn!(order = %number, error = %err, "failed to record poll");
        }

        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(OracleError::NotYetAvailable) => {
                tracing::debug!(order = %number, "oracle has no record yet");
                return Outcome::Skipped;
            }
            Err(OracleError::RateLimited { retry_after }) => {
                counter!("reconcile.oracle.errors", "kind" => "rate_limited").increment(1);
                tracing::warn!(order = %number, ?retry_after, "oracle rate limited, ending cycle early");
                return Outcome::RateLimited(retry_after);
            }
            Err(err) => {
                counter!("reconcile.oracle.errors", "kind" => err.kind()).increment(1);
                tracing::warn!(order = %number, error = %err, "oracle call failed");
                return Outcome::Failed;
            }
        };

        if snapshot.order != number {
            tracing::warn!(order = %number, reported = %snapshot.order, "oracle answered for another order");
            return Outcome::Failed;
        }

        match snapshot.status {
            AccrualStatus::Registered | AccrualStatus::Processing => {
                self.apply_status(order, OrderState::Processing, Outcome::InProgress)
                    .await
            }
            AccrualStatus::Invalid => {
                self.apply_status(order, OrderState::Invalid, Outcome::Invalidated)
                    .await
            }
            AccrualStatus::Processed => {
                let amount = self.currency.normalize(snapshot.accrual.unwrap_or_default());
                match self.ledger.finalize_accrual(number, amount).await {
                    Ok(true) => {
                        counter!("reconcile.orders.finalized").increment(1);
                        tracing::info!(order = %number, user = %order.owner, %amount, "accrual credited");
                        Outcome::Finalized
                    }
                    Ok(false) => {
                        tracing::debug!(order = %number, "order was already finalized");
                        Outcome::Skipped
                    }
                    Err(err) => {
                        tracing::error!(order = %number, error = %err, "failed to finalize accrual");
                        Outcome::Failed
                    }
                }
            }
        }
    }

    async fn apply_status(&self, order: &Order, state: OrderState, done: Outcome) -> Outcome {
        match self.ledger.update_order_status(&order.number, state).await {
            Ok(()) => {
                if order.state != state {
                    tracing::info!(order = %order.number, from = %order.state, to = %state, "order state changed");
                }
                done
            }
            Err(LedgerError::InvalidTransition { from, to }) => {
                // Finalized between fetch and update
                tracing::debug!(order = %order.number, %from, %to, "stale status update ignored");
                Outcome::Skipped
            }
            Err(err) => {
                tracing::error!(order = %order.number, error = %err, "failed to update order state");
                Outcome::Failed
            }
        }
    }
}

/// Spawn the reconciliation loop on the tokio runtime
pub fn spawn_reconciler<T>(
    reconciler: Reconciler,
    trigger: T,
    shutdown: CancellationToken,
) -> JoinHandle<()>
where
    T: Trigger + 'static,
{
    tokio::spawn(async move { reconciler.run(trigger, shutdown).await })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
