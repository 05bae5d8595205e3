// ledger/src/lib.rs
//! Append-only ledger for loyalty orders.
//!
//! The ledger owns two kinds of records:
//! - [`Order`]: a purchase number registered by a user, advanced through
//!   [`OrderState`] as the accrual oracle reports on it.
//! - [`Operation`]: an immutable accrual or withdrawal entry. Balances are
//!   always recomputed from these entries, there is no stored balance row.
//!
//! Every multi-step mutation is exposed as a single adapter call that owns its
//! own BEGIN/COMMIT/ROLLBACK, so partial writes are never observable.

pub mod adapters;
pub mod balance;
pub mod currency;
pub mod error;
pub mod operation;
pub mod order;

pub use balance::Balance;
pub use currency::{Currency, POINTS};
pub use error::LedgerError;
pub use operation::{Operation, OperationKind};
pub use order::{Order, OrderState, Registration};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Storage backend for the ledger
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Register an order number for its owner in one transaction.
    /// An existing number is never overwritten.
    async fn register_order(&self, order: &Order) -> Result<Registration, LedgerError>;

    /// Up to `limit` orders in state `New` or `Processing`, never-polled
    /// first, then least recently polled, then oldest. Writes nothing.
    async fn unresolved_orders(&self, limit: usize) -> Result<Vec<Order>, LedgerError>;

    /// Record that the oracle was just asked about `number`, moving it to the
    /// back of the `unresolved_orders` rotation.
    async fn mark_polled(&self, number: &str) -> Result<(), LedgerError>;

    /// Move a non-terminal order to `state`. Never writes a ledger entry.
    async fn update_order_status(&self, number: &str, state: OrderState)
    -> Result<(), LedgerError>;

    /// Finalize an order as `Processed` and append its accrual entry.
    /// Implementors MUST:
    /// 1. BEGIN a transaction and lock the order row (SELECT FOR UPDATE)
    /// 2. Return `Ok(false)` without writing if the order is already terminal
    /// 3. Set state and accrual, append one `Accrual` operation for the owner
    /// 4. COMMIT, or ROLLBACK on any error
    async fn finalize_accrual(&self, number: &str, amount: Decimal) -> Result<bool, LedgerError>;

    /// Append a withdrawal entry.
    /// Implementors MUST serialize concurrent withdrawals of the same owner and
    /// of the same order number, and inside the same transaction:
    /// - reject with `DuplicateWithdrawal` if another withdrawal references the number
    /// - reject with `InsufficientFunds` if the re-aggregated balance goes negative
    async fn append_withdrawal(&self, operation: &Operation) -> Result<(), LedgerError>;

    // READ OPERATIONS
    async fn get_order(&self, number: &str) -> Result<Option<Order>, LedgerError>;
    async fn get_orders(&self, owner: Uuid) -> Result<Vec<Order>, LedgerError>;
    async fn get_balance(&self, owner: Uuid) -> Result<Balance, LedgerError>;
    async fn count_operations(
        &self,
        order_number: &str,
        kind: OperationKind,
    ) -> Result<u64, LedgerError>;
    async fn get_operations(
        &self,
        owner: Uuid,
        kind: Option<OperationKind>,
    ) -> Result<Vec<Operation>, LedgerError>;

    /// Release backend resources. Further calls fail with a storage error.
    async fn close(&self) {}
}

/// Owns the process-wide ledger adapter
pub struct LedgerSystem {
    adapter: Arc<dyn LedgerAdapter>,
}

impl LedgerSystem {
    pub fn new(adapter: Box<dyn LedgerAdapter>) -> Self {
        Self {
            adapter: adapter.into(),
        }
    }

    /// Get adapter Arc (for handing to services)
    pub fn adapter_arc(&self) -> Arc<dyn LedgerAdapter> {
        Arc::clone(&self.adapter)
    }

    pub async fn shutdown(&self) {
        tracing::info!("closing ledger adapter");
        self.adapter.close().await;
    }
}
