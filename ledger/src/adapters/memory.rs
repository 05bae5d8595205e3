// ledger/src/adapters/memory.rs
use crate::{
    Balance, LedgerAdapter, LedgerError, Operation, OperationKind, Order, OrderState, Registration,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

struct StoredOrder {
    order: Order,
    /// 0 = never polled; otherwise the value of `poll_clock` at the last poll
    polled_seq: u64,
}

#[derive(Default)]
struct MemoryState {
    orders: HashMap<String, StoredOrder>,
    operations: Vec<Operation>,
    poll_clock: u64,
    closed: bool,
}

/// Every adapter call holds the single state lock for its whole duration,
/// which gives serializable semantics for free.
#[derive(Clone, Default)]
struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, LedgerError> {
        let state = self
            .state
            .lock()
            .map_err(|_| LedgerError::Storage("memory store poisoned".to_string()))?;
        if state.closed {
            return Err(LedgerError::Storage("memory store closed".to_string()));
        }
        Ok(state)
    }
}

impl MemoryState {
    fn balance(&self, owner: Uuid) -> Balance {
        Balance::fold(owner, &self.operations)
    }

    fn count(&self, order_number: &str, kind: OperationKind) -> u64 {
        self.operations
            .iter()
            .filter(|op| op.order_number == order_number && op.kind == kind)
            .count() as u64
    }
}

#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerAdapter for MemoryAdapter {
    async fn register_order(&self, order: &Order) -> Result<Registration, LedgerError> {
        let mut state = self.store.lock()?;

        if let Some(existing) = state.orders.get(&order.number) {
            return Ok(if existing.order.owner == order.owner {
                Registration::OwnedByCaller
            } else {
                Registration::OwnedByOther
            });
        }

        state.orders.insert(
            order.number.clone(),
            StoredOrder {
                order: order.clone(),
                polled_seq: 0,
            },
        );
        Ok(Registration::Created)
    }

    async fn unresolved_orders(&self, limit: usize) -> Result<Vec<Order>, LedgerError> {
        let state = self.store.lock()?;

        let mut candidates: Vec<&StoredOrder> = state
            .orders
            .values()
            .filter(|stored| !stored.order.is_resolved())
            .collect();
        candidates.sort_by(|a, b| {
            a.polled_seq
                .cmp(&b.polled_seq)
                .then_with(|| a.order.created_at.cmp(&b.order.created_at))
                .then_with(|| a.order.number.cmp(&b.order.number))
        });

        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|stored| stored.order.clone())
            .collect())
    }

    async fn mark_polled(&self, number: &str) -> Result<(), LedgerError> {
        let mut state = self.store.lock()?;
        state.poll_clock += 1;
        let seq = state.poll_clock;
        let stored = state
            .orders
            .get_mut(number)
            .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;
        stored.polled_seq = seq;
        Ok(())
    }

    async fn update_order_status(
        &self,
        number: &str,
        target: OrderState,
    ) -> Result<(), LedgerError> {
        let mut state = self.store.lock()?;
        let stored = state
            .orders
            .get_mut(number)
            .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;

        let from = stored.order.state;
        if !from.can_transition_to(target) || target == OrderState::Processed {
            return Err(LedgerError::InvalidTransition { from, to: target });
        }

        stored.order.state = target;
        Ok(())
    }

    async fn finalize_accrual(&self, number: &str, amount: Decimal) -> Result<bool, LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut state = self.store.lock()?;
        let stored = state
            .orders
            .get_mut(number)
            .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;

        if stored.order.state.is_terminal() {
            return Ok(false);
        }

        stored.order.state = OrderState::Processed;
        stored.order.accrual = Some(amount);
        let operation = Operation::accrual(
            stored.order.owner,
            number,
            amount,
            stored.order.currency.clone(),
        );
        state.operations.push(operation);

        Ok(true)
    }

    async fn append_withdrawal(&self, operation: &Operation) -> Result<(), LedgerError> {
        if operation.kind != OperationKind::Withdraw || operation.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut state = self.store.lock()?;

        // Staged insert: checks run against the ledger as it would look after commit
        state.operations.push(operation.clone());

        let rejection = if state.count(&operation.order_number, OperationKind::Withdraw) > 1 {
            Some(LedgerError::DuplicateWithdrawal(
                operation.order_number.clone(),
            ))
        } else if state.balance(operation.owner).is_overdrawn() {
            Some(LedgerError::InsufficientFunds)
        } else {
            None
        };

        if let Some(err) = rejection {
            // Rollback
            state.operations.pop();
            return Err(err);
        }

        Ok(())
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>, LedgerError> {
        let state = self.store.lock()?;
        Ok(state.orders.get(number).map(|stored| stored.order.clone()))
    }

    async fn get_orders(&self, owner: Uuid) -> Result<Vec<Order>, LedgerError> {
        let state = self.store.lock()?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|stored| stored.order.owner == owner)
            .map(|stored| stored.order.clone())
            .collect();
        orders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        Ok(orders)
    }

    async fn get_balance(&self, owner: Uuid) -> Result<Balance, LedgerError> {
        let state = self.store.lock()?;
        Ok(state.balance(owner))
    }

    async fn count_operations(
        &self,
        order_number: &str,
        kind: OperationKind,
    ) -> Result<u64, LedgerError> {
        let state = self.store.lock()?;
        Ok(state.count(order_number, kind))
    }

    async fn get_operations(
        &self,
        owner: Uuid,
        kind: Option<OperationKind>,
    ) -> Result<Vec<Operation>, LedgerError> {
        let state = self.store.lock()?;
        // Appended in commit order, which is creation order
        Ok(state
            .operations
            .iter()
            .filter(|op| op.owner == owner && kind.is_none_or(|k| op.kind == k))
            .cloned()
            .collect())
    }

    async fn close(&self) {
        if let Ok(mut state) = self.store.state.lock() {
            state.closed = true;
        }
    }
}
