#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use loyalty::ledger::adapters::MemoryAdapter;
use loyalty::ledger::{
    Balance, LedgerAdapter, LedgerError, LedgerSystem, Operation, OperationKind, Order, OrderState,
    Registration,
};
use loyalty::{AccrualOracle, AccrualStatus, OracleError, OrderSnapshot, PollerConfig};
use rust_decimal::Decimal;
use uuid::Uuid;

type Response = Result<OrderSnapshot, OracleError>;

/// Oracle answering from a per-order queue of canned responses.
/// An order with nothing queued is unknown to it.
#[derive(Default)]
pub struct ScriptedOracle {
    responses: Mutex<HashMap<String, VecDeque<Response>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, number: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .entry(number.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn status(&self, number: &str, status: AccrualStatus) {
        self.push(
            number,
            Ok(OrderSnapshot {
                order: number.to_string(),
                status,
                accrual: None,
            }),
        );
    }

    pub fn processed(&self, number: &str, accrual: Decimal) {
        self.push(
            number,
            Ok(OrderSnapshot {
                order: number.to_string(),
                status: AccrualStatus::Processed,
                accrual: Some(accrual),
            }),
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, number: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|n| *n == number).count()
    }
}

#[async_trait]
impl AccrualOracle for ScriptedOracle {
    async fn fetch_state(&self, order_number: &str) -> Result<OrderSnapshot, OracleError> {
        self.calls.lock().unwrap().push(order_number.to_string());
        self.responses
            .lock()
            .unwrap()
            .get_mut(order_number)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(OracleError::NotYetAvailable))
    }
}

/// Oracle that takes `delay` before delegating
pub struct SlowOracle {
    pub delay: Duration,
    pub inner: Arc<ScriptedOracle>,
}

#[async_trait]
impl AccrualOracle for SlowOracle {
    async fn fetch_state(&self, order_number: &str) -> Result<OrderSnapshot, OracleError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_state(order_number).await
    }
}

/// Oracle that panics on its first `panics` calls, then delegates
pub struct PanickingOracle {
    pub remaining: AtomicUsize,
    pub inner: Arc<ScriptedOracle>,
}

impl PanickingOracle {
    pub fn new(panics: usize, inner: Arc<ScriptedOracle>) -> Self {
        Self {
            remaining: AtomicUsize::new(panics),
            inner,
        }
    }
}

#[async_trait]
impl AccrualOracle for PanickingOracle {
    async fn fetch_state(&self, order_number: &str) -> Result<OrderSnapshot, OracleError> {
        let left = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if left.is_ok() {
            panic!("oracle exploded on {order_number}");
        }
        self.inner.fetch_state(order_number).await
    }
}

pub fn setup() -> (LedgerSystem, Arc<dyn LedgerAdapter>) {
    let system = LedgerSystem::new(Box::new(MemoryAdapter::new()));
    let ledger = system.adapter_arc();
    (system, ledger)
}

pub fn poller_config() -> PollerConfig {
    PollerConfig {
        period: Duration::from_millis(20),
        call_timeout: Duration::from_millis(200),
        batch_size: 10,
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Append the Luhn check digit to `payload`
pub fn valid_number(payload: u64) -> String {
    let digits = payload.to_string();
    (0..10)
        .map(|d| format!("{digits}{d}"))
        .find(|n| loyalty::order_number::is_valid(n))
        .unwrap()
}

/// Ledger that fails on demand and otherwise delegates
pub struct FlakyLedger {
    inner: Arc<dyn LedgerAdapter>,
    /// Number of upcoming `unresolved_orders` calls that fail
    pub failing_fetches: AtomicUsize,
    /// Orders whose status updates and finalization fail
    pub broken_orders: Mutex<HashSet<String>>,
}

impl FlakyLedger {
    pub fn new(inner: Arc<dyn LedgerAdapter>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_fetches: AtomicUsize::new(0),
            broken_orders: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub fn break_order(&self, number: &str) {
        self.broken_orders.lock().unwrap().insert(number.to_string());
    }

    pub fn repair_order(&self, number: &str) {
        self.broken_orders.lock().unwrap().remove(number);
    }

    fn check(&self, number: &str) -> Result<(), LedgerError> {
        if self.broken_orders.lock().unwrap().contains(number) {
            return Err(LedgerError::Storage(format!("write to {number} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerAdapter for FlakyLedger {
    async fn register_order(&self, order: &Order) -> Result<Registration, LedgerError> {
        self.inner.register_order(order).await
    }

    async fn unresolved_orders(&self, limit: usize) -> Result<Vec<Order>, LedgerError> {
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(LedgerError::Storage("connection refused".to_string()));
        }
        self.inner.unresolved_orders(limit).await
    }

    async fn mark_polled(&self, number: &str) -> Result<(), LedgerError> {
        self.inner.mark_polled(number).await
    }

    async fn update_order_status(&self, number: &str, state: OrderState) -> Result<(), LedgerError> {
        self.check(number)?;
        self.inner.update_order_status(number, state).await
    }

    async fn finalize_accrual(&self, number: &str, amount: Decimal) -> Result<bool, LedgerError> {
        self.check(number)?;
        self.inner.finalize_accrual(number, amount).await
    }

    async fn append_withdrawal(&self, operation: &Operation) -> Result<(), LedgerError> {
        self.inner.append_withdrawal(operation).await
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>, LedgerError> {
        self.inner.get_order(number).await
    }

    async fn get_orders(&self, owner: Uuid) -> Result<Vec<Order>, LedgerError> {
        self.inner.get_orders(owner).await
    }

    async fn get_balance(&self, owner: Uuid) -> Result<Balance, LedgerError> {
        self.inner.get_balance(owner).await
    }

    async fn count_operations(
        &self,
        order_number: &str,
        kind: OperationKind,
    ) -> Result<u64, LedgerError> {
        self.inner.count_operations(order_number, kind).await
    }

    async fn get_operations(
        &self,
        owner: Uuid,
        kind: Option<OperationKind>,
    ) -> Result<Vec<Operation>, LedgerError> {
        self.inner.get_operations(owner, kind).await
    }
}
