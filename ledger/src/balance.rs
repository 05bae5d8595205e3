// ledger/src/balance.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Operation, OperationKind};

/// Balance derived from the operation ledger. Never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub owner: Uuid,
    pub current: Decimal,
    pub withdrawn: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Balance {
    pub fn from_sums(owner: Uuid, accrued: Decimal, withdrawn: Decimal) -> Self {
        Self {
            owner,
            current: accrued - withdrawn,
            withdrawn,
            timestamp: Utc::now(),
        }
    }

    /// Fold a sequence of operations for one owner
    pub fn fold<'a>(owner: Uuid, operations: impl IntoIterator<Item = &'a Operation>) -> Self {
        let (accrued, withdrawn) = operations
            .into_iter()
            .filter(|op| op.owner == owner)
            .fold((Decimal::ZERO, Decimal::ZERO), |(acc, wd), op| match op.kind {
                OperationKind::Accrual => (acc + op.amount, wd),
                OperationKind::Withdraw => (acc, wd + op.amount),
            });

        Self::from_sums(owner, accrued, withdrawn)
    }

    pub fn is_overdrawn(&self) -> bool {
        self.current < Decimal::ZERO
    }
}
