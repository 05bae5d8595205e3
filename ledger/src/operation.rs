// ledger/src/operation.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::LedgerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Reward credited when an order is processed
    Accrual,
    /// Points spent by the user
    Withdraw,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Accrual => "ACCRUAL",
            OperationKind::Withdraw => "WITHDRAW",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCRUAL" => Ok(OperationKind::Accrual),
            "WITHDRAW" => Ok(OperationKind::Withdraw),
            other => Err(LedgerError::Storage(format!(
                "unknown operation kind: {other}"
            ))),
        }
    }
}

/// Immutable ledger entry. Amounts are always positive, the kind gives the sign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub id: Uuid,
    pub owner: Uuid,
    pub order_number: String,
    pub kind: OperationKind,
    pub amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Operation {
    fn new(
        owner: Uuid,
        order_number: impl Into<String>,
        kind: OperationKind,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner,
            order_number: order_number.into(),
            kind,
            amount,
            currency: currency.into(),
            created_at: Utc::now(),
        }
    }

    pub fn accrual(
        owner: Uuid,
        order_number: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self::new(owner, order_number, OperationKind::Accrual, amount, currency)
    }

    pub fn withdrawal(
        owner: Uuid,
        order_number: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self::new(owner, order_number, OperationKind::Withdraw, amount, currency)
    }
}
