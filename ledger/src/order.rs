// ledger/src/order.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::LedgerError;

/// Lifecycle of an order.
/// Transitions are forward-only: new → processing → processed | invalid
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Registered, the oracle has not reported on it yet
    New,
    /// The oracle is still computing the reward
    Processing,
    /// Rejected by the oracle, no reward will be credited
    Invalid,
    /// Reward computed and credited to the ledger
    Processed,
}

impl OrderState {
    pub fn can_transition_to(&self, target: OrderState) -> bool {
        use OrderState::*;
        match (self, target) {
            // Repeated "still processing" reports are not an error
            (Processing, Processing) => true,
            (New, Processing | Invalid | Processed) => true,
            (Processing, Invalid | Processed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Invalid | OrderState::Processed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::New => "NEW",
            OrderState::Processing => "PROCESSING",
            OrderState::Invalid => "INVALID",
            OrderState::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderState::New),
            "PROCESSING" => Ok(OrderState::Processing),
            "INVALID" => Ok(OrderState::Invalid),
            "PROCESSED" => Ok(OrderState::Processed),
            other => Err(LedgerError::Storage(format!("unknown order state: {other}"))),
        }
    }
}

/// A purchase submitted for reward calculation.
///
/// Invariants:
/// - `number` maps to exactly one `owner` for the lifetime of the ledger
/// - orders are never deleted, only `state` and `accrual` change
/// - `accrual` is set exactly when `state` becomes `Processed`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub number: String,
    pub owner: Uuid,
    pub state: OrderState,
    pub accrual: Option<Decimal>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(number: impl Into<String>, owner: Uuid, currency: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            owner,
            state: OrderState::New,
            accrual: None,
            currency: currency.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Outcome of registering an order number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// Same number was already registered by the same owner; nothing written
    OwnedByCaller,
    /// Number belongs to somebody else; nothing written
    OwnedByOther,
}
