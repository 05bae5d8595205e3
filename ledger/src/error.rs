// ledger/src/error.rs
use thiserror::Error;

use crate::OrderState;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("order not found: {0}")]
    NotFound(String),
    #[error("invalid order transition {from} -> {to}")]
    InvalidTransition { from: OrderState, to: OrderState },
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("withdrawal already registered for order {0}")]
    DuplicateWithdrawal(String),
    #[error("invalid amount")]
    InvalidAmount,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
