//! Accrual oracle: the external authority on an order's reward state.

mod http;

pub use self::http::HttpAccrualOracle;

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

/// Order state as reported by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    /// Known to the oracle, calculation not started
    Registered,
    Processing,
    Invalid,
    Processed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub order: String,
    pub status: AccrualStatus,
    /// Only meaningful once `status` is `Processed`
    pub accrual: Option<Decimal>,
}

/// Transient oracle outcomes. None of them is ever surfaced to users.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("oracle has no record of the order yet")]
    NotYetAvailable,
    #[error("oracle rate limit hit")]
    RateLimited { retry_after: Option<Duration> },
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),
}

impl OracleError {
    /// Label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::NotYetAvailable => "not_yet_available",
            OracleError::RateLimited { .. } => "rate_limited",
            OracleError::Unavailable(_) => "unavailable",
            OracleError::Timeout(_) => "timeout",
        }
    }
}

#[async_trait]
pub trait AccrualOracle: Send + Sync {
    async fn fetch_state(&self, order_number: &str) -> Result<OrderSnapshot, OracleError>;
}
