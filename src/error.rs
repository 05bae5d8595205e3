use ledger::LedgerError;
use thiserror::Error;

/// Errors surfaced to callers of the order and balance services
#[derive(Debug, Error)]
pub enum LoyaltyError {
    #[error("invalid order number: {0:?}")]
    InvalidOrderNumber(String),
    #[error("order {0} is registered by another user")]
    OrderOwnedByOther(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("withdrawal already registered for order {0}")]
    DuplicateWithdrawal(String),
    #[error("amount must be positive")]
    InvalidAmount,
    #[error(transparent)]
    Storage(LedgerError),
}

impl LoyaltyError {
    /// Suggested HTTP status for the presentation layer
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidOrderNumber(_) => 422,
            Self::OrderOwnedByOther(_) => 409,
            Self::InsufficientFunds => 402,
            Self::DuplicateWithdrawal(_) | Self::InvalidAmount => 400,
            Self::Storage(_) => 500,
        }
    }

    /// Business-rule rejections are final for the request; only storage faults are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<LedgerError> for LoyaltyError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds => Self::InsufficientFunds,
            LedgerError::DuplicateWithdrawal(number) => Self::DuplicateWithdrawal(number),
            LedgerError::InvalidAmount => Self::InvalidAmount,
            other => Self::Storage(other),
        }
    }
}
