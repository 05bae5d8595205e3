// ledger/src/currency.rs
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Code of the loyalty points currency
pub const POINTS: &str = "GPB";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    pub decimals: u32,
}

impl Currency {
    pub fn new(code: &str, decimals: u32) -> Self {
        Self {
            code: code.to_string(),
            decimals,
        }
    }

    pub fn points() -> Self {
        Self::new(POINTS, 2)
    }

    /// Round an amount to the precision the ledger keeps for this currency
    pub fn normalize(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimals, RoundingStrategy::MidpointNearestEven)
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::points()
    }
}
