//! Balance queries and withdrawals

use std::sync::Arc;

use ledger::{Balance, Currency, LedgerAdapter, LedgerError, Operation, OperationKind};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::error::LoyaltyError;
use crate::order_number;

#[derive(Clone)]
pub struct BalanceService {
    ledger: Arc<dyn LedgerAdapter>,
    currency: Currency,
}

impl BalanceService {
    pub fn new(ledger: Arc<dyn LedgerAdapter>) -> Self {
        Self {
            ledger,
            currency: Currency::points(),
        }
    }

    /// Fresh aggregate of the ledger, never cached
    pub async fn balance(&self, user: Uuid) -> Result<Balance, LoyaltyError> {
        Ok(self.ledger.get_balance(user).await?)
    }

    /// Spend `amount` points against `number`.
    ///
    /// The balance pre-check only rejects early; the ledger re-checks the
    /// balance and the one-withdrawal-per-number rule inside the write
    /// transaction, so concurrent requests cannot overdraw.
    pub async fn withdraw(
        &self,
        user: Uuid,
        number: &str,
        amount: Decimal,
    ) -> Result<Operation, LoyaltyError> {
        if !order_number::is_valid(number) {
            return Err(LoyaltyError::InvalidOrderNumber(number.to_string()));
        }

        let amount = self.currency.normalize(amount);
        if amount <= Decimal::ZERO {
            return Err(LoyaltyError::InvalidAmount);
        }

        let balance = self.ledger.get_balance(user).await?;
        if balance.current < amount {
            counter!("loyalty.withdrawals.total", "status" => "insufficient_funds").increment(1);
            tracing::debug!(%user, order = %number, %amount, current = %balance.current, "withdrawal rejected by pre-check");
            return Err(LoyaltyError::InsufficientFunds);
        }

        let operation = Operation::withdrawal(user, number, amount, self.currency.code.as_str());
        let result = self.ledger.append_withdrawal(&operation).await;

        let status = match &result {
            Ok(()) => "success",
            Err(LedgerError::InsufficientFunds) => "insufficient_funds",
            Err(LedgerError::DuplicateWithdrawal(_)) => "duplicate",
            Err(_) => "failed",
        };
        counter!("loyalty.withdrawals.total", "status" => status).increment(1);

        match result {
            Ok(()) => {
                histogram!("loyalty.withdrawal.amount").record(amount.to_f64().unwrap_or_default());
                tracing::info!(%user, order = %number, %amount, "withdrawal accepted");
                Ok(operation)
            }
            Err(err) => {
                tracing::debug!(%user, order = %number, error = %err, "withdrawal rejected");
                Err(err.into())
            }
        }
    }

    /// Withdrawals of `user` ordered by creation time. `None` means there are none.
    pub async fn withdrawals(&self, user: Uuid) -> Result<Option<Vec<Operation>>, LoyaltyError> {
        let operations = self
            .ledger
            .get_operations(user, Some(OperationKind::Withdraw))
            .await?;
        Ok((!operations.is_empty()).then_some(operations))
    }
}
