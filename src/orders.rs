//! Order admission

use std::sync::Arc;

use ledger::{Currency, LedgerAdapter, Order, Registration};
use metrics::counter;
use uuid::Uuid;

use crate::error::LoyaltyError;
use crate::order_number;

/// Successful outcomes of [`OrderService::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New order registered for the caller
    Accepted,
    /// The caller registered this number before; nothing was written
    AlreadyOwnedByCaller,
}

#[derive(Clone)]
pub struct OrderService {
    ledger: Arc<dyn LedgerAdapter>,
    currency: Currency,
}

impl OrderService {
    pub fn new(ledger: Arc<dyn LedgerAdapter>) -> Self {
        Self {
            ledger,
            currency: Currency::points(),
        }
    }

    /// Register `number` for `user`.
    ///
    /// Re-submitting a number the caller already owns is always safe and
    /// returns [`Admission::AlreadyOwnedByCaller`]. A number owned by someone
    /// else is a conflict and leaves the existing order untouched.
    pub async fn admit(&self, user: Uuid, number: &str) -> Result<Admission, LoyaltyError> {
        if !order_number::is_valid(number) {
            return Err(LoyaltyError::InvalidOrderNumber(number.to_string()));
        }

        let order = Order::new(number, user, self.currency.code.as_str());
        match self.ledger.register_order(&order).await? {
            Registration::Created => {
                counter!("loyalty.orders.registered").increment(1);
                tracing::info!(order = %number, %user, "order registered");
                Ok(Admission::Accepted)
            }
            Registration::OwnedByCaller => {
                tracing::debug!(order = %number, %user, "order already registered by caller");
                Ok(Admission::AlreadyOwnedByCaller)
            }
            Registration::OwnedByOther => {
                tracing::warn!(order = %number, %user, "order registered by another user");
                Err(LoyaltyError::OrderOwnedByOther(number.to_string()))
            }
        }
    }

    /// Orders of `user`, oldest first. `None` means the user has none.
    pub async fn orders(&self, user: Uuid) -> Result<Option<Vec<Order>>, LoyaltyError> {
        let orders = self.ledger.get_orders(user).await?;
        Ok((!orders.is_empty()).then_some(orders))
    }
}
