//! Loyalty points service core.
//!
//! Users register purchase order numbers, a background reconciler asks the
//! external accrual oracle what each order earned, and users spend points by
//! withdrawing them against new order numbers. All money movements go through
//! the append-only ledger in the `loyalty-ledger` crate.
//!
//! - [`orders::OrderService`]: order admission and listing
//! - [`balance::BalanceService`]: balance, withdrawals and withdrawal history
//! - [`reconcile::Reconciler`]: the oracle poller
//! - [`oracle`]: the oracle client abstraction and its HTTP implementation

pub mod balance;
pub mod config;
pub mod error;
pub mod oracle;
pub mod order_number;
pub mod orders;
pub mod reconcile;
pub mod telemetry;

pub use balance::BalanceService;
pub use config::{Config, ConfigError, PollerConfig};
pub use error::LoyaltyError;
pub use oracle::{AccrualOracle, AccrualStatus, HttpAccrualOracle, OracleError, OrderSnapshot};
pub use orders::{Admission, OrderService};
pub use reconcile::{CycleReport, IntervalTrigger, Reconciler, Trigger, spawn_reconciler};

pub use ledger;
