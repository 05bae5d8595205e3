//! loyaltyd: loyalty ledger daemon
//!
//! Connects to PostgreSQL, makes sure the ledger schema exists and runs the
//! accrual reconciler until Ctrl-C.

use std::sync::Arc;

use ledger::LedgerSystem;
use ledger::adapters::PostgresAdapter;
use loyalty::{Config, HttpAccrualOracle, IntervalTrigger, Reconciler, spawn_reconciler, telemetry};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env()?;
    telemetry::init();

    tracing::info!(
        accrual_system = %config.accrual_system_address,
        max_connections = config.database_max_connections,
        "starting loyaltyd"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_uri)
        .await?;

    let adapter = PostgresAdapter::from_pool(pool);
    adapter.init_ledger_schema().await?;
    let system = LedgerSystem::new(Box::new(adapter));

    let oracle = HttpAccrualOracle::new(
        config.accrual_system_address.as_str(),
        config.poller.call_timeout,
    )?;
    let reconciler = Reconciler::new(system.adapter_arc(), Arc::new(oracle), config.poller.clone());

    let shutdown = CancellationToken::new();
    let handle = spawn_reconciler(
        reconciler,
        IntervalTrigger::new(config.poller.period),
        shutdown.clone(),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    shutdown.cancel();

    if let Err(e) = handle.await {
        tracing::error!("reconciler task failed: {e}");
    }

    system.shutdown().await;
    tracing::info!("loyaltyd stopped");
    Ok(())
}
