// ledger/src/adapters/postgres.rs
use crate::{
    Balance, LedgerAdapter, LedgerError, Operation, OperationKind, Order, OrderState, Registration,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

/// PostgreSQL ledger backed by a shared connection pool.
///
/// Schema:
/// ```sql
/// CREATE TABLE loyalty_orders (
///     number TEXT PRIMARY KEY,
///     owner UUID NOT NULL,
///     state TEXT NOT NULL,
///     accrual NUMERIC,
///     currency TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL,
///     polled_at TIMESTAMPTZ
/// );
///
/// CREATE TABLE loyalty_operations (
///     id UUID PRIMARY KEY,
///     owner UUID NOT NULL,
///     order_number TEXT NOT NULL,
///     kind TEXT NOT NULL,
///     amount NUMERIC NOT NULL,
///     currency TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL
/// );
/// ```
#[derive(Clone)]
pub struct PostgresAdapter {
    pool: PgPool,
}

impl PostgresAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn init_ledger_schema(&self) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS loyalty_orders (
                number TEXT PRIMARY KEY,
                owner UUID NOT NULL,
                state TEXT NOT NULL CHECK (state IN ('NEW', 'PROCESSING', 'INVALID', 'PROCESSED')),
                accrual NUMERIC,
                currency TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                polled_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_loyalty_orders_owner
            ON loyalty_orders(owner, created_at)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_loyalty_orders_unresolved
            ON loyalty_orders(polled_at NULLS FIRST, created_at)
            WHERE state IN ('NEW', 'PROCESSING')
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS loyalty_operations (
                id UUID PRIMARY KEY,
                owner UUID NOT NULL,
                order_number TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('ACCRUAL', 'WITHDRAW')),
                amount NUMERIC NOT NULL CHECK (amount >= 0),
                currency TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_loyalty_operations_owner_kind
            ON loyalty_operations(owner, kind, created_at)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_loyalty_operations_order_kind
            ON loyalty_operations(order_number, kind)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        // At most one accrual per order, whatever the application does
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_loyalty_operations_single_accrual
            ON loyalty_operations(order_number)
            WHERE kind = 'ACCRUAL'
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, LedgerError> {
    let state: String = row.try_get("state")?;
    Ok(Order {
        number: row.try_get("number")?,
        owner: row.try_get("owner")?,
        state: state.parse()?,
        accrual: row.try_get("accrual")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
    })
}

fn operation_from_row(row: &PgRow) -> Result<Operation, LedgerError> {
    let kind: String = row.try_get("kind")?;
    Ok(Operation {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        order_number: row.try_get("order_number")?,
        kind: kind.parse()?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn select_owner_for_update(
    conn: &mut PgConnection,
    number: &str,
) -> Result<Option<Uuid>, LedgerError> {
    let owner = sqlx::query_scalar::<_, Uuid>(
        "SELECT owner FROM loyalty_orders WHERE number = $1 FOR UPDATE",
    )
    .bind(number)
    .fetch_optional(conn)
    .await?;
    Ok(owner)
}

async fn insert_operation(conn: &mut PgConnection, op: &Operation) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        INSERT INTO loyalty_operations (id, owner, order_number, kind, amount, currency, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(op.id)
    .bind(op.owner)
    .bind(&op.order_number)
    .bind(op.kind.as_str())
    .bind(op.amount)
    .bind(&op.currency)
    .bind(op.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn sum_operations(conn: &mut PgConnection, owner: Uuid) -> Result<Balance, LedgerError> {
    let rows = sqlx::query(
        r#"
        SELECT kind, COALESCE(SUM(amount), 0) AS total
        FROM loyalty_operations
        WHERE owner = $1
        GROUP BY kind
        "#,
    )
    .bind(owner)
    .fetch_all(conn)
    .await?;

    let mut accrued = Decimal::ZERO;
    let mut withdrawn = Decimal::ZERO;
    for row in rows {
        let kind: String = row.try_get("kind")?;
        let total: Decimal = row.try_get("total")?;
        match kind.parse()? {
            OperationKind::Accrual => accrued = total,
            OperationKind::Withdraw => withdrawn = total,
        }
    }

    Ok(Balance::from_sums(owner, accrued, withdrawn))
}

async fn count_on(
    conn: &mut PgConnection,
    order_number: &str,
    kind: OperationKind,
) -> Result<u64, LedgerError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loyalty_operations WHERE order_number = $1 AND kind = $2",
    )
    .bind(order_number)
    .bind(kind.as_str())
    .fetch_one(conn)
    .await?;
    Ok(count as u64)
}

/// Transaction-scoped advisory lock; released on COMMIT or ROLLBACK
async fn advisory_lock(conn: &mut PgConnection, key: &str) -> Result<(), LedgerError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait::async_trait]
impl LedgerAdapter for PostgresAdapter {
    async fn register_order(&self, order: &Order) -> Result<Registration, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let existing = match select_owner_for_update(&mut tx, &order.number).await? {
            Some(owner) => Some(owner),
            None => {
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO loyalty_orders (number, owner, state, accrual, currency, created_at)
                    VALUES ($1, $2, $3, NULL, $4, $5)
                    ON CONFLICT (number) DO NOTHING
                    "#,
                )
                .bind(&order.number)
                .bind(order.owner)
                .bind(OrderState::New.as_str())
                .bind(&order.currency)
                .bind(order.created_at)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if inserted == 1 {
                    None
                } else {
                    // A concurrent registration committed first
                    select_owner_for_update(&mut tx, &order.number).await?
                }
            }
        };

        tx.commit().await?;

        Ok(match existing {
            None => Registration::Created,
            Some(owner) if owner == order.owner => Registration::OwnedByCaller,
            Some(_) => Registration::OwnedByOther,
        })
    }

    async fn unresolved_orders(&self, limit: usize) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT number, owner, state, accrual, currency, created_at
            FROM loyalty_orders
            WHERE state IN ('NEW', 'PROCESSING')
            ORDER BY polled_at ASC NULLS FIRST, created_at ASC, number ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn mark_polled(&self, number: &str) -> Result<(), LedgerError> {
        let updated = sqlx::query(
            "UPDATE loyalty_orders SET polled_at = clock_timestamp() WHERE number = $1",
        )
        .bind(number)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(LedgerError::NotFound(number.to_string()));
        }
        Ok(())
    }

    async fn update_order_status(
        &self,
        number: &str,
        target: OrderState,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;

        let current: String =
            sqlx::query_scalar("SELECT state FROM loyalty_orders WHERE number = $1 FOR UPDATE")
                .bind(number)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;
        let from: OrderState = current.parse()?;

        if !from.can_transition_to(target) || target == OrderState::Processed {
            tx.rollback().await.ok();
            return Err(LedgerError::InvalidTransition { from, to: target });
        }

        sqlx::query("UPDATE loyalty_orders SET state = $1 WHERE number = $2")
            .bind(target.as_str())
            .bind(number)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn finalize_accrual(&self, number: &str, amount: Decimal) -> Result<bool, LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        // Row lock: a concurrent finalization waits here and then sees PROCESSED
        let row = sqlx::query(
            "SELECT owner, state, currency FROM loyalty_orders WHERE number = $1 FOR UPDATE",
        )
        .bind(number)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::NotFound(number.to_string()))?;

        let owner: Uuid = row.try_get("owner")?;
        let currency: String = row.try_get("currency")?;
        let state: String = row.try_get("state")?;
        let state: OrderState = state.parse()?;

        if state.is_terminal() {
            tx.rollback().await.ok();
            tracing::debug!(order = %number, %state, "order already finalized");
            return Ok(false);
        }

        sqlx::query("UPDATE loyalty_orders SET state = $1, accrual = $2 WHERE number = $3")
            .bind(OrderState::Processed.as_str())
            .bind(amount)
            .bind(number)
            .execute(&mut *tx)
            .await?;

        let operation = Operation::accrual(owner, number, amount, currency);
        insert_operation(&mut tx, &operation).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn append_withdrawal(&self, operation: &Operation) -> Result<(), LedgerError> {
        if operation.kind != OperationKind::Withdraw || operation.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        let mut tx = self.pool.begin().await?;

        // Always user first, then order number, so two withdrawals never wait on each other in a cycle
        advisory_lock(&mut tx, &format!("loyalty:user:{}", operation.owner)).await?;
        advisory_lock(&mut tx, &format!("loyalty:order:{}", operation.order_number)).await?;

        insert_operation(&mut tx, operation).await?;

        if count_on(&mut tx, &operation.order_number, OperationKind::Withdraw).await? > 1 {
            tx.rollback().await.ok();
            return Err(LedgerError::DuplicateWithdrawal(
                operation.order_number.clone(),
            ));
        }

        // Re-aggregated under both locks
        if sum_operations(&mut tx, operation.owner).await?.is_overdrawn() {
            tx.rollback().await.ok();
            return Err(LedgerError::InsufficientFunds);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT number, owner, state, accrual, currency, created_at
            FROM loyalty_orders
            WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn get_orders(&self, owner: Uuid) -> Result<Vec<Order>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT number, owner, state, accrual, currency, created_at
            FROM loyalty_orders
            WHERE owner = $1
            ORDER BY created_at ASC, number ASC
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn get_balance(&self, owner: Uuid) -> Result<Balance, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        sum_operations(&mut conn, owner).await
    }

    async fn count_operations(
        &self,
        order_number: &str,
        kind: OperationKind,
    ) -> Result<u64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        count_on(&mut conn, order_number, kind).await
    }

    async fn get_operations(
        &self,
        owner: Uuid,
        kind: Option<OperationKind>,
    ) -> Result<Vec<Operation>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, order_number, kind, amount, currency, created_at
            FROM loyalty_operations
            WHERE owner = $1 AND ($2::TEXT IS NULL OR kind = $2)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(owner)
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(operation_from_row).collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
