//! Scoped transactions and context-guarded driver calls.

use std::future::Future;
use std::time::{Duration, Instant};

use common::{ContextError, ExecutionContext, OrderId};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::{Result, StoreError};

/// Upper bound for a rollback issued after the request context has ended.
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest value `statement_timeout` accepts, in milliseconds.
const MAX_STATEMENT_TIMEOUT_MS: u128 = i32::MAX as u128;

/// Runs one driver call under `ctx` and classifies how it ended.
///
/// Cancellation and deadline expiry are logged at warn level and reported as
/// their own error variants; anything else is a database error carrying the
/// operation and order it belonged to.
pub(crate) async fn guarded<T, F>(
    ctx: &ExecutionContext,
    operation: &'static str,
    order_id: Option<OrderId>,
    fut: F,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let started = Instant::now();
    let outcome = match ctx.run(fut).await {
        Ok(Ok(value)) => return Ok(value),
        // The server may abort the statement itself once the deadline passes.
        Ok(Err(source)) => match ctx.err() {
            Some(ended) => Err(ended),
            None => Ok(source),
        },
        Err(ended) => Err(ended),
    };
    let duration_ms = started.elapsed().as_millis() as u64;
    let order_id_field = order_id.map(|id| id.as_i64());

    match outcome {
        Ok(source) => {
            tracing::error!(
                operation,
                order_id = ?order_id_field,
                duration_ms,
                error = %source,
                "statement failed"
            );
            Err(StoreError::database(operation, order_id, source))
        }
        Err(ContextError::Cancelled) => {
            tracing::warn!(operation, order_id = ?order_id_field, duration_ms, "statement cancelled by caller");
            Err(StoreError::from_context(operation, ContextError::Cancelled))
        }
        Err(ContextError::DeadlineExceeded) => {
            tracing::warn!(operation, order_id = ?order_id_field, duration_ms, "statement timed out");
            Err(StoreError::from_context(
                operation,
                ContextError::DeadlineExceeded,
            ))
        }
    }
}

/// Value for `statement_timeout` covering `remaining`, rounded up to whole
/// milliseconds. Never zero, which would disable the timeout.
pub(crate) fn statement_timeout(remaining: Duration) -> String {
    let millis = remaining
        .as_millis()
        .saturating_add(1)
        .min(MAX_STATEMENT_TIMEOUT_MS);
    format!("{millis}ms")
}

/// A transaction whose commit or rollback runs exactly once.
///
/// ```ignore
/// let mut tx = ScopedTransaction::begin(&pool, ctx, "delete_order", Some(id)).await?;
/// let result = do_work(&mut tx, ctx).await;
/// tx.finish(ctx, result).await
/// ```
///
/// `finish` commits when the body succeeded and the context is still live,
/// and rolls back otherwise. The server enforces the context deadline through
/// a transaction-local `statement_timeout`. When the context ends mid-statement
/// the statement is cancelled on the server before the rollback is sent, so the
/// rollback does not queue behind it. If the body panics the inner sqlx
/// transaction is dropped, which rolls it back on the connection before the
/// connection is reused.
pub struct ScopedTransaction {
    tx: Transaction<'static, Postgres>,
    pool: PgPool,
    backend_pid: i32,
    operation: &'static str,
    order_id: Option<OrderId>,
}

impl ScopedTransaction {
    /// Begins a transaction on a pooled connection under `ctx`.
    pub async fn begin(
        pool: &PgPool,
        ctx: &ExecutionContext,
        operation: &'static str,
        order_id: Option<OrderId>,
    ) -> Result<Self> {
        let mut tx = guarded(ctx, operation, order_id, pool.begin()).await?;

        let backend_pid: i32 = guarded(
            ctx,
            operation,
            order_id,
            sqlx::query_scalar("SELECT pg_backend_pid()").fetch_one(&mut *tx),
        )
        .await?;

        if let Some(remaining) = ctx.remaining() {
            guarded(
                ctx,
                operation,
                order_id,
                sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                    .bind(statement_timeout(remaining))
                    .execute(&mut *tx),
            )
            .await?;
        }

        tracing::debug!(operation, backend_pid, "transaction started");
        Ok(Self {
            tx,
            pool: pool.clone(),
            backend_pid,
            operation,
            order_id,
        })
    }

    /// Connection to issue statements on.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Server process serving this transaction.
    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    /// Records the order id once the store has assigned it.
    pub fn set_order_id(&mut self, order_id: OrderId) {
        self.order_id = Some(order_id);
    }

    /// Commits if `result` is `Ok` and `ctx` is still live, rolls back otherwise.
    ///
    /// A failed rollback is logged and never replaces the error that caused it.
    pub async fn finish<T>(self, ctx: &ExecutionContext, result: Result<T>) -> Result<T> {
        let operation = self.operation;
        let result = result.and_then(|value| match ctx.err() {
            Some(ended) => Err(StoreError::from_context(operation, ended)),
            None => Ok(value),
        });

        match result {
            Ok(value) => {
                let Self { tx, order_id, .. } = self;
                guarded(ctx, operation, order_id, tx.commit()).await?;
                tracing::debug!(operation, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                self.rollback(&err).await;
                Err(err)
            }
        }
    }

    async fn rollback(self, cause: &StoreError) {
        let operation = self.operation;
        let order_id = self.order_id.map(|id| id.as_i64());
        metrics::counter!("order_store_rollbacks_total", "operation" => operation).increment(1);

        // The request context may already be over; use a short-lived one of our own.
        let cleanup = ExecutionContext::background().with_timeout(ROLLBACK_TIMEOUT);
        if cause.is_context_error() {
            self.cancel_in_flight(&cleanup).await;
        }

        match cleanup.run(self.tx.rollback()).await {
            Ok(Ok(())) => {
                tracing::debug!(operation, ?order_id, cause = %cause, "transaction rolled back");
            }
            Ok(Err(rollback_err)) => {
                tracing::error!(
                    operation,
                    ?order_id,
                    cause = %cause,
                    error = %rollback_err,
                    "failed to roll back transaction"
                );
            }
            Err(_) => {
                tracing::error!(operation, ?order_id, cause = %cause, "rollback timed out");
            }
        }
    }

    /// Asks the server to abort whatever this transaction's backend is running.
    ///
    /// Sent from another pooled connection. A backend that is idle ignores it.
    async fn cancel_in_flight(&self, cleanup: &ExecutionContext) {
        let operation = self.operation;
        let backend_pid = self.backend_pid;
        let request = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
            .bind(backend_pid)
            .fetch_one(&self.pool);

        match cleanup.run(request).await {
            Ok(Ok(signalled)) => {
                tracing::debug!(operation, backend_pid, signalled, "in-flight statement cancelled");
            }
            Ok(Err(e)) => {
                tracing::warn!(operation, backend_pid, error = %e, "failed to cancel in-flight statement");
            }
            Err(_) => {
                tracing::warn!(operation, backend_pid, "cancel request timed out");
            }
        }
    }
}
