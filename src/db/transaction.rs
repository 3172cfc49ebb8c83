//! Atomic multi-statement execution.
//!
//! Everything the closure does through `txn` commits together or not at all.
//! Returning `Err` from the closure rolls the unit back and hands the same
//! error to the caller; failures to begin or commit arrive through
//! `E: From<DbErr>`.

use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionError, TransactionTrait};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};
use uuid::Uuid;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Execute a function within a database transaction
///
/// ```rust,ignore
/// let order = with_transaction(&db, |txn| {
///     Box::pin(async move {
///         let order = order_model.insert(txn).await?;
///         order_item::Entity::insert_many(items).exec(txn).await?;
///         Ok::<_, ServiceError>(order)
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T, E>(db: &DatabaseConnection, f: F) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T, E>> + Send,
    T: Send,
    E: std::error::Error + From<DbErr> + Send,
{
    let transaction_id = Uuid::new_v4();
    debug!(%transaction_id, "Starting transaction");

    match db.transaction::<F, T, E>(f).await {
        Ok(value) => {
            debug!(%transaction_id, "Transaction committed");
            Ok(value)
        }
        Err(TransactionError::Connection(db_err)) => {
            warn!(%transaction_id, error = %db_err, "Transaction failed at begin/commit");
            Err(E::from(db_err))
        }
        Err(TransactionError::Transaction(err)) => {
            warn!(%transaction_id, error = %err, "Transaction rolled back");
            Err(err)
        }
    }
}
