use crate::{entities::user, errors::ServiceError};
use rust_decimal::Decimal;
use sea_orm::{sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Balance ledger on user accounts.
#[derive(Clone)]
pub struct AccountService {
    db_pool: Arc<DatabaseConnection>,
}

impl AccountService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn find_user(&self, user_id: i32) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, user_id, "Failed to load user");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }

    /// `balance += delta`. Sufficiency for debits is the caller's check.
    #[instrument(skip(self), fields(delta = %delta))]
    pub async fn adjust_balance(&self, user_id: i32, delta: Decimal) -> Result<(), ServiceError> {
        let result = user::Entity::update_many()
            .col_expr(
                user::Column::Balance,
                Expr::col(user::Column::Balance).add(delta),
            )
            .filter(user::Column::Id.eq(user_id))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, user_id, "Failed to adjust balance");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("User {} not found", user_id)));
        }

        info!(user_id, %delta, "Balance adjusted");
        Ok(())
    }
}
