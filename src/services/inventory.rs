use crate::{entities::product, errors::ServiceError};
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Stock and sales counters on products.
///
/// Adjustments are plain `col = col + delta` updates. They do not check the
/// result against zero; decrements must be validated by the caller first.
#[derive(Clone)]
pub struct InventoryService {
    db_pool: Arc<DatabaseConnection>,
}

impl InventoryService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn adjust_stock(&self, product_id: i32, delta: i32) -> Result<(), ServiceError> {
        self.adjust(product::Column::Stock, product_id, delta).await
    }

    #[instrument(skip(self))]
    pub async fn adjust_sales(&self, product_id: i32, delta: i32) -> Result<(), ServiceError> {
        self.adjust(product::Column::Sales, product_id, delta).await
    }

    async fn adjust(
        &self,
        column: product::Column,
        product_id: i32,
        delta: i32,
    ) -> Result<(), ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(column, Expr::col(column).add(delta))
            .filter(product::Column::Id.eq(product_id))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, product_id, delta, ?column, "Failed to adjust product counter");
                ServiceError::DatabaseError(e)
            })?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        debug!(product_id, delta, ?column, "Adjusted product counter");
        Ok(())
    }
}
