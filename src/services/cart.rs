use crate::{entities::cart_item, errors::ServiceError};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{error, instrument};

/// One selected cart row, as consumed by checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    /// Selected rows for the user, oldest first. Product availability is not
    /// filtered here; checkout validates every line.
    #[instrument(skip(self))]
    pub async fn find_selected_by_user(&self, user_id: i32) -> Result<Vec<CartLine>, ServiceError> {
        let rows = cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::Selected.eq(true))
            .order_by_asc(cart_item::Column::Id)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, user_id, "Failed to load selected cart items");
                ServiceError::DatabaseError(e)
            })?;

        Ok(rows
            .into_iter()
            .map(|row| CartLine {
                product_id: row.product_id,
                quantity: row.quantity,
            })
            .collect())
    }

    /// Removes the user's selected rows; returns how many were removed.
    #[instrument(skip(self))]
    pub async fn delete_selected(&self, user_id: i32) -> Result<u64, ServiceError> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::Selected.eq(true))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, user_id, "Failed to clear selected cart items");
                ServiceError::DatabaseError(e)
            })?;
        Ok(result.rows_affected)
    }

    /// Adds `quantity` of a product to the cart, merging with an existing row.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: i32,
        product_id: i32,
        quantity: i32,
        selected: bool,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let merged = cart_item::Entity::update_many()
            .col_expr(
                cart_item::Column::Quantity,
                Expr::col(cart_item::Column::Quantity).add(quantity),
            )
            .col_expr(cart_item::Column::Selected, Expr::value(selected))
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        if merged.rows_affected == 0 {
            cart_item::ActiveModel {
                user_id: Set(user_id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                selected: Set(selected),
                ..Default::default()
            }
            .insert(db)
            .await
            .map_err(|e| {
                error!(error = %e, user_id, product_id, "Failed to add cart item");
                ServiceError::DatabaseError(e)
            })?;
        }
        Ok(())
    }
}
