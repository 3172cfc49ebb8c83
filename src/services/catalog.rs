use crate::{entities::product, errors::ServiceError};
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::{error, instrument, warn};

/// Read-only product lookups for checkout.
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, product_id: i32) -> Result<Option<product::Model>, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, product_id, "Failed to load product");
                ServiceError::DatabaseError(e)
            })
    }

    /// First image of the product, if any.
    ///
    /// An undecodable image column is logged and treated as having no images.
    pub fn primary_image(product: &product::Model) -> Option<String> {
        match product.image_list() {
            Ok(images) => images.into_iter().next(),
            Err(e) => {
                warn!(product_id = product.id, error = %e, "Ignoring malformed images column");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::seed_product;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn finds_existing_and_reports_missing() {
        let db = Arc::new(crate::db::test_pool().await);
        let catalog = CatalogService::new(db.clone());
        let product = seed_product(&db, "Lamp", dec!(10.00), 5).await;

        let found = catalog.find_by_id(product.id).await.unwrap().unwrap();
        assert_eq!(found.name, "Lamp");
        assert_eq!(found.price, dec!(10.00));
        assert!(catalog.find_by_id(product.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn primary_image_is_first_entry_or_none() {
        let db = Arc::new(crate::db::test_pool().await);
        let mut product = seed_product(&db, "Lamp", dec!(10.00), 5).await;

        product.images = Some(r#"["/a.png","/b.png"]"#.into());
        assert_eq!(CatalogService::primary_image(&product).as_deref(), Some("/a.png"));

        product.images = Some("not json".into());
        assert_eq!(CatalogService::primary_image(&product), None);

        product.images = None;
        assert_eq!(CatalogService::primary_image(&product), None);
    }
}
