use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Whether a product can currently be ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[sea_orm(num_value = 0)]
    Unlisted,
    #[sea_orm(num_value = 1)]
    Listed,
}

/// Catalog product
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    /// Units on hand. Not clamped at zero by the store.
    pub stock: i32,
    /// Units sold through paid orders.
    pub sales: i32,
    /// JSON array of image URLs, see [`encode_images`].
    #[sea_orm(column_type = "Text", nullable)]
    pub images: Option<String>,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn is_listed(&self) -> bool {
        self.status == ProductStatus::Listed
    }

    /// Decoded image list; a missing column reads as no images.
    pub fn image_list(&self) -> Result<Vec<String>, serde_json::Error> {
        match self.images.as_deref() {
            Some(raw) => decode_images(raw),
            None => Ok(Vec::new()),
        }
    }
}

/// Encodes an image list for the `images` column.
pub fn encode_images(images: &[String]) -> Result<String, serde_json::Error> {
    serde_json::to_string(images)
}

/// Decodes the `images` column.
///
/// The column holds a JSON array of strings. Blank text decodes to an empty
/// list and blank entries are dropped; anything else is an error.
pub fn decode_images(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let images: Vec<String> = serde_json::from_str(raw)?;
    Ok(images
        .into_iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .collect())
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItem,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        if insert && self.created_at.is_not_set() {
            self.created_at = Set(now);
        }
        self.updated_at = Set(now);
        Ok(self)
    }
}
