use crate::{entities::address, errors::ServiceError};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};
use utoipa::ToSchema;

/// Frozen copy of a shipping address, stored as JSON on the order.
///
/// Field order and names are the stored format; add fields only as optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressSnapshot {
    pub id: i32,
    pub user_id: i32,
    pub receiver_name: String,
    pub phone: String,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub detail_address: String,
}

impl From<&address::Model> for AddressSnapshot {
    fn from(model: &address::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            receiver_name: model.receiver_name.clone(),
            phone: model.phone.clone(),
            province: model.province.clone(),
            city: model.city.clone(),
            district: model.district.clone(),
            detail_address: model.detail_address.clone(),
        }
    }
}

impl AddressSnapshot {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Clone)]
pub struct AddressService {
    db_pool: Arc<DatabaseConnection>,
}

impl AddressService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, address_id: i32) -> Result<Option<address::Model>, ServiceError> {
        address::Entity::find_by_id(address_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, address_id, "Failed to load address");
                ServiceError::DatabaseError(e)
            })
    }
}
