pub mod admin_orders;
pub mod orders;

use crate::events::EventSender;
use crate::services::orders::{OrderService, OrderSettings};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            orders: Arc::new(OrderService::new(db_pool, event_sender, settings)),
        }
    }
}
