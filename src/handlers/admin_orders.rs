use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth::AdminUser,
    errors::ServiceError,
    handlers::orders::{money, status_filter, OrderResponse},
    services::{
        order_status::OrderAction,
        orders::{OrderListFilter, OrderStats},
    },
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderStatsResponse {
    pub total_orders: u64,
    /// Sum of order totals over paid, unreversed orders.
    #[schema(value_type = String, example = "1280.50")]
    pub revenue: Decimal,
    /// Order count keyed by status name; every status is present.
    pub by_status: BTreeMap<String, u64>,
    /// The five newest orders.
    pub recent_orders: Vec<OrderResponse>,
}

impl From<OrderStats> for OrderStatsResponse {
    fn from(stats: OrderStats) -> Self {
        Self {
            total_orders: stats.total_orders,
            revenue: money(stats.revenue),
            by_status: stats
                .by_status
                .into_iter()
                .map(|(status, count)| (status.to_string(), count))
                .collect(),
            recent_orders: stats.recent.into_iter().map(OrderResponse::from).collect(),
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    summary = "List all orders",
    description = "Paginated list of every order, newest first. `keyword` matches the order number or the owner's username.",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20, max: 100)"),
        ("status" = Option<i32>, Query, description = "Filter by status code (0-7)"),
        ("keyword" = Option<String>, Query, description = "Order number or username substring"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 400, description = "Invalid status code", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let filter = OrderListFilter {
        status: status_filter(query.status)?,
        keyword: query.keyword,
    };
    let page = state
        .services
        .orders
        .list_all(query.page, query.limit, filter)
        .await?;
    Ok(Json(ApiResponse::success(page.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/stats",
    summary = "Order statistics",
    description = "Total order count, revenue over paid, shipped, delivered and completed orders, per-status counts and the newest orders",
    responses(
        (status = 200, description = "Statistics computed", body = ApiResponse<OrderStatsResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn order_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<ApiResponse<OrderStatsResponse>>, ServiceError> {
    let stats = state.services.orders.stats().await?;
    Ok(Json(ApiResponse::success(stats.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders/{order_no}",
    summary = "Get any order",
    params(("order_no" = String, Path, description = "Order number")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn get_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(order_no): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get(&order_no).await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{order_no}/{action}",
    summary = "Apply an admin action",
    description = "`ship` ships a paid order, `refund` refunds a paid or shipped order, `cancel` cancels an unpaid or paid order and returns any payment",
    params(
        ("order_no" = String, Path, description = "Order number"),
        ("action" = String, Path, description = "ship | refund | cancel"),
    ),
    responses(
        (status = 200, description = "Action applied", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Unknown action or status does not allow it", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn apply_admin_action(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path((order_no, action)): Path<(String, String)>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let action = OrderAction::parse_admin(&action)?;
    let orders = &state.services.orders;
    let updated = match action {
        OrderAction::Ship => orders.admin_ship(&order_no).await?,
        OrderAction::Refund => orders.admin_refund(&order_no).await?,
        OrderAction::AdminCancel => orders.admin_cancel(&order_no).await?,
        other => {
            return Err(ServiceError::ValidationError(format!(
                "unknown action '{}'",
                other
            )))
        }
    };
    info!(admin = %admin.username, %order_no, %action, "Admin order action");
    Ok(Json(ApiResponse::success_with_message(
        updated.into(),
        format!("{} applied", action),
    )))
}
