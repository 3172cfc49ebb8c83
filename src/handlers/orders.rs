use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    auth::AuthUser,
    entities::{order::OrderStatus, order_item},
    errors::ServiceError,
    services::{
        addresses::AddressSnapshot,
        order_status::OrderAction,
        orders::{CreateOrderInput, OrderLineRequest, OrderPage, OrderSource, OrderWithItems},
    },
    ApiResponse, AppState, ListQuery, PaginatedResponse,
};

/// Checkout request: either the selected cart rows or an explicit item list.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(range(min = 1, message = "addressId must be positive"))]
    pub address_id: i32,
    #[validate(length(max = 255, message = "remark must be at most 255 characters"))]
    pub remark: Option<String>,
    #[serde(default)]
    pub from_cart: bool,
    /// Required unless `fromCart` is true; ignored when it is.
    pub items: Option<Vec<OrderLineRequest>>,
}

impl CreateOrderRequest {
    /// Validates the request and converts it into the service input.
    pub fn into_input(self) -> Result<CreateOrderInput, ServiceError> {
        self.validate()?;
        let source = if self.from_cart {
            OrderSource::Cart
        } else {
            let items = self.items.ok_or_else(|| {
                ServiceError::ValidationError(
                    "items are required unless fromCart is true".to_string(),
                )
            })?;
            for item in &items {
                item.validate()?;
            }
            OrderSource::Direct(items)
        };
        Ok(CreateOrderInput {
            address_id: self.address_id,
            remark: self.remark,
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub product_image: Option<String>,
    #[schema(value_type = String, example = "10.00")]
    pub price: Decimal,
    pub quantity: i32,
    #[schema(value_type = String, example = "30.00")]
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: i32,
    pub order_no: String,
    pub user_id: i32,
    #[schema(value_type = String, example = "30.00")]
    pub total_amount: Decimal,
    #[schema(value_type = String, example = "0.00")]
    pub shipping_fee: Decimal,
    pub status: OrderStatus,
    pub status_code: i32,
    pub address_id: i32,
    /// Shipping address as it was at checkout.
    pub address: Option<AddressSnapshot>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

/// Money is always presented with two decimal places.
pub(crate) fn money(mut amount: Decimal) -> Decimal {
    amount.rescale(2);
    amount
}

impl From<&order_item::Model> for OrderItemResponse {
    fn from(item: &order_item::Model) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            product_image: item.product_image.clone(),
            price: money(item.price),
            quantity: item.quantity,
            subtotal: money(item.subtotal()),
        }
    }
}

impl From<OrderWithItems> for OrderResponse {
    fn from(value: OrderWithItems) -> Self {
        let OrderWithItems { order, items } = value;
        let address = match AddressSnapshot::decode(&order.address_snapshot) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(order_no = %order.order_no, error = %e, "Unreadable address snapshot");
                None
            }
        };
        Self {
            id: order.id,
            user_id: order.user_id,
            total_amount: money(order.total_amount),
            shipping_fee: money(order.shipping_fee),
            status: order.status,
            status_code: order.status.code(),
            address_id: order.address_id,
            address,
            remark: order.remark,
            created_at: order.created_at,
            paid_at: order.paid_at,
            shipped_at: order.shipped_at,
            completed_at: order.completed_at,
            items: items.iter().map(OrderItemResponse::from).collect(),
            order_no: order.order_no,
        }
    }
}

impl From<OrderPage> for PaginatedResponse<OrderResponse> {
    fn from(page: OrderPage) -> Self {
        let total_pages = page.total.div_ceil(page.limit.max(1));
        Self {
            items: page.orders.into_iter().map(OrderResponse::from).collect(),
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages,
        }
    }
}

/// Parses the optional `status` code of a list query.
pub(crate) fn status_filter(code: Option<i32>) -> Result<Option<OrderStatus>, ServiceError> {
    code.map(|code| {
        OrderStatus::from_code(code)
            .ok_or_else(|| ServiceError::ValidationError(format!("unknown status code {}", code)))
    })
    .transpose()
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Create an order from the selected cart rows or from an explicit item list. Prices, names and the shipping address are frozen on the order.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request, address or item set", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order could not be persisted", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let input = request.into_input()?;
    let created = state
        .services
        .orders
        .create_order(auth_user.user_id, input)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderResponse::from(created))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    description = "Paginated list of the caller's orders, newest first",
    params(
        ("page" = Option<u64>, Query, description = "Page number (default: 1)"),
        ("limit" = Option<u64>, Query, description = "Items per page (default: 20, max: 100)"),
        ("status" = Option<i32>, Query, description = "Filter by status code (0-7)"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 400, description = "Invalid status code", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderResponse>>>, ServiceError> {
    let status = status_filter(query.status)?;
    let page = state
        .services
        .orders
        .list_for_user(auth_user.user_id, query.page, query.limit, status)
        .await?;
    Ok(Json(ApiResponse::success(page.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_no}",
    summary = "Get my order",
    params(("order_no" = String, Path, description = "Order number")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_my_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_no): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_for_user(&order_no, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{order_no}/{action}",
    summary = "Apply a shopper action",
    description = "`pay` debits the balance, `cancel` cancels an unpaid order, `confirm` confirms receipt of a shipped order",
    params(
        ("order_no" = String, Path, description = "Order number"),
        ("action" = String, Path, description = "pay | cancel | confirm"),
    ),
    responses(
        (status = 200, description = "Action applied", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Unknown action or status does not allow it", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 402, description = "Insufficient balance", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn apply_user_action(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path((order_no, action)): Path<(String, String)>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let action = OrderAction::parse_user(&action)?;
    let orders = &state.services.orders;
    let updated = match action {
        OrderAction::Pay => orders.pay(&order_no, auth_user.user_id).await?,
        OrderAction::Cancel => orders.cancel_by_user(&order_no, auth_user.user_id).await?,
        OrderAction::Confirm => orders.confirm_receipt(&order_no, auth_user.user_id).await?,
        other => {
            return Err(ServiceError::ValidationError(format!(
                "unknown action '{}'",
                other
            )))
        }
    };
    Ok(Json(ApiResponse::success_with_message(
        updated.into(),
        format!("{} applied", action),
    )))
}
