use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Order API

Checkout and order lifecycle for the storefront.

## Order lifecycle

```
PENDING_PAYMENT(0) -> PAID(1) -> SHIPPED(2) -> COMPLETED(4)
PENDING_PAYMENT    -> CANCELLED(5)        (cancel, admin cancel)
PAID               -> CANCELLED(5)        (admin cancel, payment returned)
PAID | SHIPPED     -> REFUNDED(7)         (admin refund)
```

`COMPLETED`, `CANCELLED` and `REFUNDED` are final. Every action names the
exact statuses it accepts; anything else is rejected with `invalid_status`
and the order is left untouched.

## Authentication

All `/api/v1` endpoints require a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

`/api/v1/admin/*` additionally requires the `admin` role.

## Error Handling

Rejected requests return an `ErrorResponse` with a stable `code`:

```json
{
  "error": "Payment Required",
  "code": "insufficient_balance",
  "message": "Insufficient balance: order total 30.00 exceeds balance 20.00",
  "request_id": "6d1f0c1e-8a5b-4f1e-9a43-3c2f0b7d9e10",
  "timestamp": "2024-03-01T12:00:00Z"
}
```

## Pagination

List endpoints accept `page` (default 1) and `limit` (default 20, max 100).
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Shopper checkout and order actions"),
        (name = "admin", description = "Order administration")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_my_order,
        crate::handlers::orders::apply_user_action,
        crate::handlers::admin_orders::list_orders,
        crate::handlers::admin_orders::order_stats,
        crate::handlers::admin_orders::get_order,
        crate::handlers::admin_orders::apply_admin_action,
    ),
    components(
        schemas(
            crate::handlers::orders::CreateOrderRequest,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderItemResponse,
            crate::services::orders::OrderLineRequest,
            crate::handlers::admin_orders::OrderStatsResponse,
            crate::services::addresses::AddressSnapshot,
            crate::services::order_status::OrderAction,
            crate::entities::order::OrderStatus,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

/// Registers the `Bearer` security scheme referenced by every path.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
