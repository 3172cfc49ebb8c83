#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::Value;
use storefront_api::{
    auth::Role,
    config::AppConfig,
    db,
    entities::{address, cart_item, order, product, user},
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "integration_secret_key_at_least_32_chars";

/// Full application router over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), cfg, None);
        let router = storefront_api::app(state.clone());

        Self {
            router,
            state,
            _dir: dir,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        self.state
            .auth
            .issue_token(user.id, &user.username, Role::User)
            .expect("issue user token")
    }

    pub fn admin_token(&self) -> String {
        self.state
            .auth
            .issue_token(9_999, "ops", Role::Admin)
            .expect("issue admin token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn seed_user(&self, username: &str, balance: Decimal) -> user::Model {
        user::ActiveModel {
            username: Set(username.to_string()),
            balance: Set(balance),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed user")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        let images = product::encode_images(&[format!("/img/{}.png", name)]).expect("images");
        product::ActiveModel {
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            stock: Set(stock),
            sales: Set(0),
            images: Set(Some(images)),
            status: Set(product::ProductStatus::Listed),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed product")
    }

    pub async fn seed_address(&self, user_id: i32) -> address::Model {
        address::ActiveModel {
            user_id: Set(user_id),
            receiver_name: Set("Han Meimei".to_string()),
            phone: Set("13700000000".to_string()),
            province: Set(Some("Zhejiang".to_string())),
            city: Set(Some("Hangzhou".to_string())),
            district: Set(None),
            detail_address: Set("1 Wensan Rd".to_string()),
            is_default: Set(true),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed address")
    }

    pub async fn seed_cart(&self, user_id: i32, product_id: i32, quantity: i32, selected: bool) {
        cart_item::ActiveModel {
            user_id: Set(user_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            selected: Set(selected),
            ..Default::default()
        }
        .insert(self.db())
        .await
        .expect("seed cart item");
    }

    pub async fn product(&self, id: i32) -> product::Model {
        product::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load product")
            .expect("product exists")
    }

    pub async fn user(&self, id: i32) -> user::Model {
        user::Entity::find_by_id(id)
            .one(self.db())
            .await
            .expect("load user")
            .expect("user exists")
    }

    pub async fn order_count(&self) -> usize {
        order::Entity::find()
            .all(self.db())
            .await
            .expect("load orders")
            .len()
    }

    pub async fn cart_len(&self, user_id: i32) -> usize {
        use sea_orm::{ColumnTrait, QueryFilter};
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .all(self.db())
            .await
            .expect("load cart")
            .len()
    }

    pub async fn execute_sql(&self, sql: &str) {
        self.db()
            .execute_unprepared(sql)
            .await
            .expect("execute raw sql");
    }
}

/// Shopper with a balance, an address and a token.
pub struct Shopper {
    pub user: user::Model,
    pub address: address::Model,
    pub token: String,
}

impl TestApp {
    pub async fn shopper(&self, username: &str, balance: Decimal) -> Shopper {
        let user = self.seed_user(username, balance).await;
        let address = self.seed_address(user.id).await;
        let token = self.token_for(&user);
        Shopper {
            user,
            address,
            token,
        }
    }
}
