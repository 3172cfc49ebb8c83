//! Seed data script - populates the database with demo shoppers and products
//!
//! Run with: cargo run --bin seed-data -- --migrate
//!
//! This creates:
//! - 8 listed products and 1 unlisted one
//! - 3 shoppers with a balance and a default address
//! - a selected cart line for the first shopper
//!
//! and prints bearer tokens for every shopper plus an admin.

use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::sync::Arc;
use tracing::info;

use storefront_api::{
    auth::{AuthConfig, AuthService, Role},
    config,
    db,
    entities::{address, product, user},
    services::cart::CartService,
};

#[derive(Parser, Debug)]
#[command(name = "seed-data", about = "Populate the storefront database with demo data")]
struct Args {
    /// Database URL; defaults to the configured one
    #[arg(long)]
    database_url: Option<String>,

    /// Run migrations before seeding
    #[arg(long)]
    migrate: bool,

    /// Id embedded in the printed admin token
    #[arg(long, default_value_t = 1)]
    admin_id: i32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let mut cfg = config::load_config()?;
    if let Some(url) = args.database_url {
        cfg.database_url = url;
    }

    info!("=== Storefront Seed Data ===");
    info!("Connecting to database: {}", cfg.database_url);
    let conn = db::establish_connection_from_app_config(&cfg).await?;
    if args.migrate {
        db::run_migrations(&conn).await?;
    }
    let conn = Arc::new(conn);

    info!("Creating products...");
    let products = create_products(&conn).await?;
    info!("  Created {} products", products.len());

    info!("Creating shoppers...");
    let shoppers = create_shoppers(&conn).await?;
    info!("  Created {} shoppers with addresses", shoppers.len());

    if let (Some((shopper, _)), Some(first)) = (shoppers.first(), products.first()) {
        CartService::new(conn.clone())
            .add_item(shopper.id, first.id, 2, true)
            .await?;
        info!("  Put 2 x '{}' in {}'s cart", first.name, shopper.username);
    }

    let auth = AuthService::new(AuthConfig::from(&cfg));
    info!("");
    info!("Bearer tokens:");
    for (shopper, addr) in &shoppers {
        let token = auth.issue_token(shopper.id, &shopper.username, Role::User)?;
        info!("  {} (address {}): {}", shopper.username, addr.id, token);
    }
    let admin_token = auth.issue_token(args.admin_id, "admin", Role::Admin)?;
    info!("  admin: {}", admin_token);

    info!("");
    info!("Try: curl -H 'Authorization: Bearer <token>' http://{}:{}/api/v1/orders", cfg.host, cfg.port);
    info!("Or explore interactively at: http://{}:{}/swagger-ui", cfg.host, cfg.port);

    Ok(())
}

async fn create_products(db: &DatabaseConnection) -> anyhow::Result<Vec<product::Model>> {
    let products_data = vec![
        ("Wireless Bluetooth Headphones", dec!(79.99), 120, "Over-ear, 30-hour battery.", true),
        ("USB-C Fast Charger 65W", dec!(34.99), 300, "GaN charger for laptops and phones.", true),
        ("Mechanical Keyboard", dec!(129.99), 45, "Hot-swappable switches.", true),
        ("Classic Cotton T-Shirt", dec!(24.99), 500, "Organic cotton, regular fit.", true),
        ("Slim Fit Denim Jeans", dec!(89.99), 80, "Stretch denim.", true),
        ("Leather Bifold Wallet", dec!(49.99), 60, "Genuine leather.", true),
        ("Canvas Backpack 25L", dec!(79.99), 3, "Water-resistant, laptop sleeve.", true),
        ("Steel Water Bottle", dec!(29.99), 0, "Out of stock on purpose.", true),
        ("Prototype Drone", dec!(999.00), 10, "Not for sale yet.", false),
    ];

    let mut created = Vec::new();
    for (i, (name, price, stock, description, listed)) in products_data.into_iter().enumerate() {
        let images = product::encode_images(&[format!("/img/products/{}.jpg", i + 1)])?;
        let model = product::ActiveModel {
            name: Set(name.to_string()),
            description: Set(Some(description.to_string())),
            price: Set(price),
            stock: Set(stock),
            sales: Set(0),
            images: Set(Some(images)),
            status: Set(if listed {
                product::ProductStatus::Listed
            } else {
                product::ProductStatus::Unlisted
            }),
            ..Default::default()
        }
        .insert(db)
        .await?;
        created.push(model);
    }

    Ok(created)
}

async fn create_shoppers(
    db: &DatabaseConnection,
) -> anyhow::Result<Vec<(user::Model, address::Model)>> {
    let shoppers_data: Vec<(&str, Decimal, &str, &str)> = vec![
        ("alice", dec!(1000.00), "Shanghai", "100 Century Ave"),
        ("bob", dec!(50.00), "Hangzhou", "12 West Lake Rd"),
        ("carol", Decimal::ZERO, "Chengdu", "7 Jinli St"),
    ];

    let mut created = Vec::new();
    for (i, (username, balance, city, street)) in shoppers_data.into_iter().enumerate() {
        let shopper = user::ActiveModel {
            username: Set(username.to_string()),
            balance: Set(balance),
            ..Default::default()
        }
        .insert(db)
        .await?;

        let addr = address::ActiveModel {
            user_id: Set(shopper.id),
            receiver_name: Set(username.to_string()),
            phone: Set(format!("1380000{:04}", i + 1)),
            province: Set(None),
            city: Set(Some(city.to_string())),
            district: Set(None),
            detail_address: Set(street.to_string()),
            is_default: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await?;

        created.push((shopper, addr));
    }

    Ok(created)
}
