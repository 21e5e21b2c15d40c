//! Seed data script - populates the database with a small dispatch scenario
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - 1 customer and 1 admin
//! - a configurable number of delivery agents, all available
//! - 1 shop owner with one shop and a handful of products
//!
//! and prints a bearer token for every seeded identity.

use anyhow::Context;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tracing::info;
use uuid::Uuid;

use dispatch_api::{
    auth::{AuthConfig, AuthService},
    config, db,
    entities::{
        product, shop,
        user::{self, Role},
    },
};

#[derive(Parser)]
#[command(
    name = "seed-data",
    about = "Seed demo users, a shop and products, then print bearer tokens",
    version
)]
struct Cli {
    /// Overrides `database_url` from the loaded configuration
    #[arg(long)]
    database_url: Option<String>,

    #[arg(long, default_value_t = 3, help = "Number of delivery agents to create")]
    agents: usize,

    #[arg(long, help = "Skip running migrations before seeding")]
    skip_migrations: bool,
}

struct Seeded {
    label: String,
    user: user::Model,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }

    info!("=== Dispatch API Seed Data ===");
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if !cli.skip_migrations {
        db::run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
    }

    let suffix = short_suffix();
    let mut seeded = Vec::new();

    let customer = create_user(&pool, "Demo Customer", "customer", &suffix, Role::Customer).await?;
    seeded.push(Seeded {
        label: "customer".into(),
        user: customer,
    });

    let admin = create_user(&pool, "Demo Admin", "admin", &suffix, Role::Admin).await?;
    seeded.push(Seeded {
        label: "admin".into(),
        user: admin,
    });

    for n in 1..=cli.agents {
        let agent = create_user(
            &pool,
            &format!("Agent {}", n),
            &format!("agent{}", n),
            &suffix,
            Role::Delivery,
        )
        .await?;
        seeded.push(Seeded {
            label: format!("delivery #{}", n),
            user: agent,
        });
    }

    let owner = create_user(&pool, "Corner Store Owner", "owner", &suffix, Role::Shop).await?;
    let shop = create_shop(&pool, owner.id).await?;
    let products = create_products(&pool, shop.id).await?;
    info!("  Created shop {} with {} products", shop.id, products.len());
    seeded.push(Seeded {
        label: "shop".into(),
        user: owner,
    });
    info!("  Created {} users", seeded.len());

    let auth = AuthService::new(AuthConfig::from(&cfg));
    println!();
    println!("Shop: {} ({})", shop.name, shop.id);
    for p in &products {
        println!("  product {}  {}  @ {}", p.id, p.name, p.price);
    }
    println!();
    for entry in &seeded {
        let token = auth
            .issue_token(entry.user.id, entry.user.role, Some(entry.user.name.clone()))
            .with_context(|| format!("failed to issue token for {}", entry.label))?;
        println!("{:<12} {}  {}", entry.label, entry.user.id, entry.user.email);
        println!("  Authorization: Bearer {}", token);
    }

    info!("=== Seed Data Complete ===");
    info!("Explore interactively at: http://{}:{}/swagger-ui", cfg.host, cfg.port);
    Ok(())
}

fn short_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

async fn create_user(
    db: &DatabaseConnection,
    name: &str,
    handle: &str,
    suffix: &str,
    role: Role,
) -> anyhow::Result<user::Model> {
    let is_agent = role == Role::Delivery;
    let model = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        email: Set(format!("{}+{}@dispatch.test", handle, suffix)),
        phone: Set(Some("555-0100".to_string())),
        role: Set(role),
        is_available: Set(is_agent),
        vehicle_details: Set(is_agent.then(|| "scooter".to_string())),
        current_lat: Set(None),
        current_lng: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model)
}

async fn create_shop(db: &DatabaseConnection, owner_id: Uuid) -> anyhow::Result<shop::Model> {
    let model = shop::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        name: Set("Corner Store".to_string()),
        street: Set(Some("1 Market Street".to_string())),
        city: Set(Some("Springfield".to_string())),
        lat: Set(Some(12.9716)),
        lng: Set(Some(77.5946)),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(model)
}

async fn create_products(
    db: &DatabaseConnection,
    shop_id: Uuid,
) -> anyhow::Result<Vec<product::Model>> {
    let catalog: [(&str, Decimal); 4] = [
        ("Bread", dec!(10.00)),
        ("Milk", dec!(5.00)),
        ("Eggs (dozen)", dec!(6.50)),
        ("Coffee beans", dec!(14.25)),
    ];

    let mut created = Vec::with_capacity(catalog.len());
    for (name, price) in catalog {
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            shop_id: Set(shop_id),
            name: Set(name.to_string()),
            price: Set(price),
            ..Default::default()
        }
        .insert(db)
        .await?;
        created.push(model);
    }
    Ok(created)
}
