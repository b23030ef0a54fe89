#![allow(dead_code)]

use axum_pos_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    entity::{
        products::{ActiveModel as ProductActive, Model as ProductModel},
        users::{ActiveModel as UserActive, Role},
        Products,
    },
    middleware::{auth::AuthUser, tenant::TenantContext},
    state::AppState,
};
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

/// Connect to the test database, or `None` when none is configured.
///
/// Tests create their own tenants instead of truncating tables, so they can
/// share a database and run in parallel.
pub async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration tests.");
            return Ok(None);
        }
    };

    let config = AppConfig::for_database(&database_url);
    let pool = create_pool(&database_url, config.max_connections).await?;
    run_migrations(&pool).await?;
    Ok(Some(AppState::new(pool, config)))
}

pub async fn create_tenant(state: &AppState, name: &str, active: bool) -> anyhow::Result<TenantContext> {
    let (id,): (i64,) =
        sqlx::query_as("INSERT INTO tenants (name, is_active) VALUES ($1, $2) RETURNING id")
            .bind(name)
            .bind(active)
            .fetch_one(&state.pool)
            .await?;
    Ok(TenantContext {
        tenant_id: id,
        tenant_name: name.to_string(),
    })
}

pub async fn create_user(
    state: &AppState,
    tenant: &TenantContext,
    role: Role,
) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    UserActive {
        id: Set(id),
        tenant_id: Set(tenant.tenant_id),
        name: Set(format!("{role} user")),
        email: Set(format!("{id}@example.com")),
        password_hash: Set("not-a-real-hash".into()),
        role: Set(role),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: id,
        tenant_id: tenant.tenant_id,
        role,
    })
}

pub async fn create_product(
    state: &AppState,
    tenant: &TenantContext,
    price: &str,
    stock: i32,
) -> anyhow::Result<ProductModel> {
    let id = Uuid::new_v4();
    let product = ProductActive {
        id: Set(id),
        tenant_id: Set(tenant.tenant_id),
        name: Set(format!("Product {id}")),
        sku: Set(format!("SKU-{id}")),
        description: Set(None),
        price: Set(price.parse::<Decimal>()?),
        stock_quantity: Set(stock),
        low_stock_threshold: Set(10),
        deleted_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

pub async fn stock_of(state: &AppState, product_id: Uuid) -> anyhow::Result<i32> {
    let product = Products::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| anyhow::anyhow!("product {product_id} missing"))?;
    Ok(product.stock_quantity)
}

pub fn dec(value: &str) -> Decimal {
    value.parse().expect("decimal")
}
