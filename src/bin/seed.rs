use axum_pos_api::{
    config::AppConfig,
    db::{DbPool, create_pool, run_migrations},
    services::auth_service::hash_password,
};
use rust_decimal::Decimal;
use uuid::Uuid;

struct DemoTenant {
    name: &'static str,
    domain: &'static str,
    products: &'static [(&'static str, &'static str, &'static str, i32)],
}

const TENANTS: &[DemoTenant] = &[
    DemoTenant {
        name: "Corner Coffee",
        domain: "corner-coffee.test",
        products: &[
            ("Espresso", "COF-ESP", "2.50", 200),
            ("Flat White", "COF-FLW", "3.80", 150),
            ("Croissant", "BAK-CRO", "2.20", 40),
            ("Ground Beans 250g", "RET-BEAN", "9.90", 8),
        ],
    },
    DemoTenant {
        name: "Book Nook",
        domain: "book-nook.test",
        products: &[
            ("Paperback Novel", "BK-PB-01", "12.99", 30),
            ("Notebook A5", "ST-NB-A5", "4.50", 120),
            ("Gift Card", "GC-25", "25.00", 500),
        ],
    },
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, 1).await?;
    run_migrations(&pool).await?;

    for demo in TENANTS {
        let tenant_id = ensure_tenant(&pool, demo.name).await?;
        let owner = format!("owner@{}", demo.domain);
        let staff = format!("staff@{}", demo.domain);
        ensure_user(&pool, tenant_id, "Owner", &owner, "owner1234", "owner").await?;
        ensure_user(&pool, tenant_id, "Staff", &staff, "staff1234", "staff").await?;
        seed_products(&pool, tenant_id, demo.products).await?;
        println!("Seeded tenant {} (X-Tenant-ID: {tenant_id})", demo.name);
    }

    println!("Seed completed");
    Ok(())
}

async fn ensure_tenant(pool: &DbPool, name: &str) -> anyhow::Result<i64> {
    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM tenants WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let (id,): (i64,) = sqlx::query_as("INSERT INTO tenants (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

async fn ensure_user(
    pool: &DbPool,
    tenant_id: i64,
    name: &str,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(password)?;

    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, tenant_id, name, email, password_hash, role)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT ON CONSTRAINT users_tenant_id_email_key
        DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(
    pool: &DbPool,
    tenant_id: i64,
    products: &[(&str, &str, &str, i32)],
) -> anyhow::Result<()> {
    for (name, sku, price, stock) in products {
        let price: Decimal = price.parse()?;
        sqlx::query(
            r#"
            INSERT INTO products (id, tenant_id, name, sku, price, stock_quantity)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ON CONSTRAINT products_tenant_id_sku_key DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(*name)
        .bind(*sku)
        .bind(price)
        .bind(*stock)
        .execute(pool)
        .await?;
    }
    Ok(())
}
