use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    Select, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    db::begin_locking,
    dto::products::{AdjustStockRequest, CreateProductRequest, ProductList, UpdateProductRequest},
    entity::{
        Products,
        products::{ActiveModel, Column, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::{
        auth::{AuthUser, ensure_owner},
        tenant::TenantContext,
    },
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder, contains_pattern},
    scope::{authorize, insert_scoped, scoped},
    services::inventory,
    state::AppState,
};

fn live(tenant: &TenantContext) -> Select<Products> {
    scoped::<Products>(tenant).filter(Column::DeletedAt.is_null())
}

fn validate_price(price: Decimal) -> AppResult<()> {
    if price < Decimal::ZERO || price.normalize().scale() > 2 {
        return Err(AppError::BadRequest(
            "price must be a non-negative amount with at most 2 decimals".into(),
        ));
    }
    Ok(())
}

fn validate_non_negative(field: &str, value: i32) -> AppResult<()> {
    if value < 0 {
        return Err(AppError::BadRequest(format!("{field} must not be negative")));
    }
    Ok(())
}

fn validate_present(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

pub async fn list_products(
    state: &AppState,
    tenant: &TenantContext,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all();

    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Sku).ilike(pattern)),
        );
    }

    let sort_col = match query.sort_by.unwrap_or(ProductSortBy::CreatedAt) {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };

    let mut finder = live(tenant).filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

pub async fn get_product(
    state: &AppState,
    tenant: &TenantContext,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    let product = find_live(state, tenant, id).await?;
    Ok(ApiResponse::success("Product", product.into(), None))
}

pub async fn create_product(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_owner(user)?;
    validate_present("name", &payload.name)?;
    validate_present("sku", &payload.sku)?;
    validate_price(payload.price)?;
    validate_non_negative("stock_quantity", payload.stock_quantity)?;
    let low_stock_threshold = payload.low_stock_threshold.unwrap_or(10);
    validate_non_negative("low_stock_threshold", low_stock_threshold)?;

    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: NotSet,
        name: Set(payload.name),
        sku: Set(payload.sku.trim().to_string()),
        description: Set(payload.description),
        price: Set(payload.price),
        stock_quantity: Set(payload.stock_quantity),
        low_stock_threshold: Set(low_stock_threshold),
        deleted_at: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let product = insert_scoped(tenant, &state.orm, active).await?;

    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id, "sku": product.sku }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        product.into(),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_owner(user)?;
    let existing = find_live(state, tenant, id).await?;
    authorize(user, &existing)?;

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        validate_present("name", &name)?;
        active.name = Set(name);
    }
    if let Some(sku) = payload.sku {
        validate_present("sku", &sku)?;
        active.sku = Set(sku.trim().to_string());
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        validate_price(price)?;
        active.price = Set(price);
    }
    if let Some(threshold) = payload.low_stock_threshold {
        validate_non_negative("low_stock_threshold", threshold)?;
        active.low_stock_threshold = Set(threshold);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        product.into(),
        Some(Meta::empty()),
    ))
}

/// Soft delete: the row stays so historical order items keep their product.
pub async fn delete_product(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_owner(user)?;
    let existing = find_live(state, tenant, id).await?;
    authorize(user, &existing)?;

    let now = Utc::now();
    let mut active: ActiveModel = existing.into();
    active.deleted_at = Set(Some(now.into()));
    active.updated_at = Set(now.into());
    active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn adjust_stock(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    id: Uuid,
    payload: AdjustStockRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_owner(user)?;

    let txn = begin_locking(&state.orm, state.config.lock_timeout).await?;
    let product = inventory::adjust(&txn, tenant, id, payload.delta).await?;
    txn.commit().await?;

    tracing::info!(
        tenant_id = tenant.tenant_id,
        product_id = %product.id,
        delta = payload.delta,
        stock = product.stock_quantity,
        "stock adjusted"
    );
    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "inventory_adjust",
        "products",
        serde_json::json!({ "product_id": product.id, "delta": payload.delta }),
    )
    .await;

    Ok(ApiResponse::success(
        "Inventory updated",
        product.into(),
        Some(Meta::empty()),
    ))
}

async fn find_live(state: &AppState, tenant: &TenantContext, id: Uuid) -> AppResult<ProductModel> {
    live(tenant)
        .filter(Column::Id.eq(id))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_need_cents_precision() {
        assert!(validate_price("10.00".parse().expect("decimal")).is_ok());
        assert!(validate_price("10.5".parse().expect("decimal")).is_ok());
        assert!(validate_price("10.001".parse().expect("decimal")).is_err());
        assert!(validate_price("-1".parse().expect("decimal")).is_err());
    }

    #[test]
    fn blank_fields_are_rejected() {
        assert!(validate_present("sku", "   ").is_err());
        assert!(validate_present("sku", "SKU-1").is_ok());
    }
}
