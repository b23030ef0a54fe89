use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::{
    ActiveModelTrait, Condition, ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::customers::{CreateCustomerRequest, CustomerList, UpdateCustomerRequest},
    entity::{
        Customers,
        customers::{ActiveModel, Column, Model as CustomerModel},
    },
    error::{AppError, AppResult},
    middleware::{auth::AuthUser, tenant::TenantContext},
    models::Customer,
    response::{ApiResponse, Meta},
    routes::params::{CustomerQuery, contains_pattern},
    scope::{authorize, insert_scoped, scoped, scoped_by_id},
    state::AppState,
};

pub async fn list_customers(
    state: &AppState,
    tenant: &TenantContext,
    query: CustomerQuery,
) -> AppResult<ApiResponse<CustomerList>> {
    let (page, limit, offset) = query.pagination().normalize();

    let mut finder = scoped::<Customers>(tenant);
    if let Some(search) = query.q.as_ref().filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        finder = finder.filter(
            Condition::any()
                .add(Expr::col(Column::Name).ilike(pattern.clone()))
                .add(Expr::col(Column::Email).ilike(pattern.clone()))
                .add(Expr::col(Column::Phone).ilike(pattern)),
        );
    }
    let finder = finder.order_by_asc(Column::Name);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Customer::from)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Customers", CustomerList { items }, Some(meta)))
}

pub async fn get_customer(
    state: &AppState,
    tenant: &TenantContext,
    id: Uuid,
) -> AppResult<ApiResponse<Customer>> {
    let customer = find(state, tenant, id).await?;
    Ok(ApiResponse::success("Customer", customer.into(), None))
}

pub async fn create_customer(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    payload: CreateCustomerRequest,
) -> AppResult<ApiResponse<Customer>> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }

    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: NotSet,
        name: Set(payload.name),
        email: Set(payload.email),
        phone: Set(payload.phone),
        address: Set(payload.address),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let customer = insert_scoped(tenant, &state.orm, active).await?;

    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "customer_create",
        "customers",
        serde_json::json!({ "customer_id": customer.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Customer created",
        customer.into(),
        Some(Meta::empty()),
    ))
}

pub async fn update_customer(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCustomerRequest,
) -> AppResult<ApiResponse<Customer>> {
    let existing = find(state, tenant, id).await?;
    authorize(user, &existing)?;

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("name must not be empty".into()));
        }
        active.name = Set(name);
    }
    if let Some(email) = payload.email {
        active.email = Set(Some(email));
    }
    if let Some(phone) = payload.phone {
        active.phone = Set(Some(phone));
    }
    if let Some(address) = payload.address {
        active.address = Set(Some(address));
    }
    active.updated_at = Set(Utc::now().into());
    let customer = active.update(&state.orm).await?;

    Ok(ApiResponse::success(
        "Updated",
        customer.into(),
        Some(Meta::empty()),
    ))
}

pub async fn delete_customer(
    state: &AppState,
    tenant: &TenantContext,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let existing = find(state, tenant, id).await?;
    authorize(user, &existing)?;
    existing.delete(&state.orm).await?;

    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.user_id,
        "customer_delete",
        "customers",
        serde_json::json!({ "customer_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

async fn find(state: &AppState, tenant: &TenantContext, id: Uuid) -> AppResult<CustomerModel> {
    scoped_by_id::<Customers>(tenant, id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)
}
