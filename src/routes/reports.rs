use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};

use crate::{
    dto::reports::{LowStockReport, SalesReport, TopProductsReport},
    error::AppResult,
    middleware::{
        auth::{AuthUser, ensure_owner},
        tenant::TenantContext,
    },
    response::ApiResponse,
    routes::params::{DateRangeQuery, TopProductsQuery},
    services::report_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sales", get(sales_report))
        .route("/top-products", get(top_products))
        .route("/low-stock", get(low_stock))
}

#[utoipa::path(
    get,
    path = "/api/reports/sales",
    params(
        ("X-Tenant-ID" = i64, Header, description = "Tenant identifier"),
        DateRangeQuery
    ),
    responses(
        (status = 200, description = "Paid revenue and order count per day", body = ApiResponse<SalesReport>),
        (status = 403, description = "Owner role required"),
    ),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn sales_report(
    State(state): State<AppState>,
    tenant: TenantContext,
    user: AuthUser,
    Query(query): Query<DateRangeQuery>,
) -> AppResult<Json<ApiResponse<SalesReport>>> {
    ensure_owner(&user)?;
    let resp = report_service::sales_report(&state, tenant.tenant_id, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/reports/top-products",
    params(
        ("X-Tenant-ID" = i64, Header, description = "Tenant identifier"),
        TopProductsQuery
    ),
    responses(
        (status = 200, description = "Best selling products by quantity", body = ApiResponse<TopProductsReport>),
        (status = 403, description = "Owner role required"),
    ),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn top_products(
    State(state): State<AppState>,
    tenant: TenantContext,
    user: AuthUser,
    Query(query): Query<TopProductsQuery>,
) -> AppResult<Json<ApiResponse<TopProductsReport>>> {
    ensure_owner(&user)?;
    let resp = report_service::top_products(&state, tenant.tenant_id, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/reports/low-stock",
    params(("X-Tenant-ID" = i64, Header, description = "Tenant identifier")),
    responses(
        (status = 200, description = "Products at or below their threshold", body = ApiResponse<LowStockReport>),
        (status = 403, description = "Owner role required"),
    ),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn low_stock(
    State(state): State<AppState>,
    tenant: TenantContext,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<LowStockReport>>> {
    ensure_owner(&user)?;
    let resp = report_service::low_stock(&state, tenant.tenant_id).await?;
    Ok(Json(resp))
}
