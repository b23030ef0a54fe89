use sea_orm::EntityTrait;

use crate::{
    entity::Tenants,
    error::{AppError, AppResult},
    middleware::tenant::TenantContext,
    state::AppState,
};

/// Look up a tenant by id and require it to be active.
pub async fn resolve_active_tenant(state: &AppState, tenant_id: i64) -> AppResult<TenantContext> {
    let tenant = Tenants::find_by_id(tenant_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::TenantNotFound)?;

    if !tenant.is_active {
        tracing::info!(tenant_id, "request for inactive tenant rejected");
        return Err(AppError::TenantInactive);
    }

    Ok(TenantContext {
        tenant_id: tenant.id,
        tenant_name: tenant.name,
    })
}
