//! Tenant-scoped data access.
//!
//! Every query against a tenant-owned table starts from [`scoped`] (or one of
//! its siblings), which takes the resolved [`TenantContext`] and adds the
//! `tenant_id` filter before any other condition. Inserts go through
//! [`insert_scoped`], which stamps the tenant when the caller left it unset.
//!
//! [`unscoped`] is the administrative escape hatch; its callers pass an
//! explicit tenant id or follow the lookup with [`authorize`].

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    IntoActiveModel, QueryFilter, Select, UpdateMany,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::{auth::AuthUser, tenant::TenantContext},
};

/// A row that belongs to exactly one tenant.
pub trait TenantOwned {
    fn tenant_id(&self) -> i64;
}

/// An entity whose table carries a `tenant_id` column.
pub trait TenantScoped: EntityTrait {
    fn tenant_column() -> Self::Column;
    fn id_column() -> Self::Column;
}

/// An active model that can be stamped with its owning tenant.
pub trait TenantStamped: ActiveModelTrait {
    fn tenant_value(&self) -> Option<i64>;
    fn set_tenant(&mut self, tenant_id: i64);
}

/// All rows of `E` owned by the ambient tenant.
pub fn scoped<E: TenantScoped>(tenant: &TenantContext) -> Select<E> {
    E::find().filter(E::tenant_column().eq(tenant.tenant_id))
}

/// A single row of `E` by id, restricted to the ambient tenant.
pub fn scoped_by_id<E: TenantScoped>(tenant: &TenantContext, id: Uuid) -> Select<E> {
    scoped::<E>(tenant).filter(E::id_column().eq(id))
}

/// Bulk update restricted to the ambient tenant.
pub fn scoped_update<E: TenantScoped>(tenant: &TenantContext) -> UpdateMany<E> {
    E::update_many().filter(E::tenant_column().eq(tenant.tenant_id))
}

/// Stamp the ambient tenant onto `model` if unset and insert it.
///
/// A model explicitly stamped with a different tenant is rejected.
pub async fn insert_scoped<A, C>(
    tenant: &TenantContext,
    db: &C,
    model: A,
) -> AppResult<<A::Entity as EntityTrait>::Model>
where
    A: TenantStamped + ActiveModelBehavior + Send + 'static,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
    C: ConnectionTrait,
{
    let model = stamp(tenant, model)?;
    Ok(model.insert(db).await?)
}

fn stamp<A: TenantStamped>(tenant: &TenantContext, mut model: A) -> AppResult<A> {
    match model.tenant_value() {
        None => model.set_tenant(tenant.tenant_id),
        Some(id) if id != tenant.tenant_id => {
            tracing::warn!(
                tenant_id = tenant.tenant_id,
                target_tenant_id = id,
                "rejected insert stamped for another tenant"
            );
            return Err(AppError::AccessDenied);
        }
        Some(_) => {}
    }
    Ok(model)
}

/// Secondary check: the acting user must belong to the row's tenant.
pub fn authorize<T: TenantOwned>(user: &AuthUser, row: &T) -> AppResult<()> {
    if user.tenant_id != row.tenant_id() {
        tracing::warn!(
            user_id = %user.user_id,
            user_tenant_id = user.tenant_id,
            row_tenant_id = row.tenant_id(),
            "cross-tenant access denied"
        );
        return Err(AppError::AccessDenied);
    }
    Ok(())
}

/// Lookups that bypass the ambient tenant. Only for trusted internal callers.
pub mod unscoped {
    use super::*;

    /// Find by id in any tenant; follow with [`authorize`](super::authorize).
    pub fn find_by_id<E: TenantScoped>(id: Uuid) -> Select<E> {
        E::find().filter(E::id_column().eq(id))
    }

    /// All rows of an explicitly named tenant, e.g. for reports.
    pub fn for_tenant<E: TenantScoped>(tenant_id: i64) -> Select<E> {
        E::find().filter(E::tenant_column().eq(tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::{ActiveValue::NotSet, DbBackend, QueryTrait, Set};

    use super::*;
    use crate::entity::{
        Orders, Products,
        products::ActiveModel as ProductActive,
        users::{Model as UserModel, Role},
    };

    fn tenant(id: i64) -> TenantContext {
        TenantContext {
            tenant_id: id,
            tenant_name: format!("tenant-{id}"),
        }
    }

    fn blank_product() -> ProductActive {
        ProductActive {
            id: Set(Uuid::new_v4()),
            tenant_id: NotSet,
            name: Set("Widget".into()),
            sku: Set("W-1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn scoped_queries_always_filter_by_tenant() {
        let sql = scoped::<Products>(&tenant(7))
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""products"."tenant_id" = 7"#), "{sql}");

        let id = Uuid::new_v4();
        let sql = scoped_by_id::<Orders>(&tenant(7), id)
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""orders"."tenant_id" = 7"#), "{sql}");
        assert!(sql.contains(&id.to_string()), "{sql}");
    }

    #[test]
    fn scoped_updates_filter_by_tenant() {
        let sql = scoped_update::<Products>(&tenant(3))
            .col_expr(
                crate::entity::products::Column::StockQuantity,
                sea_orm::sea_query::Expr::value(0),
            )
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains(r#""tenant_id" = 3"#), "{sql}");
    }

    #[test]
    fn stamp_fills_missing_tenant() {
        let stamped = stamp(&tenant(4), blank_product()).expect("stamped");
        assert_eq!(stamped.tenant_value(), Some(4));
    }

    #[test]
    fn stamp_rejects_foreign_tenant() {
        let mut model = blank_product();
        model.set_tenant(9);
        let err = stamp(&tenant(4), model).unwrap_err();
        assert!(matches!(err, AppError::AccessDenied));
    }

    #[test]
    fn authorize_compares_user_and_row_tenants() {
        let row = UserModel {
            id: Uuid::new_v4(),
            tenant_id: 1,
            name: "Ann".into(),
            email: "ann@example.com".into(),
            password_hash: "x".into(),
            role: Role::Staff,
            created_at: chrono::Utc::now().into(),
        };
        let same = AuthUser {
            user_id: Uuid::new_v4(),
            tenant_id: 1,
            role: Role::Owner,
        };
        let other = AuthUser {
            tenant_id: 2,
            ..same.clone()
        };
        assert!(authorize(&same, &row).is_ok());
        assert!(matches!(
            authorize(&other, &row),
            Err(AppError::AccessDenied)
        ));
    }
}
