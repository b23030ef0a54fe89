//! Append-only audit trail of state-changing operations.

use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult};

#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub tenant_id: Option<i64>,
    pub user_id: Option<Uuid>,
    pub action: &'a str,
    pub resource: Option<&'a str>,
    pub metadata: Option<Value>,
}

impl<'a> AuditEntry<'a> {
    pub fn new(tenant_id: i64, user_id: Uuid, action: &'a str) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            user_id: Some(user_id),
            action,
            resource: None,
            metadata: None,
        }
    }

    pub fn resource(mut self, resource: &'a str) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

pub async fn insert_entry(pool: &DbPool, entry: &AuditEntry<'_>) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, tenant_id, user_id, action, resource, metadata)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.tenant_id)
    .bind(entry.user_id)
    .bind(entry.action)
    .bind(entry.resource)
    .bind(entry.metadata.clone())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record an audit entry after commit; failures are logged, never returned.
pub async fn record(
    pool: &DbPool,
    tenant_id: i64,
    user_id: Uuid,
    action: &str,
    resource: &str,
    metadata: Value,
) {
    let entry = AuditEntry::new(tenant_id, user_id, action)
        .resource(resource)
        .metadata(metadata);
    if let Err(err) = insert_entry(pool, &entry).await {
        tracing::warn!(error = %err, tenant_id, action, "audit log failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_builder_fills_optional_fields() {
        let user = Uuid::new_v4();
        let entry = AuditEntry::new(3, user, "order_cancel")
            .resource("orders")
            .metadata(serde_json::json!({ "order_id": 1 }));
        assert_eq!(entry.tenant_id, Some(3));
        assert_eq!(entry.user_id, Some(user));
        assert_eq!(entry.resource, Some("orders"));
        assert!(entry.metadata.is_some());
    }
}
