use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use sea_orm::{DbErr, RuntimeErr};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    entity::orders::OrderStatus,
    response::{ApiResponse, Meta},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing tenant header")]
    MissingTenantHeader,

    #[error("Invalid tenant identifier")]
    InvalidTenantIdentifier,

    #[error("Tenant not found")]
    TenantNotFound,

    #[error("Tenant is inactive")]
    TenantInactive,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Access denied")]
    AccessDenied,

    #[error("Not Found")]
    NotFound,

    #[error("Bad Request {0}")]
    BadRequest(String),

    #[error("Resource already exists")]
    Duplicate { constraint: Option<String> },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order numbers for {date} are used up")]
    SequenceExhausted { date: NaiveDate },

    #[error("Resource is busy, retry the request")]
    Contention(String),

    #[error("Database error")]
    Database(#[source] DbErr),

    #[error("Database error")]
    Sqlx(#[source] sqlx::Error),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

// Postgres SQLSTATE codes the error layer distinguishes.
const UNIQUE_VIOLATION: &str = "23505";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";
const QUERY_CANCELED: &str = "57014";

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingTenantHeader | AppError::InvalidTenantIdentifier => {
                StatusCode::BAD_REQUEST
            }
            AppError::TenantNotFound => StatusCode::NOT_FOUND,
            AppError::TenantInactive => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::AccessDenied => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Duplicate { .. } => StatusCode::CONFLICT,
            AppError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            // Cancelling twice is a client/programming fault and is reported as such.
            AppError::InvalidTransition { from, to, .. }
                if *from == OrderStatus::Cancelled && *to == OrderStatus::Cancelled =>
            {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::InvalidTransition { .. } | AppError::SequenceExhausted { .. } => {
                StatusCode::CONFLICT
            }
            AppError::Contention(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Sqlx(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingTenantHeader => "missing_tenant_header",
            AppError::InvalidTenantIdentifier => "invalid_tenant_identifier",
            AppError::TenantNotFound => "tenant_not_found",
            AppError::TenantInactive => "tenant_inactive",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::AccessDenied => "access_denied",
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Duplicate { .. } => "duplicate",
            AppError::InsufficientStock { .. } => "insufficient_stock",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::SequenceExhausted { .. } => "sequence_exhausted",
            AppError::Contention(_) => "contention",
            AppError::Database(_) | AppError::Sqlx(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether the caller may retry the whole operation unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Contention(_))
    }

    /// True for a unique violation on the named storage constraint.
    pub fn is_duplicate_of(&self, name: &str) -> bool {
        matches!(self, AppError::Duplicate { constraint: Some(c) } if c == name)
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::InsufficientStock {
                product_id,
                requested,
                available,
            } => Some(serde_json::json!({
                "product_id": product_id,
                "requested": requested,
                "available": available,
            })),
            AppError::InvalidTransition { order_id, from, to } => Some(serde_json::json!({
                "order_id": order_id,
                "current_status": from,
                "requested_status": to,
            })),
            _ => None,
        }
    }
}

fn classify(code: Option<&str>, constraint: Option<&str>) -> Option<AppError> {
    match code? {
        UNIQUE_VIOLATION => Some(AppError::Duplicate {
            constraint: constraint.map(str::to_string),
        }),
        LOCK_NOT_AVAILABLE => Some(AppError::Contention("lock wait timed out".into())),
        DEADLOCK_DETECTED => Some(AppError::Contention("deadlock detected".into())),
        SERIALIZATION_FAILURE => Some(AppError::Contention("serialization failure".into())),
        QUERY_CANCELED => Some(AppError::Contention("statement timed out".into())),
        _ => None,
    }
}

fn classify_sqlx(err: &sqlx::Error) -> Option<AppError> {
    let db_err = err.as_database_error()?;
    classify(db_err.code().as_deref(), db_err.constraint())
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        let classified = match &err {
            DbErr::Exec(RuntimeErr::SqlxError(e))
            | DbErr::Query(RuntimeErr::SqlxError(e))
            | DbErr::Conn(RuntimeErr::SqlxError(e)) => classify_sqlx(e),
            _ => None,
        };
        classified.unwrap_or(AppError::Database(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        classify_sqlx(&err).unwrap_or(AppError::Sqlx(err))
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, code = self.code(), "request failed");
        }

        let body = ApiResponse {
            message: self.to_string(),
            data: Some(ErrorData {
                error: self.to_string(),
                code: self.code(),
                details: self.details(),
            }),
            meta: Some(Meta::empty()),
        };

        let mut response = (status, axum::Json(body)).into_response();
        if self.is_transient() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_failures_map_to_distinct_statuses() {
        assert_eq!(AppError::MissingTenantHeader.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidTenantIdentifier.status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::TenantNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::TenantInactive.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn repeated_cancellation_is_a_server_fault() {
        let id = Uuid::new_v4();
        let repeated = AppError::InvalidTransition {
            order_id: id,
            from: OrderStatus::Cancelled,
            to: OrderStatus::Cancelled,
        };
        assert_eq!(repeated.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let backwards = AppError::InvalidTransition {
            order_id: id,
            from: OrderStatus::Paid,
            to: OrderStatus::Pending,
        };
        assert_eq!(backwards.status(), StatusCode::CONFLICT);
        assert_eq!(backwards.code(), "invalid_transition");
    }

    #[test]
    fn lock_timeouts_are_contention_not_stock_failures() {
        let err = classify(Some(LOCK_NOT_AVAILABLE), None).expect("classified");
        assert!(err.is_transient());
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let deadlock = classify(Some(DEADLOCK_DETECTED), None).expect("classified");
        assert!(matches!(deadlock, AppError::Contention(_)));
    }

    #[test]
    fn contention_responses_ask_for_a_retry() {
        let response = AppError::Contention("lock wait timed out".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).map(|v| v.as_bytes()), Some(&b"1"[..]));

        let response = AppError::NotFound.into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn unique_violation_keeps_constraint_name() {
        let err = classify(Some(UNIQUE_VIOLATION), Some("products_tenant_id_sku_key"))
            .expect("classified");
        assert!(err.is_duplicate_of("products_tenant_id_sku_key"));
        assert!(!err.is_duplicate_of("orders_tenant_id_order_number_key"));
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unknown_codes_are_left_unclassified() {
        assert!(classify(Some("42P01"), None).is_none());
        assert!(classify(None, None).is_none());
    }

    #[test]
    fn insufficient_stock_carries_details() {
        let product_id = Uuid::new_v4();
        let err = AppError::InsufficientStock {
            product_id,
            requested: 999,
            available: 5,
        };
        let details = err.details().expect("details");
        assert_eq!(details["requested"], 999);
        assert_eq!(details["available"], 5);
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn storage_text_is_not_exposed() {
        let err = AppError::Database(DbErr::Custom("relation \"orders\" is locked".into()));
        assert_eq!(err.to_string(), "Database error");
    }
}
