use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::{
    error::{AppError, AppResult},
    services::tenant_service,
    state::AppState,
};

pub const TENANT_HEADER: &str = "x-tenant-id";

/// The tenant resolved for the current request.
///
/// Inserted into the request extensions by [`resolve_tenant`] and handed to
/// every service call that touches tenant-owned data. It lives and dies with
/// the request, so nothing carries over between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: i64,
    pub tenant_name: String,
}

/// Parse the raw tenant header. An empty header counts as missing.
pub fn parse_tenant_header(value: Option<&HeaderValue>) -> AppResult<i64> {
    let value = value.ok_or(AppError::MissingTenantHeader)?;
    let raw = value
        .to_str()
        .map_err(|_| AppError::InvalidTenantIdentifier)?
        .trim();
    if raw.is_empty() {
        return Err(AppError::MissingTenantHeader);
    }
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::InvalidTenantIdentifier),
    }
}

/// Reject the request unless it names an existing, active tenant.
pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let tenant_id = parse_tenant_header(req.headers().get(TENANT_HEADER))?;
    let tenant = tenant_service::resolve_active_tenant(&state, tenant_id).await?;

    tracing::Span::current().record("tenant_id", tenant.tenant_id);
    req.extensions_mut().insert(tenant);

    Ok(next.run(req).await)
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Without the middleware there is no tenant; fail closed.
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .ok_or(AppError::MissingTenantHeader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_empty_headers_are_missing() {
        assert!(matches!(
            parse_tenant_header(None),
            Err(AppError::MissingTenantHeader)
        ));
        let empty = HeaderValue::from_static("  ");
        assert!(matches!(
            parse_tenant_header(Some(&empty)),
            Err(AppError::MissingTenantHeader)
        ));
    }

    #[test]
    fn malformed_identifiers_are_invalid() {
        for raw in ["abc", "1.5", "-3", "0", "12abc"] {
            let value = HeaderValue::from_str(raw).expect("header");
            assert!(
                matches!(
                    parse_tenant_header(Some(&value)),
                    Err(AppError::InvalidTenantIdentifier)
                ),
                "{raw}"
            );
        }
    }

    #[test]
    fn numeric_identifier_is_accepted() {
        let value = HeaderValue::from_static(" 42 ");
        assert_eq!(parse_tenant_header(Some(&value)).expect("parsed"), 42);
    }

    #[tokio::test]
    async fn extractor_fails_closed_without_middleware() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let result = TenantContext::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AppError::MissingTenantHeader)));
    }
}
