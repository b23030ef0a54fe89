use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use password_hash::rand_core::OsRng;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set};
use uuid::Uuid;

use crate::{
    audit,
    config::AppConfig,
    db::begin_locking,
    dto::auth::{Claims, LoginRequest, LoginResponse, RegisterRequest},
    entity::{
        Tenants, Users,
        users::{ActiveModel as UserActive, Column as UserCol, Model as UserModel, Role},
    },
    error::{AppError, AppResult},
    middleware::tenant::TenantContext,
    models::User,
    response::{ApiResponse, Meta},
    scope::{insert_scoped, scoped},
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

/// Register a user in the resolved tenant. The tenant's first user is its owner.
pub async fn register_user(
    state: &AppState,
    tenant: &TenantContext,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    let RegisterRequest {
        name,
        email,
        password,
    } = payload;
    let email = email.trim().to_lowercase();
    if name.trim().is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest("name and a valid email are required".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password_hash = hash_password(&password)?;

    // Registrations in one tenant queue on its row so only the first becomes owner.
    let txn = begin_locking(&state.orm, state.config.lock_timeout).await?;
    Tenants::find_by_id(tenant.tenant_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::TenantNotFound)?;

    let exists = scoped::<Users>(tenant)
        .filter(UserCol::Email.eq(email.as_str()))
        .count(&txn)
        .await?;
    if exists > 0 {
        return Err(AppError::BadRequest("Email is already taken".to_string()));
    }

    let existing_users = scoped::<Users>(tenant).count(&txn).await?;
    let role = if existing_users == 0 {
        Role::Owner
    } else {
        Role::Staff
    };

    let user = insert_scoped(
        tenant,
        &txn,
        UserActive {
            id: Set(Uuid::new_v4()),
            tenant_id: NotSet,
            name: Set(name),
            email: Set(email),
            password_hash: Set(password_hash),
            role: Set(role),
            created_at: NotSet,
        },
    )
    .await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.id,
        "user_register",
        "users",
        serde_json::json!({ "user_id": user.id, "role": user.role }),
    )
    .await;

    Ok(ApiResponse::success("User created", user.into(), None))
}

pub async fn login_user(
    state: &AppState,
    tenant: &TenantContext,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { email, password } = payload;
    let email = email.trim().to_lowercase();

    let user = scoped::<Users>(tenant)
        .filter(UserCol::Email.eq(email.as_str()))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::BadRequest("Invalid email or password".into()))?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        return Err(AppError::BadRequest("Invalid email or password".into()));
    }

    let token = issue_token(&state.config, &user)?;

    audit::record(
        &state.pool,
        tenant.tenant_id,
        user.id,
        "user_login",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Logged in",
        LoginResponse {
            token: format!("Bearer {}", token),
            user: user.into(),
        },
        Some(Meta::empty()),
    ))
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

/// Sign a token carrying the user's id, tenant and role.
pub fn issue_token(config: &AppConfig, user: &UserModel) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(config.jwt_ttl_hours))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        tenant_id: user.tenant_id,
        role: user.role.to_string(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::decode_token;

    #[test]
    fn issued_token_round_trips_tenant_and_role() {
        let config = AppConfig::for_database("postgres://unused");
        let user = UserModel {
            id: Uuid::new_v4(),
            tenant_id: 17,
            name: "Owner".into(),
            email: "owner@example.com".into(),
            password_hash: "x".into(),
            role: Role::Owner,
            created_at: Utc::now().into(),
        };

        let token = issue_token(&config, &user).expect("token");
        let decoded = decode_token(&token, &config.jwt_secret).expect("decoded");
        assert_eq!(decoded.user_id, user.id);
        assert_eq!(decoded.tenant_id, 17);
        assert_eq!(decoded.role, Role::Owner);
    }

    #[test]
    fn tokens_signed_with_another_secret_are_rejected() {
        let config = AppConfig::for_database("postgres://unused");
        let user = UserModel {
            id: Uuid::new_v4(),
            tenant_id: 1,
            name: "Staff".into(),
            email: "staff@example.com".into(),
            password_hash: "x".into(),
            role: Role::Staff,
            created_at: Utc::now().into(),
        };
        let token = issue_token(&config, &user).expect("token");
        assert!(matches!(
            decode_token(&token, "other-secret"),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").expect("hash");
        let parsed = PasswordHash::new(&hash).expect("parsed");
        assert!(Argon2::default().verify_password(b"correct horse", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }
}
