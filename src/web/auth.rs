use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{Json, extract::State, extract::rejection::JsonRejection};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState, data,
    models::UserRow,
    policy::{Action, Role, is_allowed},
    responses::{ApiEnvelope, ApiError, ApiResult, is_unique_violation, json_body, ok},
};

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_DAYS: i64 = 7;
pub const MIN_PASSWORD_CHARS: usize = 6;
const MIN_NAME_CHARS: usize = 2;

/// Caller resolved from the session cookie. The role always comes from the
/// users table, never from anything the client sent.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
}

impl AuthUser {
    pub fn can(&self, action: Action) -> bool {
        is_allowed(self.role, action)
    }

    pub fn require(&self, action: Action) -> Result<(), ApiError> {
        if self.can(action) {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<ApiEnvelope<UserRow>>), ApiError> {
    let form = json_body(payload)?;
    let email = normalize_email(&form.email);
    validate_email(&email)?;
    validate_password(&form.password)?;
    let name = form.name.trim();
    if name.chars().count() < MIN_NAME_CHARS {
        return Err(ApiError::validation(format!(
            "Name must be at least {MIN_NAME_CHARS} characters long"
        )));
    }

    let password_hash = hash_password(&form.password).map_err(|err| {
        error!(?err, "failed to hash password during registration");
        ApiError::Internal
    })?;

    let user = match data::insert_user(
        state.pool_ref(),
        &email,
        &password_hash,
        name,
        Role::Applicant,
    )
    .await
    {
        Ok(user) => user,
        Err(err) if is_unique_violation(&err) => {
            return Err(ApiError::validation("This email address is already registered"));
        }
        Err(err) => return Err(err.into()),
    };

    info!(user_id = %user.id, "registered applicant");

    let jar = start_session(&state, jar, user.id).await?;
    Ok((jar, Json(ApiEnvelope::ok(user))))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<ApiEnvelope<UserRow>>), ApiError> {
    let form = json_body(payload)?;
    let email = normalize_email(&form.email);
    validate_email(&email)?;
    validate_password(&form.password)?;

    let credentials = data::fetch_credentials_by_email(state.pool_ref(), &email)
        .await?
        .ok_or_else(invalid_credentials)?;

    if !verify_password(&form.password, &credentials.password_hash) {
        return Err(invalid_credentials());
    }

    let user = data::fetch_user_by_id(state.pool_ref(), credentials.id)
        .await?
        .ok_or_else(invalid_credentials)?;

    let jar = start_session(&state, jar, user.id).await?;
    Ok((jar, Json(ApiEnvelope::ok(user))))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<ApiEnvelope<()>>) {
    if let Some(token) = session_token(&jar) {
        if let Err(err) = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(token)
            .execute(state.pool_ref())
            .await
        {
            error!(?err, "failed to remove session during logout");
        }
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));

    (jar.remove(removal), Json(ApiEnvelope::ok(())))
}

pub async fn me(State(state): State<AppState>, jar: CookieJar) -> ApiResult<AuthUser> {
    let user = current_user(&state, &jar).await?;
    ok(user)
}

pub async fn change_password(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<()> {
    let user = current_user(&state, &jar).await?;
    let form = json_body(payload)?;
    validate_password(&form.new_password)?;

    let credentials = data::fetch_credentials_by_id(state.pool_ref(), user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if !verify_password(&form.current_password, &credentials.password_hash) {
        return Err(ApiError::BadCredentials("The current password is incorrect"));
    }

    let password_hash = hash_password(&form.new_password).map_err(|err| {
        error!(?err, "failed to hash password during password change");
        ApiError::Internal
    })?;
    data::update_password(state.pool_ref(), user.id, &password_hash).await?;

    // Other devices have to sign in again with the new password.
    if let Some(token) = session_token(&jar) {
        sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND id <> $2")
            .bind(user.id)
            .bind(token)
            .execute(state.pool_ref())
            .await?;
    }

    ok(())
}

/// Resolve the caller or fail with 401.
pub async fn current_user(state: &AppState, jar: &CookieJar) -> Result<AuthUser, ApiError> {
    let token = session_token(jar).ok_or(ApiError::Unauthorized)?;

    match fetch_user_by_session(state.pool_ref(), token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ApiError::Unauthorized),
        Err(err) => {
            error!(?err, "failed to validate session");
            Err(ApiError::Internal)
        }
    }
}

/// Resolve the caller and check a role capability in one step.
pub async fn require_capability(
    state: &AppState,
    jar: &CookieJar,
    action: Action,
) -> Result<AuthUser, ApiError> {
    let user = current_user(state, jar).await?;
    user.require(action)?;
    Ok(user)
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ApiError::validation("Invalid email address"))
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_CHARS} characters long"
        )));
    }
    Ok(())
}

pub async fn fetch_user_by_session(pool: &PgPool, token: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT users.id, users.email, users.name, users.role FROM sessions JOIN users ON users.id = sessions.user_id WHERE sessions.id = $1 AND sessions.expires_at > NOW()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

async fn start_session(
    state: &AppState,
    jar: CookieJar,
    user_id: Uuid,
) -> Result<CookieJar, ApiError> {
    let session_token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(SESSION_TTL_DAYS);

    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(session_token)
        .bind(user_id)
        .bind(expires_at)
        .execute(state.pool_ref())
        .await?;

    let mut cookie = Cookie::new(SESSION_COOKIE, session_token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_secure(state.settings().cookie_secure);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(SESSION_TTL_DAYS));

    Ok(jar.add(cookie))
}

fn session_token(jar: &CookieJar) -> Option<Uuid> {
    let cookie = jar.get(SESSION_COOKIE)?;
    Uuid::parse_str(cookie.value()).ok()
}

fn invalid_credentials() -> ApiError {
    ApiError::BadCredentials("Incorrect email address or password")
}
