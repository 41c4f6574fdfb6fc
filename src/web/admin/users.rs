use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState, AuthUser,
    auth::{self, require_capability},
    data,
    models::UserRow,
    policy::{Action, Role},
    responses::{ApiError, ApiResult, is_unique_violation, json_body, ok, query_params},
};

const MIN_NAME_CHARS: usize = 2;

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    email: String,
    password: String,
    name: String,
    #[serde(default)]
    role: Option<Role>,
}

#[derive(Deserialize)]
pub struct DeleteAccountQuery {
    id: Option<Uuid>,
}

pub async fn list_accounts(State(state): State<AppState>, jar: CookieJar) -> ApiResult<Vec<UserRow>> {
    let admin = require_capability(&state, &jar, Action::ListAccounts).await?;
    let users = data::fetch_users(state.pool_ref(), admin.can(Action::ListSuperadmins)).await?;
    ok(users)
}

pub async fn create_account(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> ApiResult<UserRow> {
    let admin = require_capability(&state, &jar, Action::ListAccounts).await?;
    let form = json_body(payload)?;
    let role = form.role.unwrap_or(Role::Admin);
    admin.require(Action::CreateAccount(role))?;

    let email = auth::normalize_email(&form.email);
    auth::validate_email(&email)?;
    auth::validate_password(&form.password)?;
    let name = form.name.trim();
    if name.chars().count() < MIN_NAME_CHARS {
        return Err(ApiError::validation(format!(
            "Name must be at least {MIN_NAME_CHARS} characters long"
        )));
    }

    let password_hash = auth::hash_password(&form.password).map_err(|err| {
        error!(?err, "failed to hash password while creating account");
        ApiError::Internal
    })?;

    match data::insert_user(state.pool_ref(), &email, &password_hash, name, role).await {
        Ok(user) => {
            info!(user_id = %user.id, role = %role, created_by = %admin.id, "created account");
            ok(user)
        }
        Err(err) if is_unique_violation(&err) => Err(ApiError::validation(
            "This email address is already registered",
        )),
        Err(err) => Err(err.into()),
    }
}

pub async fn delete_account(
    State(state): State<AppState>,
    jar: CookieJar,
    query: Result<Query<DeleteAccountQuery>, QueryRejection>,
) -> ApiResult<()> {
    let admin = auth::current_user(&state, &jar).await?;
    let target = deletion_target(&admin, query_params(query)?.id)?;

    let removed = data::delete_user(state.pool_ref(), target).await?;
    if removed == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = %target, deleted_by = %admin.id, "deleted account");
    ok(())
}

/// Account the caller may delete: only holders of the delete capability, and
/// never their own account.
fn deletion_target(admin: &AuthUser, requested: Option<Uuid>) -> Result<Uuid, ApiError> {
    admin.require(Action::DeleteAccount)?;
    let target = requested.ok_or_else(|| ApiError::validation("A user id is required"))?;
    if target == admin.id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }
    Ok(target)
}
