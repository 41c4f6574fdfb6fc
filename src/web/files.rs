use axum::{
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use crate::web::{
    AppState, AuthUser,
    auth::current_user,
    policy::Action,
    responses::ApiError,
    storage::{FALLBACK_CONTENT_TYPE, is_valid_key},
};

const CACHE_CONTROL: &str = "private, max-age=3600";

/// Stream a stored blob back with the content type recorded at upload time.
pub async fn serve_file(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let user = current_user(&state, &jar).await?;

    if !is_valid_key(&key) {
        return Err(ApiError::not_found("File not found"));
    }
    if !may_read(&user, &key) {
        warn!(user_id = %user.id, %key, "refused file access outside own folder");
        return Err(ApiError::forbidden());
    }

    let object = state
        .files()
        .get(&key)
        .await?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let content_type = HeaderValue::from_str(&object.meta.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL)),
        ],
        object.bytes,
    )
        .into_response())
}

/// Staff read anything; applicants only keys under `{period}/{their id}/`.
pub fn may_read(user: &AuthUser, key: &str) -> bool {
    if user.can(Action::ReadAnyFile) {
        return true;
    }
    let owner = user.id.to_string();
    key.split('/').nth(1) == Some(owner.as_str())
}
