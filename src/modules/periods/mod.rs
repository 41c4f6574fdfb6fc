use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::web::{
    AppState,
    auth::{current_user, require_capability},
    policy::Action,
    responses::{ApiError, ApiResult, is_unique_violation, json_body, ok},
    storage::FileStore,
};

pub mod store;

pub use store::{PeriodRow, fetch_period, fetch_period_by_slug};

use store::NewPeriod;

const MAX_NAME_CHARS: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/periods", get(list_periods).post(create_period))
        .route(
            "/api/periods/:id",
            get(get_period).patch(update_period).delete(remove_period),
        )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeriodRequest {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePeriodRequest {
    #[serde(default)]
    pub set_active: bool,
    #[serde(default)]
    pub deactivate: bool,
}

async fn list_periods(State(state): State<AppState>, jar: CookieJar) -> ApiResult<Vec<PeriodRow>> {
    current_user(&state, &jar).await?;
    ok(store::fetch_periods(state.pool_ref()).await?)
}

async fn get_period(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
) -> ApiResult<PeriodRow> {
    current_user(&state, &jar).await?;
    let period = fetch_period(state.pool_ref(), id)
        .await?
        .ok_or_else(period_not_found)?;
    ok(period)
}

async fn create_period(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<CreatePeriodRequest>, JsonRejection>,
) -> ApiResult<PeriodRow> {
    let admin = require_capability(&state, &jar, Action::ManagePeriods).await?;
    let request = json_body(payload)?;
    let period = validate_new_period(&request).map_err(ApiError::validation)?;

    match store::insert_period(state.pool_ref(), &period).await {
        Ok(row) => {
            info!(period_id = %row.id, slug = %row.slug, admin_id = %admin.id, "created period");
            ok(row)
        }
        Err(err) if is_unique_violation(&err) => Err(ApiError::validation(
            "A period with this name or slug already exists",
        )),
        Err(err) => Err(err.into()),
    }
}

async fn update_period(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdatePeriodRequest>, JsonRejection>,
) -> ApiResult<PeriodRow> {
    let admin = require_capability(&state, &jar, Action::ManagePeriods).await?;
    let request = json_body(payload)?;

    let updated = if request.set_active {
        match store::activate_period(state.pool_ref(), id).await {
            Ok(period) => {
                if period.is_some() {
                    info!(period_id = %id, admin_id = %admin.id, "activated period");
                }
                period
            }
            Err(err) if store::is_activation_conflict(&err) => {
                return Err(ApiError::validation(
                    "Another period was activated at the same time. Please try again.",
                ));
            }
            Err(err) => return Err(err.into()),
        }
    } else if request.deactivate {
        let period = store::deactivate_period(state.pool_ref(), id).await?;
        if period.is_some() {
            info!(period_id = %id, admin_id = %admin.id, "deactivated period");
        }
        period
    } else {
        fetch_period(state.pool_ref(), id).await?
    };

    ok(updated.ok_or_else(period_not_found)?)
}

async fn remove_period(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    let admin = require_capability(&state, &jar, Action::ManagePeriods).await?;
    let period = fetch_period(state.pool_ref(), id)
        .await?
        .ok_or_else(period_not_found)?;

    delete_period_with_files(state.pool_ref(), state.files(), &period).await?;
    info!(period_id = %id, slug = %period.slug, admin_id = %admin.id, "deleted period");
    ok(())
}

/// Remove the period's blobs, then the period row and, through the cascade,
/// its applications. Blob cleanup is best effort; the row goes regardless.
pub async fn delete_period_with_files(
    pool: &PgPool,
    files: &FileStore,
    period: &PeriodRow,
) -> sqlx::Result<u64> {
    let prefix = format!("{}/", period.slug);
    match files.delete_prefix(&prefix).await {
        Ok(purge) if purge.failed > 0 => {
            warn!(
                slug = %period.slug,
                removed = purge.removed,
                failed = purge.failed,
                "some period files could not be deleted"
            );
        }
        Ok(purge) => {
            info!(slug = %period.slug, removed = purge.removed, "deleted period files");
        }
        Err(err) => {
            warn!(?err, slug = %period.slug, "failed to delete period files");
        }
    }

    store::delete_period(pool, period.id).await
}

fn period_not_found() -> ApiError {
    ApiError::not_found("Period not found")
}

/// Lowercase ASCII slug; runs of anything else collapse to one hyphen.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
}

pub fn validate_new_period(request: &CreatePeriodRequest) -> Result<NewPeriod, String> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err("Period name is required".to_string());
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(format!(
            "Period name may be at most {MAX_NAME_CHARS} characters"
        ));
    }

    let slug = match request.slug.as_deref().map(str::trim) {
        Some(explicit) if !explicit.is_empty() => {
            if !is_valid_slug(explicit) {
                return Err(
                    "The slug may only contain lowercase letters, digits and hyphens".to_string(),
                );
            }
            explicit.to_string()
        }
        _ => {
            let derived = slugify(name);
            if derived.is_empty() {
                return Err("Could not derive a slug from the name; please provide one".to_string());
            }
            derived
        }
    };

    let start_date = parse_date(request.start_date.as_deref(), "start date")?;
    let end_date = parse_date(request.end_date.as_deref(), "end date")?;
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            return Err("The end date cannot be earlier than the start date".to_string());
        }
    }

    Ok(NewPeriod {
        name: name.to_string(),
        slug,
        start_date,
        end_date,
    })
}

fn parse_date(raw: Option<&str>, label: &str) -> Result<Option<NaiveDate>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| format!("Invalid {label}; expected YYYY-MM-DD")),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::modules::applications::store::{fetch_for_user_and_period, get_or_create};
    use crate::web::{policy::Role, testing};

    fn request(name: &str, slug: Option<&str>) -> CreatePeriodRequest {
        CreatePeriodRequest {
            name: name.to_string(),
            slug: slug.map(str::to_string),
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("2026/1"), "2026-1");
        assert_eq!(slugify("  Spring -- Intake 2026!  "), "spring-intake-2026");
        assert_eq!(slugify("Ősz 2026"), "sz-2026");
        assert_eq!(slugify("///"), "");
    }

    #[test]
    fn explicit_slug_must_match_pattern() {
        let period = validate_new_period(&request("2026/1", Some("2026-1"))).expect("valid");
        assert_eq!(period.slug, "2026-1");

        assert!(validate_new_period(&request("2026/1", Some("2026_1"))).is_err());
        assert!(validate_new_period(&request("2026/1", Some("Upper"))).is_err());
    }

    #[test]
    fn slug_is_derived_when_missing() {
        let period = validate_new_period(&request("Autumn 2026", None)).expect("valid");
        assert_eq!(period.slug, "autumn-2026");

        let period = validate_new_period(&request("Autumn 2026", Some("  "))).expect("valid");
        assert_eq!(period.slug, "autumn-2026");

        assert!(validate_new_period(&request("!!!", None)).is_err());
        assert!(validate_new_period(&request("   ", None)).is_err());
    }

    #[test]
    fn dates_must_be_ordered() {
        let mut req = request("2026/1", None);
        req.start_date = Some("2026-03-01".to_string());
        req.end_date = Some("2026-02-01".to_string());
        assert!(validate_new_period(&req).is_err());

        req.end_date = Some("2026-03-01".to_string());
        let period = validate_new_period(&req).expect("same-day window");
        assert_eq!(period.start_date, period.end_date);

        req.end_date = Some("".to_string());
        assert_eq!(validate_new_period(&req).expect("open end").end_date, None);

        req.start_date = Some("03/01/2026".to_string());
        assert!(validate_new_period(&req).is_err());
    }

    #[tokio::test]
    async fn deleting_a_period_cascades_even_when_files_cannot_be_removed() {
        let Some(pool) = testing::database().await else {
            return;
        };
        let period = testing::period(&pool).await;
        let applicant = testing::user(&pool, Role::Applicant).await;
        get_or_create(&pool, applicant.id, period.id)
            .await
            .expect("open application");

        let dir = tempdir().expect("temp dir");
        let not_a_dir = dir.path().join("plain-file");
        std::fs::write(&not_a_dir, b"x").expect("write file");
        let broken = FileStore::at(&not_a_dir);

        let removed = delete_period_with_files(&pool, &broken, &period)
            .await
            .expect("delete period");
        assert_eq!(removed, 1);
        assert!(fetch_period(&pool, period.id).await.expect("fetch").is_none());
        assert!(
            fetch_for_user_and_period(&pool, applicant.id, period.id)
                .await
                .expect("fetch application")
                .is_none()
        );
    }

    #[tokio::test]
    async fn deleting_a_period_removes_only_its_files() {
        let Some(pool) = testing::database().await else {
            return;
        };
        let period = testing::period(&pool).await;
        let other = testing::period(&pool).await;

        let dir = tempdir().expect("temp dir");
        let files = FileStore::open(dir.path()).await.expect("open store");
        let own_key = format!("{}/someone/cv-1.pdf", period.slug);
        let other_key = format!("{}/someone/cv-1.pdf", other.slug);
        for key in [&own_key, &other_key] {
            files
                .put(key, b"%PDF", "application/pdf", None)
                .await
                .expect("put blob");
        }

        delete_period_with_files(&pool, &files, &period)
            .await
            .expect("delete period");
        assert!(files.get(&own_key).await.expect("get").is_none());
        assert!(files.get(&other_key).await.expect("get").is_some());

        delete_period_with_files(&pool, &files, &other)
            .await
            .expect("clean up");
    }

    #[test]
    fn empty_patch_body_changes_nothing() {
        let body: UpdatePeriodRequest = serde_json::from_str("{}").expect("parse");
        assert!(!body.set_active && !body.deactivate);

        let body: UpdatePeriodRequest =
            serde_json::from_str(r#"{"setActive": true}"#).expect("parse");
        assert!(body.set_active);
    }
}
