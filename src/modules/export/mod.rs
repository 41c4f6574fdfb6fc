use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::modules::{applications::store as applications, periods};
use crate::web::{
    AppState,
    auth::require_capability,
    policy::Action,
    responses::{ApiError, ApiResult, ok, query_params},
};

pub mod archive;
pub mod manifest;

use manifest::ExportManifest;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/export", get(export_manifest))
        .route("/api/admin/export/archive", get(export_archive))
        .route("/api/admin/storage", get(storage_usage))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub period_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStorage {
    pub period_id: Uuid,
    pub name: String,
    pub slug: String,
    pub objects: usize,
    pub bytes: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageReport {
    pub periods: Vec<PeriodStorage>,
    pub total_objects: usize,
    pub total_bytes: u64,
}

async fn export_manifest(
    State(state): State<AppState>,
    jar: CookieJar,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> ApiResult<ExportManifest> {
    require_capability(&state, &jar, Action::ExportApplications).await?;
    let query = query_params(query)?;
    ok(load_manifest(&state, query.period_id).await?)
}

async fn export_archive(
    State(state): State<AppState>,
    jar: CookieJar,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let admin = require_capability(&state, &jar, Action::ExportApplications).await?;
    let query = query_params(query)?;
    let export = load_manifest(&state, query.period_id).await?;

    let built = archive::build_archive(state.files(), &export).await?;
    if built.skipped > 0 {
        warn!(
            slug = %export.period_slug,
            skipped = built.skipped,
            "archive is missing some files"
        );
    }
    info!(
        slug = %export.period_slug,
        applicants = export.manifest.len(),
        files = built.files,
        admin_id = %admin.id,
        "exported period archive"
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        archive::archive_file_name(&export.period_slug)
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        built.bytes,
    )
        .into_response())
}

async fn load_manifest(
    state: &AppState,
    period_id: Option<Uuid>,
) -> Result<ExportManifest, ApiError> {
    let period_id = period_id.ok_or_else(|| ApiError::validation("A period is required"))?;
    let period = periods::fetch_period(state.pool_ref(), period_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Period not found"))?;
    let listings = applications::fetch_listings(state.pool_ref(), Some(period.id)).await?;
    Ok(manifest::build_manifest(&period, &listings))
}

/// Blob usage per period, including blobs orphaned by re-uploads.
async fn storage_usage(State(state): State<AppState>, jar: CookieJar) -> ApiResult<StorageReport> {
    require_capability(&state, &jar, Action::ExportApplications).await?;

    let mut report = StorageReport {
        periods: Vec::new(),
        total_objects: 0,
        total_bytes: 0,
    };

    for period in periods::store::fetch_periods(state.pool_ref()).await? {
        let usage = state.files().usage(&format!("{}/", period.slug)).await?;
        report.total_objects += usage.objects;
        report.total_bytes += usage.bytes;
        report.periods.push(PeriodStorage {
            period_id: period.id,
            name: period.name,
            slug: period.slug,
            objects: usage.objects,
            bytes: usage.bytes,
        });
    }

    ok(report)
}
