use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::modules::periods::{self, PeriodRow};
use crate::web::{
    AppState, AuthUser,
    auth::{current_user, require_capability},
    policy::Action,
    responses::{ApiError, ApiResult, json_body, ok, query_params},
    uploads::{UploadForm, read_upload_form},
};

pub mod documents;
pub mod status;
pub mod store;

use documents::MAX_FILE_BYTES;
use status::{ApplicationStatus, Completeness, Declarations, DocumentType, Transition, TransitionError};
use store::{ApplicationListing, ApplicationRecord};

const UPLOAD_BODY_LIMIT: usize = MAX_FILE_BYTES + 1024 * 1024;
const READ_ONLY_MESSAGE: &str = "This application can no longer be changed";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/applications",
            get(list_applications).post(open_application),
        )
        .route("/api/applications/my", get(my_application))
        .route("/api/applications/mine", get(my_applications))
        .route(
            "/api/applications/:id",
            get(get_application).patch(update_application),
        )
        .route(
            "/api/upload",
            post(upload_document).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
}

/// A stored record together with its completeness summary.
#[derive(Debug, Serialize)]
pub struct ApplicationView<T: Serialize> {
    #[serde(flatten)]
    pub record: T,
    pub completeness: Completeness,
}

impl ApplicationView<ApplicationRecord> {
    fn of(record: ApplicationRecord) -> Self {
        Self {
            completeness: record.completeness(),
            record,
        }
    }
}

impl ApplicationView<ApplicationListing> {
    fn of_listing(listing: ApplicationListing) -> Self {
        Self {
            completeness: listing.application.completeness(),
            record: listing,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MyApplication {
    pub application: ApplicationView<ApplicationRecord>,
    pub period: PeriodRow,
    pub readonly: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationUpdate {
    pub application: ApplicationView<ApplicationListing>,
    /// Present when submission was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_documents: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_declarations: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub char_count: Option<usize>,
    pub completeness: Completeness,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub period_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MyQuery {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenApplicationRequest {
    pub period_slug: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateApplicationRequest {
    #[serde(default)]
    pub status: Option<ApplicationStatus>,
    #[serde(default)]
    pub declarations: Option<Declarations>,
}

/// Drafts in an active period are the only writable applications.
pub fn is_readonly(period_is_active: bool, status: ApplicationStatus) -> bool {
    !period_is_active || status != ApplicationStatus::Draft
}

async fn list_applications(
    State(state): State<AppState>,
    jar: CookieJar,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<ApplicationView<ApplicationListing>>> {
    require_capability(&state, &jar, Action::ListApplications).await?;
    let query = query_params(query)?;
    let listings = store::fetch_listings(state.pool_ref(), query.period_id).await?;
    ok(listings.into_iter().map(ApplicationView::of_listing).collect())
}

async fn open_application(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<OpenApplicationRequest>, JsonRejection>,
) -> ApiResult<MyApplication> {
    let user = current_user(&state, &jar).await?;
    let request = json_body(payload)?;
    let slug = request.period_slug.trim();
    if slug.is_empty() {
        return Err(ApiError::validation("A period is required"));
    }
    ok(load_or_open(&state, &user, slug).await?)
}

async fn my_application(
    State(state): State<AppState>,
    jar: CookieJar,
    query: Result<Query<MyQuery>, QueryRejection>,
) -> ApiResult<MyApplication> {
    let user = current_user(&state, &jar).await?;
    let query = query_params(query)?;
    let slug = query
        .period
        .as_deref()
        .map(str::trim)
        .filter(|slug| !slug.is_empty())
        .ok_or_else(|| ApiError::validation("A period is required"))?;
    ok(load_or_open(&state, &user, slug).await?)
}

/// Inactive periods only show an application that already exists.
async fn load_or_open(
    state: &AppState,
    user: &AuthUser,
    slug: &str,
) -> Result<MyApplication, ApiError> {
    let period = periods::fetch_period_by_slug(state.pool_ref(), slug)
        .await?
        .ok_or_else(|| ApiError::not_found("Period not found"))?;

    let record = if period.is_active {
        store::get_or_create(state.pool_ref(), user.id, period.id).await?
    } else {
        store::fetch_for_user_and_period(state.pool_ref(), user.id, period.id)
            .await?
            .ok_or_else(|| {
                ApiError::Forbidden("This application period is no longer active".to_string())
            })?
    };

    let readonly = is_readonly(period.is_active, record.status);
    Ok(MyApplication {
        application: ApplicationView::of(record),
        period,
        readonly,
    })
}

async fn my_applications(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Vec<ApplicationView<ApplicationListing>>> {
    let user = current_user(&state, &jar).await?;
    let listings = store::fetch_user_listings(state.pool_ref(), user.id).await?;
    ok(listings.into_iter().map(ApplicationView::of_listing).collect())
}

async fn get_application(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
) -> ApiResult<ApplicationView<ApplicationListing>> {
    let user = current_user(&state, &jar).await?;
    let listing = fetch_visible(&state, &user, id).await?;
    ok(ApplicationView::of_listing(listing))
}

async fn fetch_visible(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> Result<ApplicationListing, ApiError> {
    let listing = store::fetch_application(state.pool_ref(), id)
        .await?
        .ok_or_else(application_not_found)?;

    if listing.application.user_id != user.id && !user.can(Action::ReadAnyApplication) {
        return Err(ApiError::forbidden());
    }
    Ok(listing)
}

async fn update_application(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateApplicationRequest>, JsonRejection>,
) -> ApiResult<ApplicationUpdate> {
    let user = current_user(&state, &jar).await?;
    let request = json_body(payload)?;
    let listing = fetch_visible(&state, &user, id).await?;

    if request.status.is_none() && request.declarations.is_none() {
        return Err(ApiError::validation("Nothing to update"));
    }

    let staff = user.can(Action::TransitionApplication);
    if !staff && is_readonly(listing.period_is_active, listing.application.status) {
        return Err(ApiError::Forbidden(READ_ONLY_MESSAGE.to_string()));
    }

    if request.declarations.is_some() {
        check_declarations_writable(&user, &listing)?;
    }

    let mut record = listing.application;

    if let Some(declarations) = request.declarations {
        let updated = store::set_declarations(state.pool_ref(), id, &declarations).await?;
        if updated == 0 {
            return Err(ApiError::Forbidden(READ_ONLY_MESSAGE.to_string()));
        }
        record.declarations = declarations;
    }

    let mut submitted = None;
    let mut missing_documents = Vec::new();
    let mut missing_declarations = Vec::new();

    if let Some(requested) = request.status {
        let transition = status::evaluate_transition(
            user.role,
            record.status,
            requested,
            &record.completeness(),
            &record.declarations,
        )
        .map_err(|err| match err {
            TransitionError::NotPermitted => ApiError::forbidden(),
            TransitionError::Invalid(message) => ApiError::validation(message),
        })?;

        match transition {
            Transition::Unchanged => {}
            Transition::Apply(target) => {
                let moved = store::set_status(state.pool_ref(), id, record.status, target).await?;
                if moved == 0 {
                    return Err(ApiError::validation(
                        "The application was changed in the meantime. Please reload and try again.",
                    ));
                }
                info!(
                    application_id = %id,
                    actor_id = %user.id,
                    from = %record.status,
                    to = %target,
                    "application status changed"
                );
            }
            Transition::Held {
                missing_documents: documents,
                missing_declarations: declarations,
            } => {
                missing_documents = documents;
                missing_declarations = declarations;
            }
        }

        if requested == ApplicationStatus::Submitted {
            submitted = Some(missing_documents.is_empty() && missing_declarations.is_empty());
        }
    }

    let listing = store::fetch_application(state.pool_ref(), id)
        .await?
        .ok_or_else(application_not_found)?;

    ok(ApplicationUpdate {
        application: ApplicationView::of_listing(listing),
        submitted,
        missing_documents,
        missing_declarations,
    })
}

async fn upload_document(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> ApiResult<UploadReceipt> {
    let user = current_user(&state, &jar).await?;
    let form = read_upload_form(multipart, "file", MAX_FILE_BYTES)
        .await
        .map_err(|err| ApiError::validation(err.message()))?;

    let (Some(document_type), Some(period_slug)) =
        (form.text("documentType"), form.text("periodSlug"))
    else {
        return Err(ApiError::validation(
            "Both documentType and periodSlug are required",
        ));
    };
    let document = DocumentType::parse(document_type)
        .ok_or_else(|| ApiError::validation(format!("Unknown document type `{document_type}`")))?;

    let period = periods::fetch_period_by_slug(state.pool_ref(), period_slug)
        .await?
        .ok_or_else(|| ApiError::not_found("Period not found"))?;
    let application = store::fetch_for_user_and_period(state.pool_ref(), user.id, period.id)
        .await?
        .ok_or_else(|| ApiError::not_found("You have no application for this period"))?;

    if is_readonly(period.is_active, application.status) {
        return Err(ApiError::Forbidden(READ_ONLY_MESSAGE.to_string()));
    }

    let mut receipt = UploadReceipt {
        url: None,
        filename: None,
        char_count: None,
        completeness: application.completeness(),
    };

    if !document.is_file() {
        let (text, char_count) = motivation_from_form(&form)?;

        let updated =
            store::set_motivation(state.pool_ref(), application.id, text, char_count).await?;
        if updated == 0 {
            return Err(ApiError::Forbidden(READ_ONLY_MESSAGE.to_string()));
        }
        receipt.char_count = Some(char_count);
    } else {
        let file = form
            .file
            .as_ref()
            .ok_or_else(|| ApiError::validation("A file is required"))?;
        let accepted = documents::validate_file(file.content_type.as_deref(), file.size)
            .map_err(ApiError::validation)?;

        let key = documents::storage_key(
            &period.slug,
            user.id,
            document,
            Utc::now().timestamp_millis(),
            accepted.extension,
        );
        state
            .files()
            .put(
                &key,
                &file.bytes,
                &accepted.content_type,
                file.file_name.as_deref(),
            )
            .await?;

        let url = documents::file_url(&key);
        let updated =
            store::set_document_url(state.pool_ref(), application.id, document, &url).await?;
        if updated == 0 {
            if let Err(err) = state.files().delete(&key).await {
                warn!(?err, %key, "failed to remove blob for rejected upload");
            }
            return Err(ApiError::Forbidden(READ_ONLY_MESSAGE.to_string()));
        }

        info!(
            application_id = %application.id,
            document = %document,
            size = file.size,
            "stored application document"
        );
        receipt.url = Some(url);
        receipt.filename = Some(key);
    }

    if let Some(listing) = store::fetch_application(state.pool_ref(), application.id).await? {
        receipt.completeness = listing.application.completeness();
    }

    ok(receipt)
}

/// The letter exactly as sent, with its character count. Only a missing or
/// empty field counts as absent; anything else is judged by length.
fn motivation_from_form(form: &UploadForm) -> Result<(&str, usize), ApiError> {
    let text = form
        .raw_text("motivationText")
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ApiError::validation("The motivation letter text is required"))?;
    let char_count = documents::validate_motivation(text).map_err(ApiError::validation)?;
    Ok((text, char_count))
}

/// Declarations are the applicant's own statements: only the owner writes
/// them, and only while the application is writable.
fn check_declarations_writable(
    user: &AuthUser,
    listing: &ApplicationListing,
) -> Result<(), ApiError> {
    if listing.application.user_id != user.id {
        return Err(ApiError::forbidden());
    }
    if is_readonly(listing.period_is_active, listing.application.status) {
        return Err(ApiError::Forbidden(READ_ONLY_MESSAGE.to_string()));
    }
    Ok(())
}

fn application_not_found() -> ApiError {
    ApiError::not_found("Application not found")
}
