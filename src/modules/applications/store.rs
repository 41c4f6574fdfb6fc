use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::status::{ApplicationStatus, Completeness, Declarations, DocumentType};

const APPLICATION_COLUMNS: &str = "a.id, a.user_id, a.period_id, \
    a.cv_url, a.cv_uploaded_at, \
    a.recommendation_url, a.recommendation_uploaded_at, \
    a.recommendation_2_url, a.recommendation_2_uploaded_at, \
    a.motivation_letter, a.motivation_char_count, a.motivation_uploaded_at, \
    a.criminal_record_url, a.criminal_record_uploaded_at, \
    a.criminal_record_request_url, a.criminal_record_request_uploaded_at, \
    a.decl_participation_terms, a.decl_monthly_availability, a.decl_privacy_policy, \
    a.decl_additional_terms, a.decl_training_schedule, \
    a.status, a.created_at, a.updated_at";

const LISTING_JOIN: &str = "FROM applications a \
    JOIN users u ON u.id = a.user_id \
    JOIN periods p ON p.id = a.period_id";

const LISTING_EXTRA_COLUMNS: &str = "u.email AS user_email, u.name AS user_name, \
    p.name AS period_name, p.slug AS period_slug, p.is_active AS period_is_active";

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct ApplicationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub period_id: Uuid,
    pub cv_url: Option<String>,
    pub cv_uploaded_at: Option<DateTime<Utc>>,
    pub recommendation_url: Option<String>,
    pub recommendation_uploaded_at: Option<DateTime<Utc>>,
    pub recommendation_2_url: Option<String>,
    pub recommendation_2_uploaded_at: Option<DateTime<Utc>>,
    pub motivation_letter: Option<String>,
    pub motivation_char_count: Option<i32>,
    pub motivation_uploaded_at: Option<DateTime<Utc>>,
    pub criminal_record_url: Option<String>,
    pub criminal_record_uploaded_at: Option<DateTime<Utc>>,
    pub criminal_record_request_url: Option<String>,
    pub criminal_record_request_uploaded_at: Option<DateTime<Utc>>,
    #[sqlx(flatten)]
    pub declarations: Declarations,
    #[sqlx(try_from = "String")]
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationRecord {
    /// Stored pointer for a file document, or the letter text for the motivation.
    pub fn document(&self, document: DocumentType) -> Option<&str> {
        let value = match document {
            DocumentType::Cv => &self.cv_url,
            DocumentType::Recommendation => &self.recommendation_url,
            DocumentType::Recommendation2 => &self.recommendation_2_url,
            DocumentType::Motivation => &self.motivation_letter,
            DocumentType::CriminalRecord => &self.criminal_record_url,
            DocumentType::CriminalRecordRequest => &self.criminal_record_request_url,
        };
        value.as_deref()
    }

    pub fn completeness(&self) -> Completeness {
        Completeness::evaluate(|document| self.document(document).is_some())
    }

    #[cfg(test)]
    pub fn blank(user_id: Uuid, period_id: Uuid, status: ApplicationStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            period_id,
            cv_url: None,
            cv_uploaded_at: None,
            recommendation_url: None,
            recommendation_uploaded_at: None,
            recommendation_2_url: None,
            recommendation_2_uploaded_at: None,
            motivation_letter: None,
            motivation_char_count: None,
            motivation_uploaded_at: None,
            criminal_record_url: None,
            criminal_record_uploaded_at: None,
            criminal_record_request_url: None,
            criminal_record_request_uploaded_at: None,
            declarations: Declarations::default(),
            status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Application joined with its applicant and period, as staff see it.
#[derive(Clone, Debug, Serialize, FromRow)]
pub struct ApplicationListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub application: ApplicationRecord,
    pub user_email: String,
    pub user_name: String,
    pub period_name: String,
    pub period_slug: String,
    pub period_is_active: bool,
}

pub async fn fetch_application(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<ApplicationListing>> {
    sqlx::query_as::<_, ApplicationListing>(&format!(
        "SELECT {APPLICATION_COLUMNS}, {LISTING_EXTRA_COLUMNS} {LISTING_JOIN} WHERE a.id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_listings(
    pool: &PgPool,
    period_id: Option<Uuid>,
) -> sqlx::Result<Vec<ApplicationListing>> {
    sqlx::query_as::<_, ApplicationListing>(&format!(
        "SELECT {APPLICATION_COLUMNS}, {LISTING_EXTRA_COLUMNS} {LISTING_JOIN}
         WHERE $1::uuid IS NULL OR a.period_id = $1
         ORDER BY a.created_at DESC"
    ))
    .bind(period_id)
    .fetch_all(pool)
    .await
}

pub async fn fetch_user_listings(
    pool: &PgPool,
    user_id: Uuid,
) -> sqlx::Result<Vec<ApplicationListing>> {
    sqlx::query_as::<_, ApplicationListing>(&format!(
        "SELECT {APPLICATION_COLUMNS}, {LISTING_EXTRA_COLUMNS} {LISTING_JOIN}
         WHERE a.user_id = $1
         ORDER BY a.created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn fetch_for_user_and_period(
    pool: &PgPool,
    user_id: Uuid,
    period_id: Uuid,
) -> sqlx::Result<Option<ApplicationRecord>> {
    sqlx::query_as::<_, ApplicationRecord>(&format!(
        "SELECT {APPLICATION_COLUMNS} FROM applications a WHERE a.user_id = $1 AND a.period_id = $2"
    ))
    .bind(user_id)
    .bind(period_id)
    .fetch_optional(pool)
    .await
}

/// Fetch the caller's application for a period, creating an empty draft when
/// none exists. Concurrent first requests converge on the same row.
pub async fn get_or_create(
    pool: &PgPool,
    user_id: Uuid,
    period_id: Uuid,
) -> sqlx::Result<ApplicationRecord> {
    sqlx::query(
        "INSERT INTO applications (id, user_id, period_id)
         VALUES ($1, $2, $3)
         ON CONFLICT (user_id, period_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(period_id)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, ApplicationRecord>(&format!(
        "SELECT {APPLICATION_COLUMNS} FROM applications a WHERE a.user_id = $1 AND a.period_id = $2"
    ))
    .bind(user_id)
    .bind(period_id)
    .fetch_one(pool)
    .await
}

// Document writes only land on drafts; zero rows means the application
// left draft in the meantime.

/// Point a file document at a newly stored blob.
pub async fn set_document_url(
    pool: &PgPool,
    id: Uuid,
    document: DocumentType,
    url: &str,
) -> sqlx::Result<u64> {
    // The motivation letter is text and never goes through here.
    let column = match document {
        DocumentType::Cv => "cv",
        DocumentType::Recommendation => "recommendation",
        DocumentType::Recommendation2 => "recommendation_2",
        DocumentType::CriminalRecord => "criminal_record",
        DocumentType::CriminalRecordRequest => "criminal_record_request",
        DocumentType::Motivation => return Ok(0),
    };

    sqlx::query(&format!(
        "UPDATE applications
         SET {column}_url = $2, {column}_uploaded_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND status = 'draft'"
    ))
    .bind(id)
    .bind(url)
    .execute(pool)
    .await
    .map(|res| res.rows_affected())
}

pub async fn set_motivation(
    pool: &PgPool,
    id: Uuid,
    text: &str,
    char_count: usize,
) -> sqlx::Result<u64> {
    sqlx::query(
        "UPDATE applications
         SET motivation_letter = $2, motivation_char_count = $3,
             motivation_uploaded_at = NOW(), updated_at = NOW()
         WHERE id = $1 AND status = 'draft'",
    )
    .bind(id)
    .bind(text)
    .bind(i32::try_from(char_count).unwrap_or(i32::MAX))
    .execute(pool)
    .await
    .map(|res| res.rows_affected())
}

pub async fn set_declarations(
    pool: &PgPool,
    id: Uuid,
    declarations: &Declarations,
) -> sqlx::Result<u64> {
    sqlx::query(
        "UPDATE applications
         SET decl_participation_terms = $2, decl_monthly_availability = $3,
             decl_privacy_policy = $4, decl_additional_terms = $5,
             decl_training_schedule = $6, updated_at = NOW()
         WHERE id = $1 AND status = 'draft'",
    )
    .bind(id)
    .bind(declarations.participation_terms)
    .bind(declarations.monthly_availability)
    .bind(declarations.privacy_policy)
    .bind(declarations.additional_terms)
    .bind(declarations.training_schedule)
    .execute(pool)
    .await
    .map(|res| res.rows_affected())
}

/// Move to `to` only if the row is still in `from`; zero rows means another
/// request got there first.
pub async fn set_status(
    pool: &PgPool,
    id: Uuid,
    from: ApplicationStatus,
    to: ApplicationStatus,
) -> sqlx::Result<u64> {
    sqlx::query(
        "UPDATE applications SET status = $3, updated_at = NOW()
         WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(pool)
    .await
    .map(|res| res.rows_affected())
}

/// Every blob key still referenced by some application.
pub async fn referenced_file_urls(pool: &PgPool) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT url FROM (
             SELECT cv_url AS url FROM applications
             UNION ALL SELECT recommendation_url FROM applications
             UNION ALL SELECT recommendation_2_url FROM applications
             UNION ALL SELECT criminal_record_url FROM applications
             UNION ALL SELECT criminal_record_request_url FROM applications
         ) refs WHERE url IS NOT NULL",
    )
    .fetch_all(pool)
    .await
}
