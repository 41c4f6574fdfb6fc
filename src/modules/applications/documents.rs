use uuid::Uuid;

use super::status::DocumentType;

pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
pub const MOTIVATION_MIN_CHARS: usize = 1000;
pub const MOTIVATION_MAX_CHARS: usize = 2500;
pub const FILE_URL_PREFIX: &str = "/api/files/";

const ALLOWED_TYPES: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
];

/// File accepted for storage, with the extension derived from its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedFile {
    pub content_type: String,
    pub extension: &'static str,
}

pub fn validate_file(content_type: Option<&str>, size: usize) -> Result<AcceptedFile, String> {
    let content_type = content_type
        .and_then(|raw| raw.parse::<mime::Mime>().ok())
        .map(|mime| mime.essence_str().to_ascii_lowercase())
        .unwrap_or_default();

    let Some(&(_, extension)) = ALLOWED_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == content_type)
    else {
        return Err("Unsupported file type. Allowed formats: PDF, JPG, PNG, WEBP".to_string());
    };

    if size == 0 {
        return Err("The uploaded file is empty".to_string());
    }

    if size > MAX_FILE_BYTES {
        return Err(format!(
            "The file is too large. Maximum size: {} MB",
            MAX_FILE_BYTES / (1024 * 1024)
        ));
    }

    Ok(AcceptedFile {
        content_type,
        extension,
    })
}

/// Returns the character count of an acceptable motivation letter.
pub fn validate_motivation(text: &str) -> Result<usize, String> {
    let count = text.chars().count();
    if count < MOTIVATION_MIN_CHARS {
        return Err(format!(
            "Motivation letter must be at least {MOTIVATION_MIN_CHARS} characters (currently: {count})"
        ));
    }
    if count > MOTIVATION_MAX_CHARS {
        return Err(format!(
            "Motivation letter may be at most {MOTIVATION_MAX_CHARS} characters (currently: {count})"
        ));
    }
    Ok(count)
}

pub fn storage_key(
    period_slug: &str,
    user_id: Uuid,
    document: DocumentType,
    timestamp_millis: i64,
    extension: &str,
) -> String {
    format!("{period_slug}/{user_id}/{document}-{timestamp_millis}.{extension}")
}

pub fn file_url(key: &str) -> String {
    format!("{FILE_URL_PREFIX}{key}")
}

/// Store key behind a recorded document URL.
pub fn key_from_url(url: &str) -> &str {
    url.strip_prefix(FILE_URL_PREFIX).unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_documents_and_images() {
        let pdf = validate_file(Some("application/pdf"), 500 * 1024).expect("pdf");
        assert_eq!(pdf.extension, "pdf");

        let jpg = validate_file(Some("image/jpg"), 10).expect("jpg alias");
        assert_eq!(jpg.extension, "jpg");

        let webp = validate_file(Some("IMAGE/WEBP"), 10).expect("case-insensitive");
        assert_eq!(webp.content_type, "image/webp");
    }

    #[test]
    fn rejects_other_types_and_missing_type() {
        assert!(validate_file(Some("application/zip"), 10).is_err());
        assert!(validate_file(Some("text/plain; charset=utf-8"), 10).is_err());
        assert!(validate_file(None, 10).is_err());
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(validate_file(Some("application/pdf"), MAX_FILE_BYTES).is_ok());
        let err = validate_file(Some("application/pdf"), MAX_FILE_BYTES + 1).unwrap_err();
        assert!(err.contains("10 MB"));
        assert!(validate_file(Some("application/pdf"), 0).is_err());
    }

    #[test]
    fn motivation_bounds_are_inclusive() {
        assert_eq!(validate_motivation(&"a".repeat(1000)), Ok(1000));
        assert_eq!(validate_motivation(&"a".repeat(2500)), Ok(2500));

        let short = validate_motivation(&"a".repeat(999)).unwrap_err();
        assert_eq!(
            short,
            "Motivation letter must be at least 1000 characters (currently: 999)"
        );

        let long = validate_motivation(&"a".repeat(2501)).unwrap_err();
        assert_eq!(
            long,
            "Motivation letter may be at most 2500 characters (currently: 2501)"
        );
    }

    #[test]
    fn motivation_counts_characters_not_bytes() {
        let accented = "ő".repeat(1000);
        assert_eq!(accented.len(), 2000);
        assert_eq!(validate_motivation(&accented), Ok(1000));
    }

    #[test]
    fn keys_are_scoped_by_period_and_user() {
        let user = Uuid::nil();
        let key = storage_key("2026-1", user, DocumentType::Recommendation2, 1_700_000_000_000, "pdf");
        assert_eq!(
            key,
            "2026-1/00000000-0000-0000-0000-000000000000/recommendation_2-1700000000000.pdf"
        );
        let url = file_url(&key);
        assert!(url.starts_with("/api/files/2026-1/"));
        assert_eq!(key_from_url(&url), key);
    }
}
