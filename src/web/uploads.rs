use std::collections::HashMap;

use axum::extract::Multipart;

/// Result type used by the shared upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when a multipart form cannot be read.
#[derive(Debug)]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// A file part held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Size of the part as sent. Exceeds the cap when the part was too large,
    /// in which case `bytes` is empty.
    pub size: usize,
}

#[derive(Debug, Default)]
pub struct UploadForm {
    pub text_fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

impl UploadForm {
    /// Trimmed value of a text field; blank values count as missing.
    pub fn text(&self, field_name: &str) -> Option<&str> {
        self.text_fields
            .get(field_name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Value of a text field exactly as sent.
    pub fn raw_text(&self, field_name: &str) -> Option<&str> {
        self.text_fields.get(field_name).map(String::as_str)
    }
}

/// Read a form with text fields and at most one file in `file_field`.
/// A file larger than `max_file_bytes` is counted but not kept.
pub async fn read_upload_form(
    mut multipart: Multipart,
    file_field: &str,
    max_file_bytes: usize,
) -> UploadResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("Could not read the upload form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field.file_name().is_none() {
            let value = field.text().await.map_err(|err| {
                UploadError::new(format!("Could not read field `{field_name}`: {err}"))
            })?;
            form.text_fields.insert(field_name, value);
            continue;
        }

        if field_name != file_field {
            return Err(UploadError::new(format!(
                "Unsupported file field `{field_name}`"
            )));
        }
        if form.file.is_some() {
            return Err(UploadError::new("Only one file can be uploaded at a time"));
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let mut bytes = Vec::new();
        let mut size = 0usize;

        // Past the cap the rest of the part is drained unbuffered so the
        // fields after it are still read.
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| UploadError::new(format!("Could not read the uploaded file: {err}")))?
        {
            size += chunk.len();
            if size <= max_file_bytes {
                bytes.extend_from_slice(&chunk);
            }
        }
        if size > max_file_bytes {
            bytes.clear();
        }

        form.file = Some(UploadedFile {
            file_name,
            content_type,
            bytes,
            size,
        });
    }

    Ok(form)
}
