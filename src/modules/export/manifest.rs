use serde::Serialize;
use uuid::Uuid;

use crate::modules::applications::{
    documents::key_from_url,
    status::{ApplicationStatus, DocumentType},
    store::ApplicationListing,
};
use crate::modules::periods::PeriodRow;

/// Export target names, in archive order.
const EXPORTED_FILES: [(DocumentType, &str); 5] = [
    (DocumentType::Cv, "cv"),
    (DocumentType::Recommendation, "recommendation_1"),
    (DocumentType::Recommendation2, "recommendation_2"),
    (DocumentType::CriminalRecord, "criminal_record"),
    (DocumentType::CriminalRecordRequest, "criminal_record_request"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    pub period: String,
    pub period_slug: String,
    pub manifest: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub user_id: Uuid,
    pub user_name: String,
    pub user_email: String,
    pub folder: String,
    pub files: Vec<ManifestFile>,
    pub motivation_letter: Option<String>,
    pub application_status: ApplicationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    /// File store key.
    pub path: String,
    pub file_name: &'static str,
    #[serde(rename = "type")]
    pub document: DocumentType,
}

pub fn build_manifest(period: &PeriodRow, applications: &[ApplicationListing]) -> ExportManifest {
    let manifest = applications
        .iter()
        .map(|listing| {
            let record = &listing.application;
            let files = EXPORTED_FILES
                .into_iter()
                .filter_map(|(document, file_name)| {
                    record.document(document).map(|url| ManifestFile {
                        path: key_from_url(url).to_string(),
                        file_name,
                        document,
                    })
                })
                .collect();

            ManifestEntry {
                user_id: record.user_id,
                user_name: listing.user_name.clone(),
                user_email: listing.user_email.clone(),
                folder: folder_name(&listing.user_name, record.user_id),
                files,
                motivation_letter: record
                    .motivation_letter
                    .clone()
                    .filter(|text| !text.is_empty()),
                application_status: record.status,
            }
        })
        .collect();

    ExportManifest {
        period: period.name.clone(),
        period_slug: period.slug.clone(),
        manifest,
    }
}

/// Applicant folder: the name with unsafe characters replaced, suffixed with
/// the user id so equal names never collide.
pub fn folder_name(user_name: &str, user_id: Uuid) -> String {
    let safe: String = user_name
        .chars()
        .map(|ch| if is_folder_char(ch) { ch } else { '_' })
        .collect();
    format!("{safe}_{user_id}")
}

fn is_folder_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == ' ' || "áéíóöőúüűÁÉÍÓÖŐÚÜŰ".contains(ch)
}
