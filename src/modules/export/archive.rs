use std::io::{Cursor, Write};

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::warn;
use zip::{ZipWriter, write::SimpleFileOptions};

use super::manifest::ExportManifest;
use crate::web::storage::FileStore;

const FALLBACK_EXTENSION: &str = "bin";

#[derive(Debug)]
pub struct PeriodArchive {
    pub bytes: Vec<u8>,
    pub files: usize,
    pub skipped: usize,
}

pub fn archive_file_name(period_slug: &str) -> String {
    format!("{period_slug}-applications.zip")
}

/// Collect every manifest file from the store and pack the lot, one folder
/// per applicant. Blobs that cannot be read are left out and counted.
pub async fn build_archive(store: &FileStore, export: &ExportManifest) -> Result<PeriodArchive> {
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    let mut files = 0usize;
    let mut skipped = 0usize;

    for applicant in &export.manifest {
        let folder = &applicant.folder;
        let fetched = join_all(applicant.files.iter().map(|file| store.get(&file.path))).await;

        for (file, result) in applicant.files.iter().zip(fetched) {
            match result {
                Ok(Some(object)) => {
                    let name = format!(
                        "{folder}/{}.{}",
                        file.file_name,
                        extension_of(&file.path)
                    );
                    entries.push((name, object.bytes));
                    files += 1;
                }
                Ok(None) => {
                    warn!(path = %file.path, "export skipped a missing file");
                    skipped += 1;
                }
                Err(err) => {
                    warn!(?err, path = %file.path, "export skipped an unreadable file");
                    skipped += 1;
                }
            }
        }

        if let Some(letter) = &applicant.motivation_letter {
            entries.push((
                format!("{folder}/motivation_letter.txt"),
                letter.clone().into_bytes(),
            ));
        }

        entries.push((
            format!("{folder}/info.txt"),
            format!(
                "Name: {}\nEmail: {}\n",
                applicant.user_name, applicant.user_email
            )
            .into_bytes(),
        ));
    }

    let bytes = tokio::task::spawn_blocking(move || write_zip(&entries))
        .await
        .context("archive task failed")??;

    Ok(PeriodArchive {
        bytes,
        files,
        skipped,
    })
}

fn write_zip(entries: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (name, bytes) in entries {
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("failed to start archive entry {name}"))?;
        zip.write_all(bytes)
            .with_context(|| format!("failed to write archive entry {name}"))?;
    }

    let cursor = zip.finish().context("failed to finish archive")?;
    Ok(cursor.into_inner())
}

fn extension_of(path: &str) -> &str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => FALLBACK_EXTENSION,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use tempfile::tempdir;
    use uuid::Uuid;
    use zip::ZipArchive;

    use super::*;
    use crate::modules::applications::status::{ApplicationStatus, DocumentType};
    use crate::modules::export::manifest::{ManifestEntry, ManifestFile};

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
        let mut entry = archive.by_name(name).expect("entry exists");
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).expect("read entry");
        buf
    }

    #[tokio::test]
    async fn packs_files_letters_and_info_per_applicant() {
        let dir = tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");
        let user_id = Uuid::new_v4();
        let cv_key = format!("2026-1/{user_id}/cv-1.pdf");
        let rec_key = format!("2026-1/{user_id}/recommendation-2.png");
        store
            .put(&cv_key, b"%PDF-cv", "application/pdf", None)
            .await
            .expect("put cv");
        store
            .put(&rec_key, b"png-bytes", "image/png", None)
            .await
            .expect("put recommendation");

        let folder = format!("Anna Nagy_{user_id}");
        let export = ExportManifest {
            period: "2026/1".to_string(),
            period_slug: "2026-1".to_string(),
            manifest: vec![ManifestEntry {
                user_id,
                user_name: "Anna Nagy".to_string(),
                user_email: "anna@example.com".to_string(),
                folder: folder.clone(),
                files: vec![
                    ManifestFile {
                        path: cv_key,
                        file_name: "cv",
                        document: DocumentType::Cv,
                    },
                    ManifestFile {
                        path: rec_key,
                        file_name: "recommendation_1",
                        document: DocumentType::Recommendation,
                    },
                    ManifestFile {
                        path: format!("2026-1/{user_id}/criminal_record-3.pdf"),
                        file_name: "criminal_record",
                        document: DocumentType::CriminalRecord,
                    },
                ],
                motivation_letter: Some("I want to help.".to_string()),
                application_status: ApplicationStatus::Submitted,
            }],
        };

        let archive = build_archive(&store, &export).await.expect("archive");
        assert_eq!(archive.files, 2);
        assert_eq!(archive.skipped, 1);

        let mut zip = ZipArchive::new(Cursor::new(archive.bytes)).expect("valid zip");
        assert_eq!(zip.len(), 4);
        assert_eq!(read_entry(&mut zip, &format!("{folder}/cv.pdf")), b"%PDF-cv");
        assert_eq!(
            read_entry(&mut zip, &format!("{folder}/recommendation_1.png")),
            b"png-bytes"
        );
        assert_eq!(
            read_entry(&mut zip, &format!("{folder}/motivation_letter.txt")),
            b"I want to help."
        );
        assert_eq!(
            read_entry(&mut zip, &format!("{folder}/info.txt")),
            b"Name: Anna Nagy\nEmail: anna@example.com\n"
        );
    }

    #[tokio::test]
    async fn empty_manifest_is_a_valid_empty_zip() {
        let dir = tempdir().expect("temp dir");
        let store = FileStore::open(dir.path()).await.expect("open store");
        let export = ExportManifest {
            period: "Empty".to_string(),
            period_slug: "empty".to_string(),
            manifest: vec![],
        };

        let archive = build_archive(&store, &export).await.expect("archive");
        let zip = ZipArchive::new(Cursor::new(archive.bytes)).expect("valid zip");
        assert_eq!(zip.len(), 0);
    }

    #[test]
    fn extension_comes_from_the_stored_key() {
        assert_eq!(extension_of("2026-1/u/cv-1.pdf"), "pdf");
        assert_eq!(extension_of("2026-1/u.x/cv-1"), "bin");
        assert_eq!(extension_of("2026-1/u/.hidden"), "bin");
        assert_eq!(archive_file_name("2026-1"), "2026-1-applications.zip");
    }
}
