use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::time::{Duration as TokioDuration, sleep};
use tracing::{error, info, warn};

use crate::modules::applications::{documents::key_from_url, store::referenced_file_urls};
use crate::web::{
    AppState,
    storage::{BlobEntry, FileStore},
};

pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let interval = TokioDuration::from_secs(state.settings().session_sweep_minutes * 60);
        loop {
            if let Err(err) = run_cleanup_cycle(&state).await {
                error!(?err, "maintenance cycle failed");
            }
            sleep(interval).await;
        }
    });
}

async fn run_cleanup_cycle(state: &AppState) -> Result<()> {
    let sessions_removed = purge_expired_sessions(state.pool_ref()).await?;

    let blobs_removed = match state.settings().orphan_grace {
        Some(grace) => sweep_orphans(state.pool_ref(), state.files(), Utc::now() - grace).await?,
        None => 0,
    };

    if sessions_removed > 0 || blobs_removed > 0 {
        info!(sessions_removed, blobs_removed, "maintenance cycle completed");
    }

    Ok(())
}

async fn purge_expired_sessions(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
        .execute(pool)
        .await
        .context("failed to purge expired sessions")?;
    Ok(result.rows_affected())
}

/// Remove blobs no application points at any more, once they are older than
/// `cutoff`. Fresh blobs are left alone so an upload whose database write has
/// not landed yet is never swept.
async fn sweep_orphans(pool: &PgPool, files: &FileStore, cutoff: DateTime<Utc>) -> Result<usize> {
    let blobs = files.list("").await.context("failed to list stored blobs")?;
    let urls = referenced_file_urls(pool)
        .await
        .context("failed to load referenced documents")?;
    let referenced: HashSet<&str> = urls.iter().map(|url| key_from_url(url)).collect();

    let mut removed = 0usize;
    for blob in orphaned(&blobs, &referenced, cutoff) {
        match files.delete(&blob.key).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => warn!(?err, key = %blob.key, "failed to delete orphaned blob"),
        }
    }

    Ok(removed)
}

fn orphaned<'a>(
    blobs: &'a [BlobEntry],
    referenced: &'a HashSet<&str>,
    cutoff: DateTime<Utc>,
) -> impl Iterator<Item = &'a BlobEntry> {
    blobs
        .iter()
        .filter(move |blob| blob.meta.stored_at < cutoff && !referenced.contains(blob.key.as_str()))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::web::storage::BlobMeta;

    fn blob(key: &str, age_hours: i64) -> BlobEntry {
        BlobEntry {
            key: key.to_string(),
            meta: BlobMeta {
                content_type: "application/pdf".to_string(),
                size: 10,
                original_name: None,
                stored_at: Utc::now() - Duration::hours(age_hours),
            },
        }
    }

    #[test]
    fn only_old_unreferenced_blobs_are_orphans() {
        let blobs = vec![
            blob("2026-1/u1/cv-1.pdf", 48),
            blob("2026-1/u1/cv-2.pdf", 48),
            blob("2026-1/u1/cv-3.pdf", 1),
        ];
        let referenced: HashSet<&str> = ["2026-1/u1/cv-2.pdf"].into_iter().collect();

        let keys: Vec<_> = orphaned(&blobs, &referenced, Utc::now() - Duration::hours(24))
            .map(|blob| blob.key.as_str())
            .collect();
        assert_eq!(keys, vec!["2026-1/u1/cv-1.pdf"]);
    }
}
