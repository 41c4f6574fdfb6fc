use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};

use crate::config::Settings;
use crate::web::{data, policy::Role, storage::FileStore};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    files: FileStore,
    settings: Arc<Settings>,
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let files = FileStore::open(&settings.storage_root)
            .await
            .context("failed to prepare file storage")?;

        Ok(Self::from_parts(pool, files, settings))
    }

    pub fn from_parts(pool: PgPool, files: FileStore, settings: Settings) -> Self {
        Self {
            pool,
            files,
            settings: Arc::new(settings),
        }
    }

    pub async fn ensure_seed_superadmin(&self) -> Result<()> {
        let has_superadmin = data::superadmin_exists(&self.pool)
            .await
            .context("failed to verify superadmin presence")?;

        if has_superadmin {
            return Ok(());
        }

        let seed = &self.settings.seed_admin;
        let password_hash = crate::web::auth::hash_password(&seed.password)
            .map_err(|err| anyhow!("failed to hash seed superadmin password: {err}"))?;

        data::insert_user(
            &self.pool,
            &seed.email,
            &password_hash,
            &seed.name,
            Role::Superadmin,
        )
        .await
        .context("failed to insert seed superadmin")?;

        if seed.uses_default_password {
            warn!(
                email = %seed.email,
                "Seeded superadmin with the default password. Set SEED_SUPERADMIN_PASSWORD or change it promptly."
            );
        } else {
            info!(email = %seed.email, "Seeded superadmin account");
        }

        Ok(())
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
