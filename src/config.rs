use std::{env, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, anyhow};
use chrono::Duration;
use tracing::warn;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_STORAGE_ROOT: &str = "storage/uploads";
const DEFAULT_SESSION_SWEEP_MINUTES: u64 = 15;
const DEFAULT_SEED_EMAIL: &str = "admin@example.com";
const DEFAULT_SEED_PASSWORD: &str = "change-me";
const DEFAULT_SEED_NAME: &str = "Administrator";

/// Runtime configuration assembled from the process environment.
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub storage_root: PathBuf,
    pub cookie_secure: bool,
    pub seed_admin: SeedAdmin,
    pub session_sweep_minutes: u64,
    /// Unset disables the orphan sweep; blobs replaced by re-uploads are kept.
    pub orphan_grace: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
    pub name: String,
    pub uses_default_password: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let seed_password = env::var("SEED_SUPERADMIN_PASSWORD").ok();
        let seed_admin = SeedAdmin {
            email: env::var("SEED_SUPERADMIN_EMAIL")
                .unwrap_or_else(|_| DEFAULT_SEED_EMAIL.to_string())
                .trim()
                .to_lowercase(),
            uses_default_password: seed_password.is_none(),
            password: seed_password.unwrap_or_else(|| DEFAULT_SEED_PASSWORD.to_string()),
            name: env::var("SEED_SUPERADMIN_NAME").unwrap_or_else(|_| DEFAULT_SEED_NAME.to_string()),
        };

        let orphan_grace = optional_parse::<i64>("ORPHAN_SWEEP_GRACE_HOURS")?
            .map(|hours| {
                if hours < 1 {
                    Err(anyhow!("ORPHAN_SWEEP_GRACE_HOURS must be at least 1"))
                } else {
                    Ok(Duration::hours(hours))
                }
            })
            .transpose()?;

        Ok(Self {
            database_url,
            port: optional_parse("PORT")?.unwrap_or(DEFAULT_PORT),
            max_connections: optional_parse("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STORAGE_ROOT)),
            cookie_secure: optional_parse::<bool>("COOKIE_SECURE")?.unwrap_or(false),
            seed_admin,
            session_sweep_minutes: optional_parse("SESSION_SWEEP_MINUTES")?
                .unwrap_or(DEFAULT_SESSION_SWEEP_MINUTES)
                .max(1),
            orphan_grace,
        })
    }

    #[cfg(test)]
    pub fn for_storage_root(database_url: &str, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            database_url: database_url.to_string(),
            port: DEFAULT_PORT,
            max_connections: 1,
            storage_root: storage_root.into(),
            cookie_secure: false,
            seed_admin: SeedAdmin {
                email: DEFAULT_SEED_EMAIL.to_string(),
                password: DEFAULT_SEED_PASSWORD.to_string(),
                name: DEFAULT_SEED_NAME.to_string(),
                uses_default_password: true,
            },
            session_sweep_minutes: DEFAULT_SESSION_SWEEP_MINUTES,
            orphan_grace: None,
        }
    }
}

fn optional_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("invalid value for {key}: {err}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => {
            warn!(?err, key, "ignoring unreadable environment variable");
            Ok(None)
        }
    }
}
