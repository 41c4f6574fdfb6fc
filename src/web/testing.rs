//! Helpers for tests that need Postgres. They run only when
//! `TEST_DATABASE_URL` points at a disposable database; otherwise
//! [`database`] returns `None` and the calling test passes without doing
//! anything.

use sqlx::{PgPool, postgres::PgPoolOptions};
use uuid::Uuid;

use crate::config::Settings;
use crate::modules::periods::{
    PeriodRow,
    store::{NewPeriod, insert_period},
};
use crate::web::{AppState, AuthUser, auth::SESSION_COOKIE, data, policy::Role, storage::FileStore};

pub const DATABASE_ENV: &str = "TEST_DATABASE_URL";

pub async fn database() -> Option<PgPool> {
    let Ok(url) = std::env::var(DATABASE_ENV) else {
        eprintln!("{DATABASE_ENV} is not set; skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(12)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}

pub fn state(pool: PgPool, files: FileStore) -> AppState {
    let settings = Settings::for_storage_root("postgres://unused", std::env::temp_dir());
    AppState::from_parts(pool, files, settings)
}

pub async fn user(pool: &PgPool, role: Role) -> AuthUser {
    let row = data::insert_user(
        pool,
        &format!("{}@example.com", Uuid::new_v4()),
        "not-a-real-hash",
        "Test User",
        role,
    )
    .await
    .expect("insert user");

    AuthUser {
        id: row.id,
        email: row.email,
        name: row.name,
        role: row.role,
    }
}

/// `Cookie` header value for a fresh session of `user_id`.
pub async fn session_cookie(pool: &PgPool, user_id: Uuid) -> String {
    let token = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, NOW() + INTERVAL '1 hour')",
    )
    .bind(token)
    .bind(user_id)
    .execute(pool)
    .await
    .expect("insert session");
    format!("{SESSION_COOKIE}={token}")
}

pub async fn period(pool: &PgPool) -> PeriodRow {
    let tag = Uuid::new_v4().simple().to_string();
    insert_period(
        pool,
        &NewPeriod {
            name: format!("Period {tag}"),
            slug: format!("p-{tag}"),
            start_date: None,
            end_date: None,
        },
    )
    .await
    .expect("insert period")
}
