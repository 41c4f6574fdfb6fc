use sqlx::PgPool;
use uuid::Uuid;

use super::models::{UserCredentials, UserRow};
use super::policy::Role;

const USER_COLUMNS: &str = "id, email, name, role, created_at, updated_at";

pub async fn fetch_users(pool: &PgPool, include_superadmins: bool) -> sqlx::Result<Vec<UserRow>> {
    let sql = if include_superadmins {
        format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC")
    } else {
        format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role <> 'superadmin' ORDER BY created_at DESC"
        )
    };

    sqlx::query_as::<_, UserRow>(&sql).fetch_all(pool).await
}

pub async fn fetch_user_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<UserRow>> {
    sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_credentials_by_email(
    pool: &PgPool,
    email: &str,
) -> sqlx::Result<Option<UserCredentials>> {
    sqlx::query_as::<_, UserCredentials>("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_credentials_by_id(
    pool: &PgPool,
    id: Uuid,
) -> sqlx::Result<Option<UserCredentials>> {
    sqlx::query_as::<_, UserCredentials>("SELECT id, password_hash FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Insert a user. Duplicate emails surface as a unique violation.
pub async fn insert_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    name: &str,
    role: Role,
) -> sqlx::Result<UserRow> {
    sqlx::query_as::<_, UserRow>(&format!(
        "INSERT INTO users (id, email, password_hash, name, role)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(name)
    .bind(role.as_str())
    .fetch_one(pool)
    .await
}

pub async fn update_password(pool: &PgPool, id: Uuid, password_hash: &str) -> sqlx::Result<u64> {
    let result =
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

pub async fn delete_user(pool: &PgPool, id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn superadmin_exists(pool: &PgPool) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE role = 'superadmin')")
        .fetch_one(pool)
        .await
}
