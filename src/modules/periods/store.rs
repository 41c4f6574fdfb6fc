use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

pub const PERIOD_COLUMNS: &str =
    "id, name, slug, is_active, start_date, end_date, created_at, updated_at";

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct PeriodRow {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for a new period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPeriod {
    pub name: String,
    pub slug: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

pub async fn fetch_periods(pool: &PgPool) -> sqlx::Result<Vec<PeriodRow>> {
    sqlx::query_as::<_, PeriodRow>(&format!(
        "SELECT {PERIOD_COLUMNS} FROM periods ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await
}

pub async fn fetch_period(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<PeriodRow>> {
    sqlx::query_as::<_, PeriodRow>(&format!("SELECT {PERIOD_COLUMNS} FROM periods WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_period_by_slug(pool: &PgPool, slug: &str) -> sqlx::Result<Option<PeriodRow>> {
    sqlx::query_as::<_, PeriodRow>(&format!(
        "SELECT {PERIOD_COLUMNS} FROM periods WHERE slug = $1"
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await
}

pub async fn insert_period(pool: &PgPool, period: &NewPeriod) -> sqlx::Result<PeriodRow> {
    sqlx::query_as::<_, PeriodRow>(&format!(
        "INSERT INTO periods (id, name, slug, start_date, end_date)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {PERIOD_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&period.name)
    .bind(&period.slug)
    .bind(period.start_date)
    .bind(period.end_date)
    .fetch_one(pool)
    .await
}

/// Make `id` the only active period. Returns `None` when it does not exist,
/// in which case nothing is touched.
pub async fn activate_period(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<PeriodRow>> {
    let mut tx = pool.begin().await?;

    // Lock the target and the current active period together, in id order,
    // so concurrent activations queue instead of deadlocking.
    let locked = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM periods WHERE is_active OR id = $1 ORDER BY id FOR UPDATE",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;
    if !locked.contains(&id) {
        tx.rollback().await?;
        return Ok(None);
    }

    sqlx::query(
        "UPDATE periods
         SET is_active = (id = $1), updated_at = NOW()
         WHERE is_active OR id = $1",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let period = sqlx::query_as::<_, PeriodRow>(&format!(
        "SELECT {PERIOD_COLUMNS} FROM periods WHERE id = $1"
    ))
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(period))
}

pub async fn deactivate_period(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<PeriodRow>> {
    sqlx::query_as::<_, PeriodRow>(&format!(
        "UPDATE periods SET is_active = FALSE, updated_at = NOW()
         WHERE id = $1
         RETURNING {PERIOD_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Applications go with the period through the foreign key cascade.
pub async fn delete_period(pool: &PgPool, id: Uuid) -> sqlx::Result<u64> {
    sqlx::query("DELETE FROM periods WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map(|res| res.rows_affected())
}

/// True when a racing activation lost: it tripped the single-active
/// constraint, or Postgres aborted it as a deadlock or serialization failure.
pub fn is_activation_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("23P01" | "40P01" | "40001")
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::web::testing;

    async fn active_count(pool: &PgPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM periods WHERE is_active")
            .fetch_one(pool)
            .await
            .expect("count active periods")
    }

    // Activation state is global to the database, so every activation check
    // lives in this one test.
    #[tokio::test]
    async fn activation_keeps_a_single_active_period() {
        let Some(pool) = testing::database().await else {
            return;
        };

        let mut periods = Vec::new();
        for _ in 0..6 {
            periods.push(testing::period(&pool).await);
        }

        let results = join_all(periods.iter().map(|period| activate_period(&pool, period.id))).await;

        let mut activated = 0;
        for result in &results {
            match result {
                Ok(Some(period)) => {
                    assert!(period.is_active);
                    activated += 1;
                }
                Ok(None) => panic!("period vanished during activation"),
                Err(err) => assert!(is_activation_conflict(err), "unexpected error: {err:?}"),
            }
        }
        assert!(activated >= 1);
        assert_eq!(active_count(&pool).await, 1);

        let (first, second) = (&periods[0], &periods[1]);
        activate_period(&pool, first.id).await.expect("activate first");
        let moved = activate_period(&pool, second.id)
            .await
            .expect("activate second")
            .expect("second exists");
        assert!(moved.is_active);
        let first_now = fetch_period(&pool, first.id)
            .await
            .expect("fetch first")
            .expect("first exists");
        assert!(!first_now.is_active);

        assert!(
            activate_period(&pool, Uuid::new_v4())
                .await
                .expect("unknown id")
                .is_none()
        );
        assert_eq!(active_count(&pool).await, 1);

        for period in &periods {
            delete_period(&pool, period.id).await.expect("clean up");
        }
    }
}
