mod messages;
mod models;
mod rooms;
mod schema;

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub use models::*;
pub use schema::SCHEMA;

/// Narrow persistence contract over the room, membership, message and
/// read receipt tables. Every write the engine performs goes through here.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        tracing::info!("database ready at {url}");

        Ok(Self { pool })
    }

    /// Single-connection in-memory database; every connection to
    /// `sqlite::memory:` is its own database, so the pool must never recycle it.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn upsert_user(&self, id: &str, name: &str, image_url: Option<&str>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (id, name, image_url) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                 image_url = COALESCE(excluded.image_url, image_url)",
        )
        .bind(id)
        .bind(name)
        .bind(image_url)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn user_name(&self, id: &str) -> Result<String, sqlx::Error> {
        Ok(self
            .get_user(id)
            .await?
            .map(|user| user.name)
            .unwrap_or_else(|| "Unknown user".to_owned()))
    }

    /// The subset of `ids` with no user row, in input order.
    pub async fn missing_users(&self, ids: &[String]) -> Result<Vec<String>, sqlx::Error> {
        let mut missing = Vec::new();
        for id in ids {
            let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if found.is_none() {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }

    pub async fn set_presence(&self, id: &str, online: bool, now: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET is_online = ?, last_seen_at = ? WHERE id = ?")
            .bind(online)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Unix time in milliseconds.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
