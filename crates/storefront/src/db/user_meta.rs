//! `PostgreSQL` repository for per-user metadata.

use async_trait::async_trait;
use sqlx::PgPool;

use ec_relate_core::UserId;

use super::{MetaKey, RepositoryError, UserMetaRepository};

/// Repository for the `user_meta` table.
#[derive(Clone)]
pub struct PgUserMetaRepository {
    pool: PgPool,
}

impl PgUserMetaRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserMetaRepository for PgUserMetaRepository {
    async fn get(&self, user: UserId, key: MetaKey) -> Result<Option<String>, RepositoryError> {
        Ok(sqlx::query_scalar(
            "SELECT meta_value FROM user_meta WHERE user_id = $1 AND meta_key = $2",
        )
        .bind(user)
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set(&self, user: UserId, key: MetaKey, value: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO user_meta (user_id, meta_key, meta_value)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, meta_key)
            DO UPDATE SET meta_value = EXCLUDED.meta_value, updated_at = now()
            ",
        )
        .bind(user)
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user: UserId, key: MetaKey) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM user_meta WHERE user_id = $1 AND meta_key = $2")
            .bind(user)
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
