//! `PostgreSQL` repository for pending registrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use ec_relate_core::{Email, PendingUserId};

use super::users::insert_user;
use super::{PendingUserRepository, RepositoryError};
use crate::models::{NewPendingUser, PendingUser, User};

#[derive(sqlx::FromRow)]
struct PendingRow {
    id: PendingUserId,
    email: String,
    name: String,
    password_hash: String,
    issued_token: String,
    created_at: DateTime<Utc>,
    used_by: Option<String>,
}

impl TryFrom<PendingRow> for PendingUser {
    type Error = RepositoryError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid pending email in database: {e}"))
        })?;
        Ok(Self {
            id: row.id,
            email,
            name: row.name,
            password_hash: row.password_hash,
            issued_token: row.issued_token,
            created_at: row.created_at,
            used_by: row.used_by,
        })
    }
}

const COLUMNS: &str = "id, email, name, password_hash, issued_token, created_at, used_by";

/// Repository for the `pending_users` table.
#[derive(Clone)]
pub struct PgPendingUserRepository {
    pool: PgPool,
}

impl PgPendingUserRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingUserRepository for PgPendingUserRepository {
    async fn create(&self, new: NewPendingUser) -> Result<PendingUser, RepositoryError> {
        sqlx::query_as::<_, PendingRow>(&format!(
            r"
            INSERT INTO pending_users (email, name, password_hash, issued_token)
            VALUES ($1, $2, $3, $4)
            RETURNING {COLUMNS}
            "
        ))
        .bind(new.email.as_str())
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(&new.issued_token)
        .fetch_one(&self.pool)
        .await?
        .try_into()
    }

    async fn find_unused_by_email(
        &self,
        email: &Email,
    ) -> Result<Option<PendingUser>, RepositoryError> {
        sqlx::query_as::<_, PendingRow>(&format!(
            r"
            SELECT {COLUMNS}
            FROM pending_users
            WHERE lower(email) = $1 AND used_by IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "
        ))
        .bind(email.normalized())
        .fetch_optional(&self.pool)
        .await?
        .map(PendingUser::try_from)
        .transpose()
    }

    async fn promote(
        &self,
        id: PendingUserId,
        customer_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The conditional update is the at-most-once gate.
        let consumed = sqlx::query_as::<_, PendingRow>(&format!(
            r"
            UPDATE pending_users
            SET used_by = $2, used_at = now()
            WHERE id = $1 AND used_by IS NULL
            RETURNING {COLUMNS}
            "
        ))
        .bind(id)
        .bind(customer_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = consumed else {
            tx.rollback().await?;
            return Ok(None);
        };
        let pending = PendingUser::try_from(row)?;

        let user = insert_user(
            &mut *tx,
            &pending.email,
            &pending.name,
            &pending.password_hash,
        )
        .await?;

        tx.commit().await?;
        Ok(Some(user))
    }

    async fn prune_unused_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM pending_users WHERE used_by IS NULL AND created_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
