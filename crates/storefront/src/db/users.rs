//! `PostgreSQL` repository for host users.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use ec_relate_core::{Email, UserId};

use super::{RepositoryError, UserRepository, conflict_on_unique};
use crate::models::User;

#[derive(sqlx::FromRow)]
pub(super) struct UserRow {
    id: UserId,
    email: String,
    display_name: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;
        Ok(Self {
            id: row.id,
            email,
            display_name: row.display_name,
            created_at: row.created_at,
        })
    }
}

/// Repository for the `users` table.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, email, display_name, created_at
            FROM users
            WHERE lower(email) = $1
            ",
        )
        .bind(email.normalized())
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn password_hash(&self, id: UserId) -> Result<Option<String>, RepositoryError> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash.flatten())
    }

    async fn create(
        &self,
        email: &Email,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        insert_user(&self.pool, email, display_name, password_hash).await
    }
}

/// Insert a user on any executor (pool or open transaction).
pub(super) async fn insert_user<'e, E>(
    executor: E,
    email: &Email,
    display_name: &str,
    password_hash: &str,
) -> Result<User, RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query_as::<_, UserRow>(
        r"
        INSERT INTO users (email, display_name, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id, email, display_name, created_at
        ",
    )
    .bind(email.as_str())
    .bind(display_name)
    .bind(password_hash)
    .fetch_one(executor)
    .await
    .map_err(|e| conflict_on_unique(e, "email"))?
    .try_into()
}
