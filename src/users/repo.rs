use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::repo_types::{NewUser, User, UserRow};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Email or username already taken.
    #[error("unique constraint violated")]
    Duplicate,
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// Persistence contract for user records.
///
/// Implementations must enforce uniqueness of `email` and `username`
/// themselves; callers may pre-check with [`UserStore::find_by_email_or_username`]
/// but a racing insert is only rejected by [`UserStore::insert`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn update_qr_code(&self, id: Uuid, payload: &str) -> Result<bool, StoreError>;
    async fn list_all(&self) -> Result<Vec<User>, StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release backend resources on shutdown.
    async fn close(&self) {}
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, full_name, role, created_at, qr_code";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        binds: &[&str],
    ) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause} LIMIT 1");
        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for b in binds {
            query = query.bind(*b);
        }
        query.fetch_optional(&self.db).await?.map(into_user).transpose()
    }
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn map_insert_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            debug!(constraint = ?db.constraint(), "insert hit unique constraint");
            StoreError::Duplicate
        }
        _ => StoreError::Unavailable(e),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> Result<Option<User>, StoreError> {
        self.fetch_one_where("email = $1 OR username = $2", &[email, username])
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .map(into_user)
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_one_where("email = $1", &[email]).await
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, full_name, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.full_name)
            .bind(user.role.as_str())
            .fetch_one(&self.db)
            .await
            .map_err(map_insert_error)?;
        into_user(row)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn update_qr_code(&self, id: Uuid, payload: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("UPDATE users SET qr_code = $2 WHERE id = $1")
            .bind(id)
            .bind(payload)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC");
        sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(into_user)
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    async fn close(&self) {
        self.db.close().await;
        info!("database connection closed");
    }
}
