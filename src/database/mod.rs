//! Persistence for users, accounts and sessions.
//!
//! The auth service talks to an [`AuthStore`]. [`PostgresStore`] is the
//! production adapter over a shared [`DatabaseClient`]; [`MemoryStore`]
//! implements the same contract for tests and local experiments.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::models::{
    Account, AccountTokens, NewAccount, NewSession, NewUser, Role, Session, User, UserUpdate,
};
use crate::settings::DatabaseSettings;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Unique constraint violated
    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Row contents the model cannot represent
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Unsupported database provider '{0}'")]
    UnsupportedProvider(String),
}

impl StoreError {
    pub fn duplicate(entity: &'static str, key: impl Into<String>) -> Self {
        Self::Duplicate {
            entity,
            key: key.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Map a sqlx error, turning unique violations into [`StoreError::Duplicate`]
    pub(crate) fn from_write(error: sqlx::Error, entity: &'static str, key: &str) -> Self {
        match &error {
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
                Self::duplicate(entity, key)
            }
            _ => Self::Sqlx(error),
        }
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// SQL dialect the store adapter speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseProvider {
    Postgresql,
}

impl DatabaseProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
        }
    }
}

impl fmt::Display for DatabaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseProvider {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(Self::Postgresql),
            other => Err(StoreError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Process-wide connection pool.
///
/// Cloning is cheap; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct DatabaseClient {
    pool: PgPool,
}

impl DatabaseClient {
    /// Open the pool and establish the first connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable within the acquire
    /// timeout or the URL is malformed.
    pub async fn connect(settings: &DatabaseSettings) -> StoreResult<Self> {
        info!(
            "Connecting to {} database (max {} connections)",
            settings.provider, settings.max_connections
        );

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_seconds))
            .connect(&settings.url)
            .await?;

        debug!("Database connection established");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is healthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe query fails.
    pub async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Storage contract of the auth service.
///
/// Uniqueness rules every implementation enforces: user email, the pair
/// `(provider_id, account_id)`, and session token.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    /// Insert a user together with its first account, atomically.
    async fn create_user_with_account(
        &self,
        user: NewUser,
        account: NewAccount,
    ) -> StoreResult<(User, Account)>;

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Lookup by normalized (lowercase) email.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> StoreResult<User>;

    async fn set_user_role(&self, id: Uuid, role: Role) -> StoreResult<User>;

    async fn create_account(&self, account: NewAccount) -> StoreResult<Account>;

    async fn find_account(&self, provider_id: &str, account_id: &str)
        -> StoreResult<Option<Account>>;

    async fn list_accounts(&self, user_id: Uuid) -> StoreResult<Vec<Account>>;

    async fn update_account_tokens(&self, id: Uuid, tokens: AccountTokens)
        -> StoreResult<Account>;

    async fn create_session(&self, session: NewSession) -> StoreResult<Session>;

    async fn find_session(&self, token: &str) -> StoreResult<Option<Session>>;

    async fn extend_session(&self, token: &str, expires_at: DateTime<Utc>)
        -> StoreResult<Session>;

    async fn delete_session(&self, token: &str) -> StoreResult<()>;

    async fn delete_user_sessions(&self, user_id: Uuid) -> StoreResult<()>;
}
