use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use super::{AuthStore, DatabaseClient, DatabaseProvider, StoreError, StoreResult};
use crate::models::{
    Account, AccountTokens, NewAccount, NewSession, NewUser, Role, Session, User, UserUpdate,
};

const USER_COLUMNS: &str =
    "id, name, email, email_verified, image, role, created_at, updated_at";
const ACCOUNT_COLUMNS: &str = "id, user_id, provider_id, account_id, password, access_token, \
     refresh_token, id_token, access_token_expires_at, scope, created_at, updated_at";
const SESSION_COLUMNS: &str =
    "id, user_id, token, expires_at, ip_address, user_agent, created_at, updated_at";

/// [`AuthStore`] over the shared PostgreSQL pool.
///
/// Expects the tables from `sql/schema.sql`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    client: DatabaseClient,
}

impl PostgresStore {
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedProvider`] for any dialect other than
    /// PostgreSQL.
    pub fn new(client: DatabaseClient, provider: DatabaseProvider) -> StoreResult<Self> {
        match provider {
            DatabaseProvider::Postgresql => Ok(Self { client }),
        }
    }

    #[must_use]
    pub fn client(&self) -> &DatabaseClient {
        &self.client
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    let role: String = row.try_get("role")?;
    let role = role
        .parse::<Role>()
        .map_err(|e| StoreError::InvalidData(e.to_string()))?;
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        email_verified: row.try_get("email_verified")?,
        image: row.try_get("image")?,
        role,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        provider_id: row.try_get("provider_id")?,
        account_id: row.try_get("account_id")?,
        password: row.try_get("password")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        id_token: row.try_get("id_token")?,
        access_token_expires_at: row.try_get("access_token_expires_at")?,
        scope: row.try_get("scope")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token: row.try_get("token")?,
        expires_at: row.try_get("expires_at")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn insert_user_sql() -> String {
    format!(
        "INSERT INTO users (id, name, email, email_verified, image, role) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
    )
}

fn insert_account_sql() -> String {
    format!(
        "INSERT INTO accounts (id, user_id, provider_id, account_id, password, access_token, \
         refresh_token, id_token, access_token_expires_at, scope) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {ACCOUNT_COLUMNS}"
    )
}

fn bind_user<'q>(
    sql: &'q str,
    user: &'q NewUser,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(sql)
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.image)
        .bind(user.role.as_str())
}

fn bind_account<'q>(
    sql: &'q str,
    account: &'q NewAccount,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(sql)
        .bind(Uuid::new_v4())
        .bind(account.user_id)
        .bind(&account.provider_id)
        .bind(&account.account_id)
        .bind(&account.password)
        .bind(&account.tokens.access_token)
        .bind(&account.tokens.refresh_token)
        .bind(&account.tokens.id_token)
        .bind(account.tokens.access_token_expires_at)
        .bind(&account.tokens.scope)
}

fn account_key(account: &NewAccount) -> String {
    format!("{}:{}", account.provider_id, account.account_id)
}

#[async_trait]
impl AuthStore for PostgresStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let sql = insert_user_sql();
        let row = bind_user(&sql, &user)
            .fetch_one(self.client.pool())
            .await
            .map_err(|e| StoreError::from_write(e, "user", &user.email))?;
        user_from_row(&row)
    }

    async fn create_user_with_account(
        &self,
        user: NewUser,
        account: NewAccount,
    ) -> StoreResult<(User, Account)> {
        let account = NewAccount {
            user_id: user.id,
            ..account
        };
        let mut tx = self.client.pool().begin().await?;

        let user_sql = insert_user_sql();
        let user_row = bind_user(&user_sql, &user)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::from_write(e, "user", &user.email))?;

        let account_sql = insert_account_sql();
        let account_row = bind_account(&account_sql, &account)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::from_write(e, "account", &account_key(&account)))?;

        tx.commit().await?;
        debug!("Created user {} with {} account", user.id, account.provider_id);
        Ok((user_from_row(&user_row)?, account_from_row(&account_row)?))
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.client.pool())
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        sqlx::query(&sql)
            .bind(email)
            .fetch_optional(self.client.pool())
            .await?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> StoreResult<User> {
        let sql = format!(
            "UPDATE users SET name = COALESCE($2, name), image = COALESCE($3, image), \
             email_verified = COALESCE($4, email_verified), updated_at = now() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(update.name)
            .bind(update.image)
            .bind(update.email_verified)
            .fetch_optional(self.client.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("user", id))?;
        user_from_row(&row)
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> StoreResult<User> {
        let sql = format!(
            "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(role.as_str())
            .fetch_optional(self.client.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("user", id))?;
        user_from_row(&row)
    }

    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        let sql = insert_account_sql();
        let row = bind_account(&sql, &account)
            .fetch_one(self.client.pool())
            .await
            .map_err(|e| StoreError::from_write(e, "account", &account_key(&account)))?;
        account_from_row(&row)
    }

    async fn find_account(
        &self,
        provider_id: &str,
        account_id: &str,
    ) -> StoreResult<Option<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE provider_id = $1 AND account_id = $2"
        );
        sqlx::query(&sql)
            .bind(provider_id)
            .bind(account_id)
            .fetch_optional(self.client.pool())
            .await?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn list_accounts(&self, user_id: Uuid) -> StoreResult<Vec<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 ORDER BY created_at"
        );
        sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(self.client.pool())
            .await?
            .iter()
            .map(account_from_row)
            .collect()
    }

    async fn update_account_tokens(
        &self,
        id: Uuid,
        tokens: AccountTokens,
    ) -> StoreResult<Account> {
        // A missing refresh token keeps the stored one
        let sql = format!(
            "UPDATE accounts SET access_token = $2, refresh_token = COALESCE($3, refresh_token), \
             id_token = $4, access_token_expires_at = $5, scope = $6, updated_at = now() \
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(tokens.access_token)
            .bind(tokens.refresh_token)
            .bind(tokens.id_token)
            .bind(tokens.access_token_expires_at)
            .bind(tokens.scope)
            .fetch_optional(self.client.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("account", id))?;
        account_from_row(&row)
    }

    async fn create_session(&self, session: NewSession) -> StoreResult<Session> {
        let sql = format!(
            "INSERT INTO sessions (id, user_id, token, expires_at, ip_address, user_agent) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(session.user_id)
            .bind(&session.token)
            .bind(session.expires_at)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .fetch_one(self.client.pool())
            .await
            .map_err(|e| StoreError::from_write(e, "session", "token"))?;
        session_from_row(&row)
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token = $1");
        sqlx::query(&sql)
            .bind(token)
            .fetch_optional(self.client.pool())
            .await?
            .map(|row| session_from_row(&row))
            .transpose()
    }

    async fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Session> {
        let sql = format!(
            "UPDATE sessions SET expires_at = $2, updated_at = now() \
             WHERE token = $1 RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(token)
            .bind(expires_at)
            .fetch_optional(self.client.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("session", "token"))?;
        session_from_row(&row)
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(self.client.pool())
            .await?;
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(self.client.pool())
            .await?;
        debug!(
            "Deleted {} sessions for user {}",
            result.rows_affected(),
            user_id
        );
        Ok(())
    }
}
