use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{AuthStore, StoreError, StoreResult};
use crate::models::{
    Account, AccountTokens, NewAccount, NewSession, NewUser, Role, Session, User, UserUpdate,
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    accounts: HashMap<Uuid, Account>,
    sessions: HashMap<String, Session>,
}

impl Tables {
    fn email_taken(&self, email: &str) -> bool {
        self.users.values().any(|u| u.email == email)
    }

    fn account_taken(&self, provider_id: &str, account_id: &str) -> bool {
        self.accounts
            .values()
            .any(|a| a.provider_id == provider_id && a.account_id == account_id)
    }

    fn insert_user(&mut self, new_user: NewUser) -> StoreResult<User> {
        if self.email_taken(&new_user.email) {
            return Err(StoreError::duplicate("user", new_user.email));
        }
        let now = Utc::now();
        let user = User {
            id: new_user.id,
            name: new_user.name,
            email: new_user.email,
            email_verified: new_user.email_verified,
            image: new_user.image,
            role: new_user.role,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn insert_account(&mut self, new_account: NewAccount) -> StoreResult<Account> {
        if !self.users.contains_key(&new_account.user_id) {
            return Err(StoreError::not_found("user", new_account.user_id));
        }
        if self.account_taken(&new_account.provider_id, &new_account.account_id) {
            return Err(StoreError::duplicate(
                "account",
                format!("{}:{}", new_account.provider_id, new_account.account_id),
            ));
        }
        let now = Utc::now();
        let tokens = new_account.tokens;
        let account = Account {
            id: Uuid::new_v4(),
            user_id: new_account.user_id,
            provider_id: new_account.provider_id,
            account_id: new_account.account_id,
            password: new_account.password,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            access_token_expires_at: tokens.access_token_expires_at,
            scope: tokens.scope,
            created_at: now,
            updated_at: now,
        };
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }
}

/// In-process [`AuthStore`] backed by `parking_lot` locks.
///
/// All tables sit behind one lock so multi-row writes are atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.tables.read().users.len()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.tables.read().sessions.len()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.tables.write().insert_user(user)
    }

    async fn create_user_with_account(
        &self,
        user: NewUser,
        account: NewAccount,
    ) -> StoreResult<(User, Account)> {
        let mut tables = self.tables.write();
        if tables.account_taken(&account.provider_id, &account.account_id) {
            return Err(StoreError::duplicate(
                "account",
                format!("{}:{}", account.provider_id, account.account_id),
            ));
        }
        let user = tables.insert_user(user)?;
        let account = tables.insert_account(NewAccount {
            user_id: user.id,
            ..account
        })?;
        Ok((user, account))
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> StoreResult<User> {
        let mut tables = self.tables.write();
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("user", id))?;
        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(image) = update.image {
            user.image = Some(image);
        }
        if let Some(verified) = update.email_verified {
            user.email_verified = verified;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> StoreResult<User> {
        let mut tables = self.tables.write();
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("user", id))?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn create_account(&self, account: NewAccount) -> StoreResult<Account> {
        self.tables.write().insert_account(account)
    }

    async fn find_account(
        &self,
        provider_id: &str,
        account_id: &str,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .tables
            .read()
            .accounts
            .values()
            .find(|a| a.provider_id == provider_id && a.account_id == account_id)
            .cloned())
    }

    async fn list_accounts(&self, user_id: Uuid) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .tables
            .read()
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn update_account_tokens(
        &self,
        id: Uuid,
        tokens: AccountTokens,
    ) -> StoreResult<Account> {
        let mut tables = self.tables.write();
        let account = tables
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("account", id))?;
        account.access_token = tokens.access_token;
        // Google only returns a refresh token on first consent
        if tokens.refresh_token.is_some() {
            account.refresh_token = tokens.refresh_token;
        }
        account.id_token = tokens.id_token;
        account.access_token_expires_at = tokens.access_token_expires_at;
        account.scope = tokens.scope;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn create_session(&self, session: NewSession) -> StoreResult<Session> {
        let mut tables = self.tables.write();
        if !tables.users.contains_key(&session.user_id) {
            return Err(StoreError::not_found("user", session.user_id));
        }
        if tables.sessions.contains_key(&session.token) {
            return Err(StoreError::duplicate("session", "token"));
        }
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            token: session.token,
            expires_at: session.expires_at,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            created_at: now,
            updated_at: now,
        };
        tables.sessions.insert(session.token.clone(), session.clone());
        Ok(session)
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<Session>> {
        Ok(self.tables.read().sessions.get(token).cloned())
    }

    async fn extend_session(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Session> {
        let mut tables = self.tables.write();
        let session = tables
            .sessions
            .get_mut(token)
            .ok_or_else(|| StoreError::not_found("session", "token"))?;
        session.expires_at = expires_at;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        self.tables.write().sessions.remove(token);
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> StoreResult<()> {
        self.tables
            .write()
            .sessions
            .retain(|_, session| session.user_id != user_id);
        Ok(())
    }
}
