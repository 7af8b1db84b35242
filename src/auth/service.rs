use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::config::AuthConfig;
use super::password::{
    hash_password, prepare_dummy_hash, validate_password, verify_dummy_password, verify_password,
};
use crate::database::{AuthStore, StoreError};
use crate::error::AuthError;
use crate::models::{
    AccountSummary, AccountTokens, NewAccount, NewSession, NewUser, Role, Session, SessionWithUser, User,
    UserUpdate, CREDENTIAL_PROVIDER_ID,
};
use crate::oauth::{GoogleProvider, OAuthCallback, OAuthState, OAuthUserInfo, SocialProvider};
use crate::session::{CookieFactory, RequestContext};
use crate::utils::crypto::{
    generate_code_verifier, generate_csrf_token, generate_session_token, pkce_challenge,
};
use crate::utils::redirect_validator::validate_callback_url;

/// Payload of `POST /sign-up/email`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpEmail {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, rename = "callbackURL", alias = "callbackUrl")]
    pub callback_url: Option<String>,
    /// Any other fields, e.g. `role`
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

/// Payload of `POST /sign-in/email`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInEmail {
    pub email: String,
    pub password: String,
    #[serde(default, rename = "callbackURL", alias = "callbackUrl")]
    pub callback_url: Option<String>,
}

/// Payload of `sign-in/social` and `link-social`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSignIn {
    pub provider: String,
    #[serde(default, rename = "callbackURL", alias = "callbackUrl")]
    pub callback_url: Option<String>,
    #[serde(default, rename = "errorCallbackURL", alias = "errorCallbackUrl")]
    pub error_callback_url: Option<String>,
    #[serde(default, rename = "newUserCallbackURL", alias = "newUserCallbackUrl")]
    pub new_user_callback_url: Option<String>,
    /// Return the URL as JSON instead of redirecting
    #[serde(default)]
    pub disable_redirect: bool,
}

/// Payload of `POST /update-user`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

/// Payload of `POST /admin/set-role`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRole {
    pub user_id: Uuid,
    pub role: Role,
}

/// Result of a credential sign-up or sign-in
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: User,
    /// Absent when sign-up does not sign the user in
    pub session: Option<Session>,
    pub redirect_to: Option<String>,
}

/// Where to send the browser to start an OAuth flow
#[derive(Debug, Clone)]
pub struct SocialRedirect {
    pub url: String,
    pub state: OAuthState,
}

/// Result of a completed OAuth callback
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub user: User,
    /// Absent when the callback only linked an account
    pub session: Option<Session>,
    pub redirect_to: String,
    pub is_new_user: bool,
}

/// Session looked up by token
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub data: SessionWithUser,
    /// The expiry moved forward and the cookie should be re-issued
    pub refreshed: bool,
}

/// The configured authentication service.
///
/// Cheap to clone; all clones share the store and providers.
#[derive(Clone)]
pub struct AuthService {
    config: Arc<AuthConfig>,
    store: Arc<dyn AuthStore>,
    providers: Arc<HashMap<String, Arc<dyn SocialProvider>>>,
    cookies: CookieFactory,
}

/// Assemble the service from its configuration and store.
///
/// # Errors
///
/// Returns [`AuthError::Configuration`] when Google is configured with an
/// empty client id or secret.
pub fn build_auth(config: AuthConfig, store: Arc<dyn AuthStore>) -> Result<AuthService, AuthError> {
    let mut providers: HashMap<String, Arc<dyn SocialProvider>> = HashMap::new();

    if let Some(google) = &config.social_providers.google {
        if google.client_id.trim().is_empty() {
            return Err(AuthError::Configuration(
                "GOOGLE_CLIENT_ID is not set".to_string(),
            ));
        }
        if google.client_secret.trim().is_empty() {
            return Err(AuthError::Configuration(
                "GOOGLE_CLIENT_SECRET is not set".to_string(),
            ));
        }
        providers.insert(
            "google".to_string(),
            Arc::new(GoogleProvider::new(google.clone())),
        );
    }

    if config.email_and_password.enabled {
        prepare_dummy_hash();
    }

    let cookies = CookieFactory::new(&config.secret, &config.cookies);
    info!(
        "Auth service ready: database={}, email_and_password={}, providers=[{}], account_linking={}",
        config.database_provider,
        config.email_and_password.enabled,
        providers.keys().cloned().collect::<Vec<_>>().join(", "),
        config.account.account_linking.enabled
    );

    Ok(AuthService {
        config: Arc::new(config),
        store,
        providers: Arc::new(providers),
        cookies,
    })
}

/// Trim and lowercase an email, rejecting anything that is not address-shaped
fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && email.split_once('@').is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        });
    if valid {
        Ok(email)
    } else {
        Err(AuthError::InvalidEmail)
    }
}

impl AuthService {
    /// Register or replace a social provider
    #[must_use]
    pub fn with_social_provider(mut self, provider: Arc<dyn SocialProvider>) -> Self {
        Arc::make_mut(&mut self.providers).insert(provider.id().to_string(), provider);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieFactory {
        &self.cookies
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    fn provider(&self, id: &str) -> Result<&Arc<dyn SocialProvider>, AuthError> {
        self.providers
            .get(id)
            .ok_or_else(|| AuthError::ProviderNotFound(id.to_string()))
    }

    fn validate_optional_url(&self, url: Option<&str>) -> Result<Option<String>, AuthError> {
        url.map(|url| validate_callback_url(url, &self.config.trusted_origins))
            .transpose()
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        context: &RequestContext,
    ) -> Result<Session, AuthError> {
        let session = self
            .store
            .create_session(NewSession {
                user_id,
                token: generate_session_token(),
                expires_at: Utc::now() + self.config.session.expires_in,
                ip_address: context.ip_address.clone(),
                user_agent: context.user_agent.clone(),
            })
            .await?;
        debug!("Created session for user {user_id}");
        Ok(session)
    }

    /// Register a user with email and password.
    ///
    /// # Errors
    ///
    /// - [`AuthError::EmailPasswordDisabled`] when credential login is off
    /// - [`AuthError::InvalidEmail`], [`AuthError::PasswordTooShort`],
    ///   [`AuthError::PasswordTooLong`] for rejected input
    /// - [`AuthError::UserAlreadyExists`] when the email is taken
    pub async fn sign_up_email(
        &self,
        request: SignUpEmail,
        context: &RequestContext,
    ) -> Result<AuthOutcome, AuthError> {
        if !self.config.email_and_password.enabled {
            return Err(AuthError::EmailPasswordDisabled);
        }
        let email = normalize_email(&request.email)?;
        validate_password(&request.password, &self.config.email_and_password)?;
        let redirect_to = self.validate_optional_url(request.callback_url.as_deref())?;

        let role_field = &self.config.user.additional_fields.role;
        let mut role = role_field.resolve(request.additional.get("role"))?;
        if self.config.initial_role(&email) == Role::Admin {
            role = Role::Admin;
        }
        for key in request.additional.keys().filter(|key| *key != "role") {
            debug!("Ignoring unknown sign-up field '{key}'");
        }

        if self.store.find_user_by_email(&email).await?.is_some() {
            warn!("Sign-up rejected: email already registered");
            return Err(AuthError::UserAlreadyExists);
        }

        let password_hash = hash_password(&request.password)?;
        let user_id = Uuid::new_v4();
        let (user, _) = self
            .store
            .create_user_with_account(
                NewUser {
                    id: user_id,
                    name: request.name.trim().to_string(),
                    email,
                    email_verified: false,
                    image: request.image,
                    role,
                },
                NewAccount {
                    user_id,
                    provider_id: CREDENTIAL_PROVIDER_ID.to_string(),
                    account_id: user_id.to_string(),
                    password: Some(password_hash),
                    tokens: AccountTokens::default(),
                },
            )
            .await
            .map_err(|e| match e {
                StoreError::Duplicate { .. } => AuthError::UserAlreadyExists,
                other => other.into(),
            })?;

        info!("User {} signed up with email (role {})", user.id, user.role);

        let session = if self.config.email_and_password.auto_sign_in {
            Some(self.create_session(user.id, context).await?)
        } else {
            None
        };

        Ok(AuthOutcome {
            user,
            session,
            redirect_to,
        })
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidEmailOrPassword`] for an unknown email, a
    /// user without a password, or a wrong password.
    pub async fn sign_in_email(
        &self,
        request: SignInEmail,
        context: &RequestContext,
    ) -> Result<AuthOutcome, AuthError> {
        if !self.config.email_and_password.enabled {
            return Err(AuthError::EmailPasswordDisabled);
        }
        let email = normalize_email(&request.email)?;
        let redirect_to = self.validate_optional_url(request.callback_url.as_deref())?;

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            warn!("Sign-in failed: unknown email");
            verify_dummy_password(&request.password);
            return Err(AuthError::InvalidEmailOrPassword);
        };

        let password_hash = self
            .store
            .find_account(CREDENTIAL_PROVIDER_ID, &user.id.to_string())
            .await?
            .and_then(|account| account.password);
        let Some(password_hash) = password_hash else {
            warn!("Sign-in failed: user {} has no password", user.id);
            verify_dummy_password(&request.password);
            return Err(AuthError::InvalidEmailOrPassword);
        };

        if !verify_password(&request.password, &password_hash) {
            warn!("Sign-in failed: wrong password for user {}", user.id);
            return Err(AuthError::InvalidEmailOrPassword);
        }

        let session = self.create_session(user.id, context).await?;
        info!("User {} signed in with email", user.id);
        Ok(AuthOutcome {
            user,
            session: Some(session),
            redirect_to,
        })
    }

    /// Start an OAuth flow.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ProviderNotFound`] for an unconfigured provider
    /// - [`AuthError::InvalidCallbackUrl`] for an untrusted callback URL
    pub fn sign_in_social(&self, request: &SocialSignIn) -> Result<SocialRedirect, AuthError> {
        self.start_oauth_flow(request, None)
    }

    /// Start an OAuth flow that attaches the external account to `user`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AccountLinkingDisabled`] while linking is off,
    /// otherwise the same errors as [`AuthService::sign_in_social`].
    pub fn link_social(
        &self,
        user: &User,
        request: &SocialSignIn,
    ) -> Result<SocialRedirect, AuthError> {
        if !self.config.account.account_linking.enabled {
            warn!("Link request from user {} refused: linking disabled", user.id);
            return Err(AuthError::AccountLinkingDisabled);
        }
        self.start_oauth_flow(request, Some(user.id))
    }

    fn start_oauth_flow(
        &self,
        request: &SocialSignIn,
        link_user_id: Option<Uuid>,
    ) -> Result<SocialRedirect, AuthError> {
        let provider = self.provider(&request.provider)?;
        let callback_url = self
            .validate_optional_url(request.callback_url.as_deref())?
            .unwrap_or_else(|| "/".to_string());
        let error_callback_url = self.validate_optional_url(request.error_callback_url.as_deref())?;
        let new_user_callback_url =
            self.validate_optional_url(request.new_user_callback_url.as_deref())?;

        let state = OAuthState {
            csrf: generate_csrf_token(),
            provider: provider.id().to_string(),
            callback_url,
            error_callback_url,
            new_user_callback_url,
            code_verifier: generate_code_verifier(),
            link_user_id,
            expires_at: OAuthState::default_expiry(),
        };

        let url = provider.authorization_url(
            &state.csrf,
            &pkce_challenge(&state.code_verifier),
            &self.config.redirect_uri(provider.id()),
        )?;

        debug!("Starting {} OAuth flow", provider.id());
        Ok(SocialRedirect { url, state })
    }

    /// Check the callback against the stored flow state
    fn verify_callback_state(
        provider_id: &str,
        callback: &OAuthCallback,
        stored: Option<OAuthState>,
    ) -> Result<OAuthState, AuthError> {
        let Some(state) = stored else {
            warn!("OAuth callback without a pending flow");
            return Err(AuthError::InvalidOAuthState);
        };
        if state.is_expired() {
            warn!("OAuth callback for an expired flow");
            return Err(AuthError::InvalidOAuthState);
        }
        if state.provider != provider_id {
            warn!(
                "OAuth callback for {provider_id} but flow started with {}",
                state.provider
            );
            return Err(AuthError::InvalidOAuthState);
        }
        if callback.state.as_deref() != Some(state.csrf.as_str()) {
            warn!("OAuth state parameter does not match the pending flow");
            return Err(AuthError::InvalidOAuthState);
        }
        Ok(state)
    }

    /// Complete an OAuth flow and resolve the external account to a user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidOAuthState`] when the state is missing, expired
    ///   or does not match
    /// - [`AuthError::OAuthProvider`] when the provider reports an error
    /// - [`AuthError::EmailNotFound`] when the profile has no email
    /// - [`AuthError::AccountNotLinked`] when another user owns the email and
    ///   linking is not allowed
    /// - [`AuthError::AccountAlreadyLinked`] when a link targets an external
    ///   account owned by someone else
    pub async fn handle_oauth_callback(
        &self,
        provider_id: &str,
        callback: OAuthCallback,
        stored: Option<OAuthState>,
        context: &RequestContext,
    ) -> Result<CallbackOutcome, AuthError> {
        let provider = self.provider(provider_id)?;
        let state = Self::verify_callback_state(provider_id, &callback, stored)?;

        if let Some(error) = callback.error {
            warn!(
                "{provider_id} returned an error: {error} {}",
                callback.error_description.unwrap_or_default()
            );
            return Err(AuthError::OAuthProvider(error));
        }
        let code = callback
            .code
            .ok_or_else(|| AuthError::OAuthProvider("authorization code missing".to_string()))?;

        let redirect_uri = self.config.redirect_uri(provider_id);
        let tokens = provider
            .exchange_code(&code, &state.code_verifier, &redirect_uri)
            .await?;
        let profile = provider.user_info(&tokens).await?;
        let account_tokens = tokens.to_account_tokens();

        // 1. Known external account
        if let Some(account) = self.store.find_account(provider_id, &profile.id).await? {
            if state.link_user_id.is_some_and(|id| id != account.user_id) {
                return Err(AuthError::AccountAlreadyLinked);
            }
            self.store
                .update_account_tokens(account.id, account_tokens)
                .await?;
            let user = self
                .store
                .find_user_by_id(account.user_id)
                .await?
                .ok_or_else(|| AuthError::Internal("account without user".to_string()))?;
            return self.finish_callback(user, &state, false, context).await;
        }

        let email = profile.email.clone().ok_or(AuthError::EmailNotFound)?;

        // 2. Explicit link to the signed-in user
        if let Some(link_user_id) = state.link_user_id {
            if !self.config.account.account_linking.enabled {
                return Err(AuthError::AccountLinkingDisabled);
            }
            let user = self
                .store
                .find_user_by_id(link_user_id)
                .await?
                .ok_or(AuthError::Unauthorized)?;
            self.attach_account(&user, provider_id, &profile, account_tokens)
                .await?;
            info!("Linked {provider_id} account to user {}", user.id);
            return Ok(CallbackOutcome {
                user,
                session: None,
                redirect_to: state.callback_url,
                is_new_user: false,
            });
        }

        // 3. Email already belongs to a user
        if let Some(existing) = self.store.find_user_by_email(&email).await? {
            if !(self.config.account.account_linking.enabled && profile.email_verified) {
                warn!(
                    "{provider_id} sign-in refused: email belongs to user {} and linking is disabled",
                    existing.id
                );
                return Err(AuthError::AccountNotLinked);
            }
            self.attach_account(&existing, provider_id, &profile, account_tokens)
                .await?;
            let user = if existing.email_verified {
                existing
            } else {
                self.store
                    .update_user(
                        existing.id,
                        UserUpdate {
                            email_verified: Some(true),
                            ..Default::default()
                        },
                    )
                    .await?
            };
            info!("Linked {provider_id} account to user {} by email", user.id);
            return self.finish_callback(user, &state, false, context).await;
        }

        // 4. New user
        let user_id = Uuid::new_v4();
        let name = profile
            .name
            .clone()
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let role = self.config.initial_role(&email);
        let (user, _) = self
            .store
            .create_user_with_account(
                NewUser {
                    id: user_id,
                    name,
                    email,
                    email_verified: profile.email_verified,
                    image: profile.image.clone(),
                    role,
                },
                NewAccount {
                    user_id,
                    provider_id: provider_id.to_string(),
                    account_id: profile.id.clone(),
                    password: None,
                    tokens: account_tokens,
                },
            )
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent sign-up for the same email
                StoreError::Duplicate { entity: "user", .. } => AuthError::AccountNotLinked,
                StoreError::Duplicate { .. } => AuthError::AccountAlreadyLinked,
                other => other.into(),
            })?;
        info!("User {} signed up with {provider_id} (role {})", user.id, user.role);
        self.finish_callback(user, &state, true, context).await
    }

    async fn attach_account(
        &self,
        user: &User,
        provider_id: &str,
        profile: &OAuthUserInfo,
        tokens: AccountTokens,
    ) -> Result<(), AuthError> {
        self.store
            .create_account(NewAccount {
                user_id: user.id,
                provider_id: provider_id.to_string(),
                account_id: profile.id.clone(),
                password: None,
                tokens,
            })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate { .. } => AuthError::AccountAlreadyLinked,
                other => other.into(),
            })?;
        Ok(())
    }

    async fn finish_callback(
        &self,
        user: User,
        state: &OAuthState,
        is_new_user: bool,
        context: &RequestContext,
    ) -> Result<CallbackOutcome, AuthError> {
        let session = self.create_session(user.id, context).await?;
        let redirect_to = if is_new_user {
            state
                .new_user_callback_url
                .clone()
                .unwrap_or_else(|| state.callback_url.clone())
        } else {
            state.callback_url.clone()
        };
        Ok(CallbackOutcome {
            user,
            session: Some(session),
            redirect_to,
            is_new_user,
        })
    }

    /// Look up a session by token, deleting it when expired and extending it
    /// once it is older than the update age.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub async fn get_session(&self, token: &str) -> Result<Option<ActiveSession>, AuthError> {
        let Some(mut session) = self.store.find_session(token).await? else {
            return Ok(None);
        };

        if session.is_expired() {
            debug!("Session for user {} expired", session.user_id);
            self.store.delete_session(token).await?;
            return Ok(None);
        }

        let Some(user) = self.store.find_user_by_id(session.user_id).await? else {
            self.store.delete_session(token).await?;
            return Ok(None);
        };

        let now = Utc::now();
        let session_config = &self.config.session;
        let issued_or_refreshed_at = session.expires_at - session_config.expires_in;
        let refreshed = issued_or_refreshed_at + session_config.update_age <= now;
        if refreshed {
            session = match self
                .store
                .extend_session(token, now + session_config.expires_in)
                .await
            {
                Ok(session) => session,
                // Signed out between the lookup and the extension
                Err(StoreError::NotFound { .. }) => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            debug!("Extended session for user {}", user.id);
        }

        Ok(Some(ActiveSession {
            data: SessionWithUser { session, user },
            refreshed,
        }))
    }

    /// Resolve a token to its user or fail with [`AuthError::Unauthorized`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] without a valid session.
    pub async fn require_session(&self, token: Option<&str>) -> Result<ActiveSession, AuthError> {
        let token = token.ok_or(AuthError::Unauthorized)?;
        self.get_session(token).await?.ok_or(AuthError::Unauthorized)
    }

    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub async fn sign_out(&self, token: &str) -> Result<(), AuthError> {
        self.store.delete_session(token).await?;
        Ok(())
    }

    /// Sign `user_id` out everywhere.
    ///
    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub async fn revoke_sessions(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.store.delete_user_sessions(user_id).await?;
        info!("Revoked all sessions of user {user_id}");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error only when the store fails.
    pub async fn list_accounts(&self, user_id: Uuid) -> Result<Vec<AccountSummary>, AuthError> {
        let accounts = self.store.list_accounts(user_id).await?;
        Ok(accounts.iter().map(AccountSummary::from).collect())
    }

    /// Update the profile of `user_id`. A `role` is applied only when the
    /// role field accepts input.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidField`] for an invalid role when role input
    /// is enabled, or [`AuthError::UserNotFound`].
    pub async fn update_user(&self, user_id: Uuid, request: UpdateUser) -> Result<User, AuthError> {
        let role_field = &self.config.user.additional_fields.role;
        let requested_role = match request.additional.get("role") {
            Some(value) if role_field.input => Some(role_field.resolve(Some(value))?),
            Some(value) => {
                warn!("Ignoring role {value} in profile update for user {user_id}");
                None
            }
            None => None,
        };

        let update = UserUpdate {
            name: request.name.map(|name| name.trim().to_string()),
            image: request.image,
            email_verified: None,
        };

        let mut user = if update.is_empty() {
            self.store
                .find_user_by_id(user_id)
                .await?
                .ok_or(AuthError::UserNotFound)?
        } else {
            self.store.update_user(user_id, update).await?
        };

        if let Some(role) = requested_role {
            user = self.store.set_user_role(user_id, role).await?;
        }
        Ok(user)
    }

    /// Change a user's role on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] unless `actor` is an administrator,
    /// or [`AuthError::UserNotFound`].
    pub async fn set_role(&self, actor: &User, user_id: Uuid, role: Role) -> Result<User, AuthError> {
        if !actor.role.is_admin() {
            warn!("User {} attempted to set a role without ADMIN", actor.id);
            return Err(AuthError::Forbidden);
        }
        let user = self.assign_role(user_id, role).await?;
        info!("User {} set role of {} to {role}", actor.id, user.id);
        Ok(user)
    }

    /// Server-side role assignment with no actor check
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`] for an unknown user.
    pub async fn assign_role(&self, user_id: Uuid, role: Role) -> Result<User, AuthError> {
        Ok(self.store.set_user_role(user_id, role).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::testing::constants::{TEST_EMAIL, TEST_PASSWORD};
    use crate::testing::mock::FAILING_CODE;
    use crate::testing::{MockOAuthCallback, TestAuth, TestFixtures};
    use serde_json::json;

    fn context() -> RequestContext {
        RequestContext {
            ip_address: Some("192.0.2.10".to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    fn sign_in(email: &str, password: &str) -> SignInEmail {
        SignInEmail {
            email: email.to_string(),
            password: password.to_string(),
            callback_url: None,
        }
    }

    fn google_sign_in() -> SocialSignIn {
        SocialSignIn {
            provider: "google".to_string(),
            callback_url: Some("/dashboard".to_string()),
            ..Default::default()
        }
    }

    async fn run_google_flow(
        auth: &TestAuth,
        profile: OAuthUserInfo,
    ) -> Result<CallbackOutcome, AuthError> {
        auth.google.set_profile(profile);
        let redirect = auth.service.sign_in_social(&google_sign_in())?;
        let callback = MockOAuthCallback::success("code-1", &redirect.state.csrf);
        auth.service
            .handle_oauth_callback("google", callback, Some(redirect.state), &context())
            .await
    }

    #[test]
    fn test_build_auth_requires_google_credentials() {
        let mut config = TestFixtures::auth_config();
        if let Some(google) = config.social_providers.google.as_mut() {
            google.client_id = String::new();
        }
        let err = build_auth(config, Arc::new(MemoryStore::new())).err().unwrap();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        assert!(build_auth(TestFixtures::auth_config(), Arc::new(MemoryStore::new())).is_ok());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM ").unwrap(), "alice@example.com");
        for bad in ["", "alice", "alice@", "@example.com", "a@b", "a b@example.com", "a@@example.com"] {
            assert!(normalize_email(bad).is_err(), "should reject {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_in() {
        let auth = TestFixtures::auth();
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        assert_eq!(outcome.user.email, TEST_EMAIL);
        assert_eq!(outcome.user.role, Role::User);
        let session = outcome.session.unwrap();
        assert_eq!(session.ip_address.as_deref(), Some("192.0.2.10"));

        let signed_in = auth
            .service
            .sign_in_email(sign_in("TEST@example.com", TEST_PASSWORD), &context())
            .await
            .unwrap();
        assert_eq!(signed_in.user.id, outcome.user.id);
        assert_ne!(signed_in.session.unwrap().token, session.token);
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_email_look_the_same() {
        let auth = TestFixtures::auth();
        auth.service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();

        let wrong = auth
            .service
            .sign_in_email(sign_in(TEST_EMAIL, "not-the-password"), &context())
            .await
            .unwrap_err();
        let unknown = auth
            .service
            .sign_in_email(sign_in("nobody@example.com", TEST_PASSWORD), &context())
            .await
            .unwrap_err();
        assert_eq!(wrong.code(), "INVALID_EMAIL_OR_PASSWORD");
        assert_eq!(unknown.code(), "INVALID_EMAIL_OR_PASSWORD");
    }

    #[tokio::test]
    async fn test_failed_sign_ins_all_pay_for_a_password_check() {
        let auth = TestFixtures::auth();
        auth.service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        run_google_flow(&auth, TestFixtures::google_profile("sub-9", "social@example.com"))
            .await
            .unwrap();

        let timed = |email: &'static str, password: &'static str| {
            let service = auth.service.clone();
            async move {
                let started = std::time::Instant::now();
                let err = service
                    .sign_in_email(sign_in(email, password), &context())
                    .await
                    .unwrap_err();
                assert_eq!(err.code(), "INVALID_EMAIL_OR_PASSWORD");
                started.elapsed()
            }
        };

        let wrong_password = timed(TEST_EMAIL, "not-the-password").await;
        let unknown_email = timed("nobody@example.com", TEST_PASSWORD).await;
        let no_password = timed("social@example.com", TEST_PASSWORD).await;
        assert!(
            unknown_email * 4 > wrong_password,
            "unknown email {unknown_email:?} vs wrong password {wrong_password:?}"
        );
        assert!(
            no_password * 4 > wrong_password,
            "social-only user {no_password:?} vs wrong password {wrong_password:?}"
        );
    }

    #[tokio::test]
    async fn test_client_role_is_ignored_on_sign_up() {
        let auth = TestFixtures::auth();
        let outcome = auth
            .service
            .sign_up_email(
                TestFixtures::sign_up("mallory@example.com", Some(json!({"role": "ADMIN"}))),
                &context(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.user.role, Role::User);

        let stored = auth
            .store
            .find_user_by_email("mallory@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.role, Role::User);
    }

    #[tokio::test]
    async fn test_admin_email_list_assigns_admin() {
        let mut config = TestFixtures::auth_config();
        config.user.admin_emails = vec!["root@example.com".to_string()];
        let auth = TestFixtures::auth_with_config(config);

        let outcome = auth
            .service
            .sign_up_email(TestFixtures::sign_up("Root@Example.com", None), &context())
            .await
            .unwrap();
        assert_eq!(outcome.user.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_rejected() {
        let auth = TestFixtures::auth();
        auth.service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        let err = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "USER_ALREADY_EXISTS");
        assert_eq!(auth.store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_sign_up_without_auto_sign_in() {
        let mut config = TestFixtures::auth_config();
        config.email_and_password.auto_sign_in = false;
        let auth = TestFixtures::auth_with_config(config);
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        assert!(outcome.session.is_none());
        assert_eq!(auth.store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_email_password_disabled() {
        let mut config = TestFixtures::auth_config();
        config.email_and_password.enabled = false;
        let auth = TestFixtures::auth_with_config(config);
        let err = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EMAIL_PASSWORD_DISABLED");
    }

    #[tokio::test]
    async fn test_google_sign_up_creates_user_and_account() {
        let auth = TestFixtures::auth();
        let outcome = run_google_flow(&auth, TestFixtures::google_profile("sub-1", "g@example.com"))
            .await
            .unwrap();
        assert!(outcome.is_new_user);
        assert_eq!(outcome.redirect_to, "/dashboard");
        assert_eq!(outcome.user.role, Role::User);
        assert!(outcome.user.email_verified);

        let accounts = auth.service.list_accounts(outcome.user.id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].provider_id, "google");
        assert_eq!(accounts[0].account_id, "sub-1");

        let (code, verifier, redirect_uri) = auth.google.last_exchange().unwrap();
        assert_eq!(code, "code-1");
        assert_eq!(verifier.len(), 43);
        assert_eq!(redirect_uri, "http://localhost:8080/api/auth/callback/google");
    }

    #[tokio::test]
    async fn test_returning_google_user_signs_in() {
        let auth = TestFixtures::auth();
        let first = run_google_flow(&auth, TestFixtures::google_profile("sub-1", "g@example.com"))
            .await
            .unwrap();
        let second = run_google_flow(&auth, TestFixtures::google_profile("sub-1", "g@example.com"))
            .await
            .unwrap();
        assert!(!second.is_new_user);
        assert_eq!(second.user.id, first.user.id);
        assert_eq!(auth.store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_google_email_collision_is_not_linked() {
        let auth = TestFixtures::auth();
        let existing = auth
            .service
            .sign_up_email(TestFixtures::sign_up("shared@example.com", None), &context())
            .await
            .unwrap();

        let err = run_google_flow(&auth, TestFixtures::google_profile("sub-9", "shared@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_NOT_LINKED");

        let accounts = auth.service.list_accounts(existing.user.id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].provider_id, CREDENTIAL_PROVIDER_ID);
        assert!(auth.store.find_account("google", "sub-9").await.unwrap().is_none());
        assert_eq!(auth.store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_google_email_collision_links_when_enabled() {
        let mut config = TestFixtures::auth_config();
        config.account.account_linking.enabled = true;
        let auth = TestFixtures::auth_with_config(config);
        let existing = auth
            .service
            .sign_up_email(TestFixtures::sign_up("shared@example.com", None), &context())
            .await
            .unwrap();

        let outcome = run_google_flow(&auth, TestFixtures::google_profile("sub-9", "shared@example.com"))
            .await
            .unwrap();
        assert_eq!(outcome.user.id, existing.user.id);
        assert!(outcome.user.email_verified);
        assert_eq!(auth.service.list_accounts(existing.user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_link_social_refused_while_linking_disabled() {
        let auth = TestFixtures::auth();
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        let err = auth
            .service
            .link_social(&outcome.user, &google_sign_in())
            .unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_LINKING_DISABLED");
    }

    #[tokio::test]
    async fn test_link_social_attaches_account_when_enabled() {
        let mut config = TestFixtures::auth_config();
        config.account.account_linking.enabled = true;
        let auth = TestFixtures::auth_with_config(config);
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();

        auth.google
            .set_profile(TestFixtures::google_profile("sub-7", "other@example.com"));
        let redirect = auth.service.link_social(&outcome.user, &google_sign_in()).unwrap();
        assert_eq!(redirect.state.link_user_id, Some(outcome.user.id));

        let callback = MockOAuthCallback::success("code-2", &redirect.state.csrf);
        let linked = auth
            .service
            .handle_oauth_callback("google", callback, Some(redirect.state), &context())
            .await
            .unwrap();
        assert_eq!(linked.user.id, outcome.user.id);
        assert!(linked.session.is_none());
        assert_eq!(auth.service.list_accounts(outcome.user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_callback_state_checks() {
        let auth = TestFixtures::auth();
        auth.google
            .set_profile(TestFixtures::google_profile("sub-1", "g@example.com"));
        let redirect = auth.service.sign_in_social(&google_sign_in()).unwrap();

        let mismatched = MockOAuthCallback::success("code-1", "forged-state");
        let err = auth
            .service
            .handle_oauth_callback("google", mismatched, Some(redirect.state.clone()), &context())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_OAUTH_STATE");

        let missing = MockOAuthCallback::success("code-1", &redirect.state.csrf);
        let err = auth
            .service
            .handle_oauth_callback("google", missing, None, &context())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_OAUTH_STATE");

        let mut expired = redirect.state.clone();
        expired.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let callback = MockOAuthCallback::success("code-1", &expired.csrf);
        let err = auth
            .service
            .handle_oauth_callback("google", callback, Some(expired), &context())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_OAUTH_STATE");
        assert_eq!(auth.store.user_count(), 0);
    }

    #[tokio::test]
    async fn test_callback_provider_errors() {
        let auth = TestFixtures::auth();
        let redirect = auth.service.sign_in_social(&google_sign_in()).unwrap();

        let denied = MockOAuthCallback::error("access_denied", Some(redirect.state.csrf.as_str()));
        let err = auth
            .service
            .handle_oauth_callback("google", denied, Some(redirect.state.clone()), &context())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OAUTH_PROVIDER_ERROR");

        let bad_code = MockOAuthCallback::success(FAILING_CODE, &redirect.state.csrf);
        let err = auth
            .service
            .handle_oauth_callback("google", bad_code, Some(redirect.state), &context())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "OAUTH_PROVIDER_ERROR");
    }

    #[tokio::test]
    async fn test_profile_without_email() {
        let auth = TestFixtures::auth();
        let mut profile = TestFixtures::google_profile("sub-1", "g@example.com");
        profile.email = None;
        let err = run_google_flow(&auth, profile).await.unwrap_err();
        assert_eq!(err.code(), "EMAIL_NOT_FOUND");
    }

    #[test]
    fn test_sign_in_social_validates_input() {
        let auth = TestFixtures::auth();
        let err = auth
            .service
            .sign_in_social(&SocialSignIn {
                provider: "github".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "PROVIDER_NOT_FOUND");

        let err = auth
            .service
            .sign_in_social(&SocialSignIn {
                provider: "google".to_string(),
                callback_url: Some("https://evil.com/steal".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CALLBACK_URL");

        let redirect = auth
            .service
            .sign_in_social(&SocialSignIn {
                provider: "google".to_string(),
                callback_url: Some("https://app.example.com/home".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(redirect.url.contains(&redirect.state.csrf));
        assert_eq!(redirect.state.callback_url, "https://app.example.com/home");
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let auth = TestFixtures::auth();
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        let token = outcome.session.unwrap().token;

        let active = auth.service.get_session(&token).await.unwrap().unwrap();
        assert_eq!(active.data.user.id, outcome.user.id);
        assert!(!active.refreshed);

        auth.service.sign_out(&token).await.unwrap();
        assert!(auth.service.get_session(&token).await.unwrap().is_none());
        assert!(matches!(
            auth.service.require_session(Some(&token)).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_revoke_sessions_signs_out_everywhere() {
        let auth = TestFixtures::auth();
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        let second = auth
            .service
            .sign_in_email(sign_in(TEST_EMAIL, TEST_PASSWORD), &context())
            .await
            .unwrap();
        assert_eq!(auth.store.session_count(), 2);

        auth.service.revoke_sessions(outcome.user.id).await.unwrap();
        for token in [outcome.session.unwrap().token, second.session.unwrap().token] {
            assert!(auth.service.get_session(&token).await.unwrap().is_none());
        }
        assert_eq!(auth.store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_is_deleted() {
        let auth = TestFixtures::auth();
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        let token = outcome.session.unwrap().token;
        auth.store
            .extend_session(&token, Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();

        assert!(auth.service.get_session(&token).await.unwrap().is_none());
        assert_eq!(auth.store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_old_session_is_extended() {
        let auth = TestFixtures::auth();
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        let token = outcome.session.unwrap().token;
        // Issued two days ago with a seven day lifetime
        let old_expiry = Utc::now() + chrono::Duration::days(5);
        auth.store.extend_session(&token, old_expiry).await.unwrap();

        let active = auth.service.get_session(&token).await.unwrap().unwrap();
        assert!(active.refreshed);
        assert!(active.data.session.expires_at > old_expiry + chrono::Duration::days(1));
    }

    /// Store whose sessions vanish the moment they are extended
    struct SignedOutMidRequest(MemoryStore);

    #[async_trait::async_trait]
    impl AuthStore for SignedOutMidRequest {
        async fn create_user(&self, user: NewUser) -> crate::database::StoreResult<User> {
            self.0.create_user(user).await
        }

        async fn create_user_with_account(
            &self,
            user: NewUser,
            account: NewAccount,
        ) -> crate::database::StoreResult<(User, crate::models::Account)> {
            self.0.create_user_with_account(user, account).await
        }

        async fn find_user_by_id(&self, id: Uuid) -> crate::database::StoreResult<Option<User>> {
            self.0.find_user_by_id(id).await
        }

        async fn find_user_by_email(
            &self,
            email: &str,
        ) -> crate::database::StoreResult<Option<User>> {
            self.0.find_user_by_email(email).await
        }

        async fn update_user(
            &self,
            id: Uuid,
            update: UserUpdate,
        ) -> crate::database::StoreResult<User> {
            self.0.update_user(id, update).await
        }

        async fn set_user_role(&self, id: Uuid, role: Role) -> crate::database::StoreResult<User> {
            self.0.set_user_role(id, role).await
        }

        async fn create_account(
            &self,
            account: NewAccount,
        ) -> crate::database::StoreResult<crate::models::Account> {
            self.0.create_account(account).await
        }

        async fn find_account(
            &self,
            provider_id: &str,
            account_id: &str,
        ) -> crate::database::StoreResult<Option<crate::models::Account>> {
            self.0.find_account(provider_id, account_id).await
        }

        async fn list_accounts(
            &self,
            user_id: Uuid,
        ) -> crate::database::StoreResult<Vec<crate::models::Account>> {
            self.0.list_accounts(user_id).await
        }

        async fn update_account_tokens(
            &self,
            id: Uuid,
            tokens: AccountTokens,
        ) -> crate::database::StoreResult<crate::models::Account> {
            self.0.update_account_tokens(id, tokens).await
        }

        async fn create_session(&self, session: NewSession) -> crate::database::StoreResult<Session> {
            self.0.create_session(session).await
        }

        async fn find_session(&self, token: &str) -> crate::database::StoreResult<Option<Session>> {
            self.0.find_session(token).await
        }

        async fn extend_session(
            &self,
            token: &str,
            expires_at: chrono::DateTime<Utc>,
        ) -> crate::database::StoreResult<Session> {
            self.0.delete_session(token).await?;
            self.0.extend_session(token, expires_at).await
        }

        async fn delete_session(&self, token: &str) -> crate::database::StoreResult<()> {
            self.0.delete_session(token).await
        }

        async fn delete_user_sessions(&self, user_id: Uuid) -> crate::database::StoreResult<()> {
            self.0.delete_user_sessions(user_id).await
        }
    }

    #[tokio::test]
    async fn test_session_signed_out_during_extension_reads_as_missing() {
        let memory = MemoryStore::new();
        let service = build_auth(
            TestFixtures::auth_config(),
            Arc::new(SignedOutMidRequest(memory.clone())),
        )
        .unwrap();
        let outcome = service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();
        let token = outcome.session.unwrap().token;
        memory
            .extend_session(&token, Utc::now() + chrono::Duration::days(5))
            .await
            .unwrap();

        assert!(service.get_session(&token).await.unwrap().is_none());
        assert!(matches!(
            service.require_session(Some(&token)).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_update_user_drops_role() {
        let auth = TestFixtures::auth();
        let outcome = auth
            .service
            .sign_up_email(TestFixtures::default_sign_up(), &context())
            .await
            .unwrap();

        let mut additional = Map::new();
        additional.insert("role".to_string(), json!("ADMIN"));
        let user = auth
            .service
            .update_user(
                outcome.user.id,
                UpdateUser {
                    name: Some(" New Name ".to_string()),
                    image: None,
                    additional,
                },
            )
            .await
            .unwrap();
        assert_eq!(user.name, "New Name");
        assert_eq!(user.role, Role::User);
    }

    #[tokio::test]
    async fn test_set_role_requires_admin() {
        let auth = TestFixtures::auth();
        let user = auth
            .service
            .sign_up_email(TestFixtures::sign_up("user@example.com", None), &context())
            .await
            .unwrap()
            .user;

        let err = auth
            .service
            .set_role(&user, user.id, Role::Admin)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let admin = auth.service.assign_role(user.id, Role::Admin).await.unwrap();
        assert_eq!(admin.role, Role::Admin);

        let err = auth
            .service
            .set_role(&admin, Uuid::new_v4(), Role::User)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "USER_NOT_FOUND");

        let demoted = auth.service.set_role(&admin, user.id, Role::User).await.unwrap();
        assert_eq!(demoted.role, Role::User);
    }
}
