//! Mock objects and fake implementations for testing
//!
//! [`MockSocialProvider`] stands in for Google so OAuth flows run without
//! network access.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::AuthError;
use crate::oauth::{OAuthCallback, OAuthTokens, OAuthUserInfo, SocialProvider};

/// Authorization code the mock provider refuses to exchange
pub const FAILING_CODE: &str = "bad-code";

#[derive(Default)]
struct MockState {
    profile: Option<OAuthUserInfo>,
    last_exchange: Option<(String, String, String)>,
}

/// Scriptable [`SocialProvider`]
///
/// Clones share state, so a test can keep a handle after passing one to the
/// service.
#[derive(Clone)]
pub struct MockSocialProvider {
    id: String,
    state: Arc<Mutex<MockState>>,
}

impl MockSocialProvider {
    #[must_use]
    pub fn google() -> Self {
        Self {
            id: "google".to_string(),
            state: Arc::default(),
        }
    }

    /// Profile returned by the next `user_info` calls
    pub fn set_profile(&self, profile: OAuthUserInfo) {
        self.state.lock().profile = Some(profile);
    }

    /// `(code, code_verifier, redirect_uri)` of the last exchange
    #[must_use]
    pub fn last_exchange(&self) -> Option<(String, String, String)> {
        self.state.lock().last_exchange.clone()
    }
}

#[async_trait]
impl SocialProvider for MockSocialProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthError> {
        let mut url = url::Url::parse("https://accounts.google.test/o/oauth2/v2/auth")
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("redirect_uri", redirect_uri);
        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<OAuthTokens, AuthError> {
        if code == FAILING_CODE {
            return Err(AuthError::OAuthProvider("invalid_grant".to_string()));
        }
        self.state.lock().last_exchange = Some((
            code.to_string(),
            code_verifier.to_string(),
            redirect_uri.to_string(),
        ));
        Ok(OAuthTokens {
            access_token: Some(format!("access-{code}")),
            refresh_token: Some(format!("refresh-{code}")),
            id_token: None,
            expires_in: Some(3600),
            scope: Some("openid email profile".to_string()),
            token_type: Some("Bearer".to_string()),
        })
    }

    async fn user_info(&self, _tokens: &OAuthTokens) -> Result<OAuthUserInfo, AuthError> {
        self.state
            .lock()
            .profile
            .clone()
            .ok_or_else(|| AuthError::OAuthProvider("no profile scripted".to_string()))
    }
}

/// Mock OAuth callback query data
pub struct MockOAuthCallback;

impl MockOAuthCallback {
    #[must_use]
    pub fn success(code: &str, state: &str) -> OAuthCallback {
        OAuthCallback {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn error(error: &str, state: Option<&str>) -> OAuthCallback {
        OAuthCallback {
            state: state.map(ToString::to_string),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}
