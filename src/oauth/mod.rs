//! Social sign-in
//!
//! A [`SocialProvider`] knows how to send a user to the provider's consent
//! page, exchange the returned code and read the user's profile. The auth
//! service owns state handling and account resolution.

mod google;

pub use google::GoogleProvider;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::AccountTokens;

/// Lifetime of a pending OAuth flow
pub const OAUTH_STATE_TTL_MINUTES: i64 = 10;

/// Query parameters the provider sends back to the callback endpoint
#[derive(Deserialize, Debug, Default)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Pending OAuth flow, stored encrypted in the state cookie
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OAuthState {
    /// Random value echoed back by the provider in `state`
    pub csrf: String,
    pub provider: String,
    pub callback_url: String,
    pub error_callback_url: Option<String>,
    pub new_user_callback_url: Option<String>,
    pub code_verifier: String,
    /// Set when the flow links a new account to a signed-in user
    pub link_user_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

impl OAuthState {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    #[must_use]
    pub fn default_expiry() -> DateTime<Utc> {
        Utc::now() + Duration::minutes(OAUTH_STATE_TTL_MINUTES)
    }
}

/// Token endpoint response
#[derive(Deserialize, Debug, Clone, Default)]
pub struct OAuthTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl OAuthTokens {
    #[must_use]
    pub fn to_account_tokens(&self) -> AccountTokens {
        AccountTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            id_token: self.id_token.clone(),
            access_token_expires_at: self.expires_in.and_then(|seconds| {
                Utc::now().checked_add_signed(Duration::try_seconds(seconds)?)
            }),
            scope: self.scope.clone(),
        }
    }
}

/// Profile of the signed-in user as reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthUserInfo {
    /// Stable provider-side identifier (`sub`)
    pub id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[async_trait]
pub trait SocialProvider: Send + Sync {
    /// Provider id used in routes and stored on accounts
    fn id(&self) -> &str;

    /// URL of the provider's consent page
    ///
    /// # Errors
    ///
    /// Returns an error if the configured endpoint is not a valid URL.
    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthError>;

    /// Exchange an authorization code for tokens
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<OAuthTokens, AuthError>;

    /// Read the user's profile from the tokens
    async fn user_info(&self, tokens: &OAuthTokens) -> Result<OAuthUserInfo, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_expiry() {
        let mut state = OAuthState {
            csrf: "csrf".to_string(),
            provider: "google".to_string(),
            callback_url: "/".to_string(),
            error_callback_url: None,
            new_user_callback_url: None,
            code_verifier: "verifier".to_string(),
            link_user_id: None,
            expires_at: OAuthState::default_expiry(),
        };
        assert!(!state.is_expired());

        state.expires_at = Utc::now() - Duration::seconds(1);
        assert!(state.is_expired());
    }

    #[test]
    fn test_token_response_maps_to_account_tokens() {
        let tokens: OAuthTokens = serde_json::from_str(
            r#"{"access_token":"ya29","expires_in":3599,"scope":"openid email","token_type":"Bearer","id_token":"a.b.c"}"#,
        )
        .unwrap();
        let account_tokens = tokens.to_account_tokens();
        assert_eq!(account_tokens.access_token.as_deref(), Some("ya29"));
        assert!(account_tokens.refresh_token.is_none());
        assert!(account_tokens.access_token_expires_at.unwrap() > Utc::now());
    }

    #[test]
    fn test_out_of_range_expires_in_is_dropped() {
        for expires_in in [i64::MAX, i64::MIN] {
            let tokens = OAuthTokens {
                access_token: Some("ya29".to_string()),
                expires_in: Some(expires_in),
                ..Default::default()
            };
            assert!(tokens.to_account_tokens().access_token_expires_at.is_none());
        }
    }
}
