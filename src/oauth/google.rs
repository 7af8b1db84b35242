use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;

use super::{OAuthTokens, OAuthUserInfo, SocialProvider};
use crate::auth::GoogleProviderConfig;
use crate::error::AuthError;
use crate::utils::crypto::decode_jwt_payload;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// Google OAuth 2.0 / OpenID Connect client
pub struct GoogleProvider {
    config: GoogleProviderConfig,
    http_client: reqwest::Client,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleProvider {
    #[must_use]
    pub fn new(config: GoogleProviderConfig) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
        }
    }

    /// Point the client at different endpoints, e.g. a local stub server
    #[must_use]
    pub fn with_endpoints(
        mut self,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        userinfo_url: impl Into<String>,
    ) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self.userinfo_url = userinfo_url.into();
        self
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<Value, AuthError> {
        let response = self
            .http_client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::OAuthProvider(format!("userinfo request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::OAuthProvider(format!(
                "userinfo request failed with status {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::OAuthProvider(format!("invalid userinfo response: {e}")))
    }
}

/// Map OpenID Connect claims to a profile
///
/// # Errors
///
/// Returns an error when the `sub` claim is missing.
pub fn profile_from_claims(claims: &Value) -> Result<OAuthUserInfo, AuthError> {
    let id = claims
        .get("sub")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::OAuthProvider("profile is missing the sub claim".to_string()))?;

    // Google sends email_verified as a bool, older tokens as a string
    let email_verified = match claims.get("email_verified") {
        Some(Value::Bool(verified)) => *verified,
        Some(Value::String(verified)) => verified == "true",
        _ => false,
    };

    let text = |key: &str| claims.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(OAuthUserInfo {
        id: id.to_string(),
        email: text("email").map(|email| email.to_lowercase()),
        email_verified,
        name: text("name"),
        image: text("picture"),
    })
}

#[async_trait]
impl SocialProvider for GoogleProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn authorization_url(
        &self,
        state: &str,
        code_challenge: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthError> {
        let scopes = self.config.scopes.join(" ");
        let mut url = url::Url::parse(&self.auth_url)
            .map_err(|e| AuthError::Configuration(format!("invalid Google auth URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("access_type", &self.config.access_type)
            .append_pair("include_granted_scopes", "true");
        if let Some(prompt) = &self.config.prompt {
            url.query_pairs_mut().append_pair("prompt", prompt);
        }

        debug!("Built Google authorization URL with scopes: {scopes}");
        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<OAuthTokens, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        debug!("Exchanging authorization code with Google");
        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::OAuthProvider(format!("token exchange failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!("Google token exchange failed with status {status}: {error_text}");
            return Err(AuthError::OAuthProvider(format!(
                "token exchange failed with status {status}"
            )));
        }

        let tokens: OAuthTokens = response
            .json()
            .await
            .map_err(|e| AuthError::OAuthProvider(format!("invalid token response: {e}")))?;

        debug!(
            "Google token exchange succeeded (id_token: {}, refresh_token: {})",
            tokens.id_token.is_some(),
            tokens.refresh_token.is_some()
        );
        Ok(tokens)
    }

    async fn user_info(&self, tokens: &OAuthTokens) -> Result<OAuthUserInfo, AuthError> {
        // The ID token came straight from the token endpoint over TLS
        if let Some(id_token) = &tokens.id_token {
            match decode_jwt_payload(id_token) {
                Ok(claims) => return profile_from_claims(&claims),
                Err(e) => warn!("Could not decode Google ID token, using userinfo: {e}"),
            }
        }

        let access_token = tokens.access_token.as_deref().ok_or_else(|| {
            AuthError::OAuthProvider("token response has neither id_token nor access_token".into())
        })?;
        let claims = self.fetch_userinfo(access_token).await?;
        profile_from_claims(&claims)
    }
}
