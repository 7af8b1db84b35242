use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{http::header, HttpRequest};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::auth::CookieConfig;
use crate::oauth::{OAuthState, OAUTH_STATE_TTL_MINUTES};
use crate::utils::crypto::{decrypt_data, derive_encryption_key, encrypt_data};

/// Options for cookie creation
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub max_age: CookieDuration,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            same_site: SameSite::Lax,
            path: "/".to_string(),
            max_age: CookieDuration::hours(24),
        }
    }
}

/// Builds and reads the encrypted cookies of the auth service
///
/// The session cookie carries the session token; the state cookie carries
/// the pending [`OAuthState`] between sign-in and callback.
#[derive(Clone)]
pub struct CookieFactory {
    encryption_key: [u8; 32],
    cookie_secure: bool,
    session_cookie_name: String,
    state_cookie_name: String,
}

impl CookieFactory {
    #[must_use]
    pub fn new(secret: &str, cookies: &CookieConfig) -> Self {
        Self {
            encryption_key: derive_encryption_key(secret.as_bytes()),
            cookie_secure: cookies.secure,
            session_cookie_name: format!("{}.session_token", cookies.prefix),
            state_cookie_name: format!("{}.oauth_state", cookies.prefix),
        }
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    #[must_use]
    pub fn state_cookie_name(&self) -> &str {
        &self.state_cookie_name
    }

    /// Generic method to create a cookie with encrypted data
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_cookie<T: Serialize>(
        &self,
        name: &str,
        data: Option<&T>,
        options: CookieOptions,
    ) -> Result<Cookie<'static>> {
        let value = match data {
            Some(data) => encrypt_data(data, &self.encryption_key)?,
            None => String::new(),
        };

        Ok(Cookie::build(name.to_owned(), value)
            .http_only(options.http_only)
            .secure(self.cookie_secure && options.secure)
            .same_site(options.same_site)
            .path(options.path)
            .max_age(options.max_age)
            .finish())
    }

    /// Session cookie living until the session expires
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_session_cookie(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Cookie<'static>> {
        let seconds = (expires_at - Utc::now()).num_seconds().max(0);
        self.create_cookie(
            &self.session_cookie_name,
            Some(&token),
            CookieOptions {
                max_age: CookieDuration::seconds(seconds),
                ..Default::default()
            },
        )
    }

    /// Short-lived cookie carrying a pending OAuth flow
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn create_state_cookie(&self, state: &OAuthState) -> Result<Cookie<'static>> {
        self.create_cookie(
            &self.state_cookie_name,
            Some(state),
            CookieOptions {
                max_age: CookieDuration::minutes(OAUTH_STATE_TTL_MINUTES),
                ..Default::default()
            },
        )
    }

    #[must_use]
    pub fn expired_session_cookie(&self) -> Cookie<'static> {
        create_expired_cookie(&self.session_cookie_name, self.cookie_secure)
    }

    #[must_use]
    pub fn expired_state_cookie(&self) -> Cookie<'static> {
        create_expired_cookie(&self.state_cookie_name, self.cookie_secure)
    }

    fn read_cookie<T: DeserializeOwned>(&self, req: &HttpRequest, name: &str) -> Option<T> {
        let cookie = req.cookie(name)?;
        if cookie.value().is_empty() {
            return None;
        }
        match decrypt_data(cookie.value(), &self.encryption_key) {
            Ok(data) => Some(data),
            Err(e) => {
                log::debug!("Ignoring unreadable {name} cookie: {e}");
                None
            }
        }
    }

    /// Session token from the session cookie, else from `Authorization: Bearer`
    #[must_use]
    pub fn session_token_from_request(&self, req: &HttpRequest) -> Option<String> {
        self.read_cookie::<String>(req, &self.session_cookie_name)
            .or_else(|| bearer_token(req))
    }

    #[must_use]
    pub fn oauth_state_from_request(&self, req: &HttpRequest) -> Option<OAuthState> {
        self.read_cookie(req, &self.state_cookie_name)
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Create an expired cookie for clearing
#[must_use]
pub fn create_expired_cookie(name: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(name.to_owned(), "")
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(-1))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn factory() -> CookieFactory {
        CookieFactory::new(
            "test-secret",
            &CookieConfig {
                prefix: "portcullis".to_string(),
                secure: false,
            },
        )
    }

    #[test]
    fn test_cookie_names_use_prefix() {
        let factory = factory();
        assert_eq!(factory.session_cookie_name(), "portcullis.session_token");
        assert_eq!(factory.state_cookie_name(), "portcullis.oauth_state");
    }

    #[test]
    fn test_session_cookie_is_encrypted_and_readable() {
        let factory = factory();
        let cookie = factory
            .create_session_cookie("token-abc", Utc::now() + chrono::Duration::days(7))
            .unwrap();
        assert_ne!(cookie.value(), "token-abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert!(cookie.max_age().unwrap().whole_days() >= 6);

        let req = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(
            factory.session_token_from_request(&req).as_deref(),
            Some("token-abc")
        );
    }

    #[test]
    fn test_cookie_from_other_secret_is_ignored() {
        let other = CookieFactory::new("another-secret", &CookieConfig::default());
        let cookie = other
            .create_session_cookie("token-abc", Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        let req = TestRequest::default()
            .cookie(Cookie::new("portcullis.session_token", cookie.value().to_string()))
            .to_http_request();
        assert!(factory().session_token_from_request(&req).is_none());
    }

    #[test]
    fn test_bearer_token_fallback() {
        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer raw-token"))
            .to_http_request();
        assert_eq!(
            factory().session_token_from_request(&req).as_deref(),
            Some("raw-token")
        );

        let req = TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Basic dXNlcjpwYXNz"))
            .to_http_request();
        assert!(factory().session_token_from_request(&req).is_none());
    }

    #[test]
    fn test_state_cookie_round_trip() {
        let factory = factory();
        let state = OAuthState {
            csrf: "csrf".to_string(),
            provider: "google".to_string(),
            callback_url: "/dashboard".to_string(),
            error_callback_url: None,
            new_user_callback_url: None,
            code_verifier: "verifier".to_string(),
            link_user_id: None,
            expires_at: OAuthState::default_expiry(),
        };
        let cookie = factory.create_state_cookie(&state).unwrap();
        assert_eq!(cookie.max_age(), Some(CookieDuration::minutes(10)));

        let req = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(factory.oauth_state_from_request(&req), Some(state));
    }

    #[test]
    fn test_expired_cookie() {
        let cookie = factory().expired_session_cookie();
        assert_eq!(cookie.name(), "portcullis.session_token");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(-1)));
    }
}
