//! Test fixtures providing pre-built test objects

use std::sync::Arc;

use serde_json::{Map, Value};

use super::constants::{TEST_BASE_URL, TEST_EMAIL, TEST_PASSWORD, TEST_SECRET, TEST_USER_NAME};
use super::mock::MockSocialProvider;
use crate::auth::{build_auth, AuthConfig, AuthService, GoogleProviderConfig, SignUpEmail};
use crate::database::MemoryStore;
use crate::oauth::OAuthUserInfo;
use crate::settings::{PortcullisSettings, ProviderSettings};

/// Service wired to an in-memory store and a mock Google provider
pub struct TestAuth {
    pub service: AuthService,
    pub store: MemoryStore,
    pub google: MockSocialProvider,
}

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Configuration matching the production options, with Google enabled
    #[must_use]
    pub fn auth_config() -> AuthConfig {
        let mut config = AuthConfig {
            base_url: TEST_BASE_URL.to_string(),
            secret: TEST_SECRET.to_string(),
            trusted_origins: vec![
                TEST_BASE_URL.to_string(),
                "https://app.example.com".to_string(),
            ],
            ..AuthConfig::default()
        };
        config.cookies.secure = false;
        config.social_providers.google = Some(GoogleProviderConfig {
            client_id: "test-client-id".to_string(),
            client_secret: "test-client-secret".to_string(),
            ..Default::default()
        });
        config
    }

    /// Settings with Google credentials given directly
    #[must_use]
    pub fn settings() -> PortcullisSettings {
        let mut settings = PortcullisSettings::default();
        settings.application.base_url = TEST_BASE_URL.to_string();
        settings.session.secret = TEST_SECRET.to_string();
        settings.cookies.secure = false;
        settings.plugins = vec!["host-cookies".to_string()];
        settings.providers = vec![ProviderSettings {
            client_id: Some("test-client-id".to_string()),
            client_secret: Some("test-client-secret".to_string()),
            client_id_env: None,
            client_secret_env: None,
            ..ProviderSettings::google()
        }];
        settings
    }

    /// Build a service from `config`, replacing Google with a mock
    ///
    /// # Panics
    ///
    /// Panics if the configuration is rejected.
    #[must_use]
    pub fn auth_with_config(config: AuthConfig) -> TestAuth {
        let store = MemoryStore::new();
        let google = MockSocialProvider::google();
        let service = build_auth(config, Arc::new(store.clone()))
            .expect("test configuration should build")
            .with_social_provider(Arc::new(google.clone()));
        TestAuth {
            service,
            store,
            google,
        }
    }

    #[must_use]
    pub fn auth() -> TestAuth {
        Self::auth_with_config(Self::auth_config())
    }

    /// Registration payload with optional extra fields
    #[must_use]
    pub fn sign_up(email: &str, extra: Option<Value>) -> SignUpEmail {
        let additional = match extra {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        SignUpEmail {
            name: TEST_USER_NAME.to_string(),
            email: email.to_string(),
            password: TEST_PASSWORD.to_string(),
            image: None,
            callback_url: None,
            additional,
        }
    }

    #[must_use]
    pub fn default_sign_up() -> SignUpEmail {
        Self::sign_up(TEST_EMAIL, None)
    }

    /// Google profile with a verified email
    #[must_use]
    pub fn google_profile(sub: &str, email: &str) -> OAuthUserInfo {
        OAuthUserInfo {
            id: sub.to_string(),
            email: Some(email.to_string()),
            email_verified: true,
            name: Some("Google User".to_string()),
            image: Some("https://lh3.googleusercontent.com/a/test".to_string()),
        }
    }
}
