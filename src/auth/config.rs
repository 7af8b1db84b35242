use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use super::fields::RoleField;
use crate::database::DatabaseProvider;
use crate::error::AuthError;
use crate::models::Role;
use crate::settings::PortcullisSettings;

/// Fully resolved configuration of the auth service
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Public origin, e.g. `https://auth.example.com`
    pub base_url: String,
    /// Mount point of the auth routes
    pub base_path: String,
    /// Secret the cookie encryption key is derived from
    pub secret: String,
    pub database_provider: DatabaseProvider,
    pub email_and_password: EmailAndPasswordConfig,
    pub social_providers: SocialProvidersConfig,
    pub account: AccountConfig,
    pub user: UserConfig,
    pub session: SessionConfig,
    pub cookies: CookieConfig,
    /// Origins callback URLs may point to
    pub trusted_origins: Vec<String>,
    pub plugins: Vec<AuthPlugin>,
}

#[derive(Debug, Clone)]
pub struct EmailAndPasswordConfig {
    pub enabled: bool,
    pub min_password_length: usize,
    pub max_password_length: usize,
    pub auto_sign_in: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SocialProvidersConfig {
    pub google: Option<GoogleProviderConfig>,
}

#[derive(Debug, Clone)]
pub struct GoogleProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    pub prompt: Option<String>,
    /// `offline` asks Google for a refresh token
    pub access_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct AccountConfig {
    pub account_linking: AccountLinkingConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AccountLinkingConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    pub additional_fields: AdditionalFields,
    /// Emails promoted to ADMIN when their user is created
    pub admin_emails: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AdditionalFields {
    pub role: RoleField,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub expires_in: Duration,
    pub update_age: Duration,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub prefix: String,
    pub secure: bool,
}

/// Optional behaviour switched on by name in the settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPlugin {
    /// Write and clear the session cookie on the host framework's responses
    HostCookies,
}

impl fmt::Display for AuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostCookies => f.write_str("host-cookies"),
        }
    }
}

impl FromStr for AuthPlugin {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "host-cookies" | "next-cookies" | "nextCookies" => Ok(Self::HostCookies),
            other => Err(AuthError::Configuration(format!("unknown plugin '{other}'"))),
        }
    }
}

impl Default for EmailAndPasswordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_password_length: 8,
            max_password_length: 128,
            auto_sign_in: true,
        }
    }
}

impl Default for GoogleProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            prompt: None,
            access_type: "offline".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expires_in: Duration::days(7),
            update_age: Duration::days(1),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            prefix: "portcullis".to_string(),
            secure: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            base_path: "/api/auth".to_string(),
            secret: String::new(),
            database_provider: DatabaseProvider::Postgresql,
            email_and_password: EmailAndPasswordConfig::default(),
            social_providers: SocialProvidersConfig::default(),
            account: AccountConfig::default(),
            user: UserConfig::default(),
            session: SessionConfig::default(),
            cookies: CookieConfig::default(),
            trusted_origins: vec!["http://localhost:8080".to_string()],
            plugins: vec![AuthPlugin::HostCookies],
        }
    }
}

fn hours(value: u64) -> Result<Duration, AuthError> {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_hours)
        .ok_or_else(|| AuthError::Configuration(format!("duration of {value} hours is too large")))
}

impl AuthConfig {
    /// Resolve settings into an auth configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] when:
    /// - the database provider is unsupported
    /// - the enabled Google provider has no client id or secret
    /// - another social provider is enabled
    /// - a plugin name is unknown
    /// - the session secret is empty
    pub fn from_settings(settings: &PortcullisSettings) -> Result<Self, AuthError> {
        let database_provider = settings
            .database
            .provider
            .parse::<DatabaseProvider>()
            .map_err(|e| AuthError::Configuration(e.to_string()))?;

        let mut social_providers = SocialProvidersConfig::default();
        for provider in settings.get_enabled_providers() {
            if provider.name != "google" {
                return Err(AuthError::Configuration(format!(
                    "unsupported social provider '{}'",
                    provider.name
                )));
            }
            let client_id = provider.get_client_id().ok_or_else(|| {
                AuthError::Configuration(format!(
                    "{} is not set",
                    provider.client_id_env.as_deref().unwrap_or("google client_id")
                ))
            })?;
            let client_secret = provider.get_client_secret().ok_or_else(|| {
                AuthError::Configuration(format!(
                    "{} is not set",
                    provider
                        .client_secret_env
                        .as_deref()
                        .unwrap_or("google client_secret")
                ))
            })?;
            social_providers.google = Some(GoogleProviderConfig {
                client_id,
                client_secret,
                scopes: provider.scopes.clone(),
                prompt: provider.prompt.clone(),
                ..Default::default()
            });
        }

        let plugins = settings
            .plugins
            .iter()
            .map(|name| name.parse::<AuthPlugin>())
            .collect::<Result<Vec<_>, _>>()?;

        if settings.session.secret.is_empty() {
            return Err(AuthError::Configuration(
                "session secret is empty".to_string(),
            ));
        }

        let email_and_password = &settings.email_and_password;
        Ok(Self {
            base_url: settings.application.base_url.trim_end_matches('/').to_string(),
            base_path: normalize_base_path(&settings.application.base_path),
            secret: settings.session.secret.clone(),
            database_provider,
            email_and_password: EmailAndPasswordConfig {
                enabled: email_and_password.enabled,
                min_password_length: email_and_password.min_password_length,
                max_password_length: email_and_password.max_password_length,
                auto_sign_in: email_and_password.auto_sign_in,
            },
            social_providers,
            account: AccountConfig {
                account_linking: AccountLinkingConfig {
                    enabled: settings.account.account_linking.enabled,
                },
            },
            user: UserConfig {
                additional_fields: AdditionalFields {
                    role: RoleField {
                        allowed: Role::ALL.to_vec(),
                        default: settings.user.default_role,
                        input: settings.user.role_input,
                    },
                },
                admin_emails: settings
                    .user
                    .admin_emails
                    .iter()
                    .map(|email| email.trim().to_lowercase())
                    .collect(),
            },
            session: SessionConfig {
                expires_in: hours(settings.session.expires_in_hours)?,
                update_age: hours(settings.session.update_age_hours)?,
            },
            cookies: CookieConfig {
                prefix: settings.cookies.prefix.clone(),
                secure: settings.cookies.secure,
            },
            trusted_origins: settings.get_trusted_origins(),
            plugins,
        })
    }

    #[must_use]
    pub fn has_plugin(&self, plugin: AuthPlugin) -> bool {
        self.plugins.contains(&plugin)
    }

    /// Redirect URI registered with the provider
    #[must_use]
    pub fn redirect_uri(&self, provider: &str) -> String {
        format!("{}{}/callback/{provider}", self.base_url, self.base_path)
    }

    /// Where failed OAuth flows land when the client gave no error URL
    #[must_use]
    pub fn default_error_url(&self) -> String {
        format!("{}{}/error", self.base_url, self.base_path)
    }

    /// Role a new user with `email` receives
    #[must_use]
    pub fn initial_role(&self, email: &str) -> Role {
        if self.user.admin_emails.iter().any(|admin| admin == email) {
            Role::Admin
        } else {
            self.user.additional_fields.role.default
        }
    }
}

fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
