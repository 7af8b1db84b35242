use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::models::Role;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PortcullisSettings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub session: SessionSettings,
    pub cookies: CookieSettings,
    pub logging: LoggingSettings,
    pub email_and_password: EmailAndPasswordSettings,
    pub providers: Vec<ProviderSettings>,
    pub account: AccountSettings,
    pub user: UserSettings,
    /// Plugin names, see `AuthPlugin`
    pub plugins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Public origin of this service, used to build OAuth redirect URIs
    pub base_url: String,
    /// Path prefix the auth endpoints are mounted under
    pub base_path: String,
    pub cors_origins: String,
    /// Extra origins accepted in callback URLs (comma separated)
    pub trusted_origins: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub provider: String,
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub secret: String,
    /// Lifetime of a session in hours
    pub expires_in_hours: u64,
    /// A session older than this is extended on the next read
    pub update_age_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailAndPasswordSettings {
    pub enabled: bool,
    pub min_password_length: usize,
    pub max_password_length: usize,
    /// Create a session right after sign-up
    pub auto_sign_in: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    pub display_name: Option<String>,
    pub scopes: Vec<String>,
    pub prompt: Option<String>,

    // Direct values (can be overridden by environment variables)
    pub client_id: Option<String>,
    pub client_secret: Option<String>,

    // Environment variable names for overrides
    pub client_id_env: Option<String>,
    pub client_secret_env: Option<String>,

    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccountSettings {
    pub account_linking: AccountLinkingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AccountLinkingSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Role given to every new user
    pub default_role: Role,
    /// Whether clients may send the role field themselves
    pub role_input: bool,
    /// Emails that receive the ADMIN role when their user is created
    pub admin_emails: Vec<String>,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_url: "http://localhost:8080".to_string(),
            base_path: "/api/auth".to_string(),
            cors_origins: "http://localhost:3000,http://localhost:8080".to_string(),
            trusted_origins: String::new(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            provider: "postgresql".to_string(),
            url: "postgres://localhost:5432/portcullis".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            secret: String::new(), // Will be generated if empty
            expires_in_hours: 24 * 7,
            update_age_hours: 24,
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: true, // Default to secure cookies
            prefix: "portcullis".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for EmailAndPasswordSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_password_length: 8,
            max_password_length: 128,
            auto_sign_in: true,
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            display_name: None,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            prompt: None,
            client_id: None,
            client_secret: None,
            client_id_env: None,
            client_secret_env: None,
            enabled: true,
        }
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            default_role: Role::User,
            role_input: false,
            admin_emails: Vec::new(),
        }
    }
}

impl ProviderSettings {
    /// Google provider reading its credentials from `GOOGLE_CLIENT_ID` and
    /// `GOOGLE_CLIENT_SECRET`
    #[must_use]
    pub fn google() -> Self {
        Self {
            name: "google".to_string(),
            display_name: Some("Google".to_string()),
            client_id_env: Some("GOOGLE_CLIENT_ID".to_string()),
            client_secret_env: Some("GOOGLE_CLIENT_SECRET".to_string()),
            ..Default::default()
        }
    }
}

impl PortcullisSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Environment initialization fails
    /// - Settings file cannot be read or parsed
    /// - TOML parsing fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // Initialize environment and logging
        Self::initialize_environment()?;

        // Load base settings from TOML or defaults
        let mut settings = Self::load_base_settings()?;

        // Apply environment variable overrides
        Self::apply_env_overrides(&mut settings);

        Ok(settings)
    }

    /// Initialize environment and logging
    ///
    /// # Errors
    ///
    /// Returns an error if logger initialization fails
    fn initialize_environment() -> Result<(), Box<dyn std::error::Error>> {
        Self::load_env_file();
        env_logger::try_init()?;
        Ok(())
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `PORTCULLIS_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::from_toml_file(std::path::Path::new("Settings.toml"))?
            .unwrap_or_default();

        if let Ok(secrets_dir) = std::env::var("PORTCULLIS_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if let Some(secrets_settings) = Self::from_toml_file(&secrets_path)? {
                println!("✓ Overriding settings from {}", secrets_path.display());
                settings = secrets_settings;
            } else {
                println!(
                    "ℹ PORTCULLIS_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        if settings.providers.is_empty() {
            settings.providers.push(ProviderSettings::google());
        }
        if settings.plugins.is_empty() {
            settings.plugins.push("host-cookies".to_string());
        }

        Ok(settings)
    }

    /// Parse a settings file, returning `None` when it does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn from_toml_file(path: &std::path::Path) -> Result<Option<Self>, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(None);
        }
        let toml_content = fs::read_to_string(path)?;
        let settings: Self = basic_toml::from_str(&toml_content)?;
        println!("✓ Loaded settings from {}", path.display());
        Ok(Some(settings))
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_database_env_overrides(&mut settings.database);
        Self::apply_session_env_overrides(&mut settings.session);
        Self::apply_cookie_env_overrides(&mut settings.cookies);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    /// Apply environment overrides for application settings
    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(base_url) = std::env::var("BASE_URL") {
            app_settings.base_url = base_url;
        }
        if let Ok(cors_origins) = std::env::var("CORS_ORIGINS") {
            app_settings.cors_origins = cors_origins;
        }
        if let Ok(trusted_origins) = std::env::var("TRUSTED_ORIGINS") {
            app_settings.trusted_origins = trusted_origins;
        }
    }

    /// Apply environment overrides for database settings
    fn apply_database_env_overrides(database_settings: &mut DatabaseSettings) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            database_settings.url = url;
        }
        if let Ok(value) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            if let Ok(max_connections) = value.parse::<u32>() {
                database_settings.max_connections = max_connections;
            }
        }
    }

    /// Apply environment overrides for session settings
    pub fn apply_session_env_overrides(session_settings: &mut SessionSettings) {
        Self::apply_numeric_env_override(
            "SESSION_EXPIRES_IN_HOURS",
            &mut session_settings.expires_in_hours,
        );
        Self::apply_numeric_env_override(
            "SESSION_UPDATE_AGE_HOURS",
            &mut session_settings.update_age_hours,
        );

        // Handle session secret with special logic
        Self::handle_session_secret_override(session_settings);
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Helper function to handle session secret environment override and generation
    fn handle_session_secret_override(session_settings: &mut SessionSettings) {
        let env_secret_set = std::env::var("SESSION_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                session_settings.secret = secret;
                true
            }
        });

        // Generate random session secret if no environment variable was set and current value is empty
        if !env_secret_set && session_settings.secret.is_empty() {
            session_settings.secret = Self::generate_random_session_secret();
            Self::warn_about_generated_secret();
        }
    }

    /// Generate a cryptographically secure random session secret
    ///
    /// Generates 32 bytes (256 bits) of entropy for AES-256 compatibility
    fn generate_random_session_secret() -> String {
        use rand::RngCore;
        let mut secret = [0u8; 32]; // 256 bits for AES-256
        rand::rng().fill_bytes(&mut secret);
        general_purpose::STANDARD.encode(secret)
    }

    /// Display warnings about using a generated session secret
    fn warn_about_generated_secret() {
        eprintln!("⚠️  WARNING: Using auto-generated session secret");
        eprintln!("🔒 For production use, set the SESSION_SECRET environment variable");
        eprintln!("   or configure session.secret in Settings.toml");
        eprintln!("💡 Sessions will not survive a restart unless the secret is configured");
    }

    /// Apply environment overrides for cookie settings
    fn apply_cookie_env_overrides(cookie_settings: &mut CookieSettings) {
        if let Ok(cookie_secure_str) = std::env::var("COOKIE_SECURE") {
            if let Ok(cookie_secure) = cookie_secure_str.parse::<bool>() {
                cookie_settings.secure = cookie_secure;
            }
        }
    }

    /// Apply environment overrides for logging settings
    fn apply_logging_env_overrides(logging_settings: &mut LoggingSettings) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            logging_settings.level = log_level;
        }
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get CORS origins as a vector of strings
    #[must_use]
    pub fn get_cors_origins(&self) -> Vec<String> {
        split_list(&self.application.cors_origins)
    }

    /// Origins accepted in callback URLs, always including the base URL
    #[must_use]
    pub fn get_trusted_origins(&self) -> Vec<String> {
        let mut origins = vec![self.application.base_url.trim_end_matches('/').to_string()];
        for origin in split_list(&self.application.trusted_origins) {
            let origin = origin.trim_end_matches('/').to_string();
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }
        origins
    }

    /// Get enabled providers
    #[must_use]
    pub fn get_enabled_providers(&self) -> Vec<&ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled).collect()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ProviderSettings {
    /// Get the client ID, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_id(&self) -> Option<String> {
        read_env_or(self.client_id_env.as_deref(), self.client_id.as_ref())
    }

    /// Get the client secret, checking environment variable first, then falling back to direct value
    #[must_use]
    pub fn get_client_secret(&self) -> Option<String> {
        read_env_or(self.client_secret_env.as_deref(), self.client_secret.as_ref())
    }
}

// Empty values count as missing
fn read_env_or(env_var: Option<&str>, fallback: Option<&String>) -> Option<String> {
    if let Some(env_var) = env_var {
        if let Ok(value) = std::env::var(env_var) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }
    }
    fallback.filter(|value| !value.trim().is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Helper function to clean all relevant environment variables for tests
    fn clean_env_vars() {
        std::env::remove_var("SESSION_SECRET");
        std::env::remove_var("SESSION_EXPIRES_IN_HOURS");
        std::env::remove_var("SESSION_UPDATE_AGE_HOURS");
        std::env::remove_var("PORTCULLIS_SECRETS_DIR");
        std::env::remove_var("GOOGLE_CLIENT_ID");
        std::env::remove_var("GOOGLE_CLIENT_SECRET");
        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    fn test_defaults_match_service_configuration() {
        let settings = PortcullisSettings::default();
        assert_eq!(settings.database.provider, "postgresql");
        assert!(settings.email_and_password.enabled);
        assert!(!settings.account.account_linking.enabled);
        assert_eq!(settings.user.default_role, Role::User);
        assert!(!settings.user.role_input);
        assert_eq!(settings.session.expires_in_hours, 168);
        assert_eq!(settings.application.base_path, "/api/auth");
    }

    #[test]
    #[serial]
    fn test_session_secret_env_override() {
        clean_env_vars();

        let mut session_settings = SessionSettings {
            secret: "default-secret".to_string(),
            ..Default::default()
        };

        std::env::set_var("SESSION_SECRET", "env-override-secret");
        PortcullisSettings::apply_session_env_overrides(&mut session_settings);
        assert_eq!(session_settings.secret, "env-override-secret");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_session_lifetime_env_override() {
        clean_env_vars();

        let mut session_settings = SessionSettings {
            secret: "test-secret".to_string(),
            ..Default::default()
        };

        std::env::set_var("SESSION_EXPIRES_IN_HOURS", "48");
        std::env::set_var("SESSION_UPDATE_AGE_HOURS", "not-a-number");
        PortcullisSettings::apply_session_env_overrides(&mut session_settings);

        assert_eq!(session_settings.expires_in_hours, 48);
        assert_eq!(session_settings.update_age_hours, 24); // Invalid value ignored
        assert_eq!(session_settings.secret, "test-secret");

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_session_secret_auto_generation() {
        clean_env_vars();

        let mut first = SessionSettings::default();
        PortcullisSettings::apply_session_env_overrides(&mut first);
        assert!(first.secret.len() > 40); // Base64 encoded 32 bytes should be ~44 chars

        let mut second = SessionSettings::default();
        PortcullisSettings::apply_session_env_overrides(&mut second);
        assert_ne!(first.secret, second.secret);

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_google_credentials_come_from_environment() {
        clean_env_vars();

        let google = ProviderSettings::google();
        assert_eq!(google.get_client_id(), None);

        std::env::set_var("GOOGLE_CLIENT_ID", "env-client-id");
        std::env::set_var("GOOGLE_CLIENT_SECRET", "env-client-secret");
        assert_eq!(google.get_client_id().as_deref(), Some("env-client-id"));
        assert_eq!(google.get_client_secret().as_deref(), Some("env-client-secret"));

        clean_env_vars();
    }

    #[test]
    #[serial]
    fn test_empty_env_value_falls_back_to_direct_value() {
        clean_env_vars();

        let provider = ProviderSettings {
            client_id: Some("direct-id".to_string()),
            ..ProviderSettings::google()
        };
        std::env::set_var("GOOGLE_CLIENT_ID", "");
        assert_eq!(provider.get_client_id().as_deref(), Some("direct-id"));

        clean_env_vars();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Settings.toml");
        std::fs::write(
            &path,
            r#"
[application]
base_url = "https://auth.example.com"
trusted_origins = "https://app.example.com/, https://admin.example.com"

[account.account_linking]
enabled = true

[user]
default_role = "USER"
admin_emails = ["root@example.com"]

[[providers]]
name = "google"
client_id = "file-client-id"
client_secret = "file-client-secret"
"#,
        )
        .unwrap();

        let settings = PortcullisSettings::from_toml_file(&path).unwrap().unwrap();
        assert_eq!(settings.application.port, 8080);
        assert!(settings.account.account_linking.enabled);
        assert_eq!(settings.user.admin_emails, vec!["root@example.com".to_string()]);
        assert_eq!(settings.providers.len(), 1);
        assert_eq!(settings.providers[0].scopes.len(), 3);
        assert_eq!(
            settings.get_trusted_origins(),
            vec![
                "https://auth.example.com".to_string(),
                "https://app.example.com".to_string(),
                "https://admin.example.com".to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_toml_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PortcullisSettings::from_toml_file(&dir.path().join("Settings.toml")).unwrap();
        assert!(result.is_none());
    }
}
