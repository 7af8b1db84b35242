//! Error type returned by every auth operation
//!
//! Each variant carries a stable machine-readable code that clients match on.
//! The HTTP layer renders it as `{"code": "...", "message": "..."}`.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

use crate::database::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email")]
    InvalidEmail,
    #[error("Password must be at least {0} characters")]
    PasswordTooShort(usize),
    #[error("Password must be at most {0} characters")]
    PasswordTooLong(usize),
    #[error("Invalid value for field '{0}'")]
    InvalidField(String),
    #[error("Invalid callback URL")]
    InvalidCallbackUrl,
    #[error("Provider '{0}' is not configured")]
    ProviderNotFound(String),
    #[error("Email and password authentication is not enabled")]
    EmailPasswordDisabled,
    #[error("Invalid or expired OAuth state")]
    InvalidOAuthState,
    #[error("Invalid email or password")]
    InvalidEmailOrPassword,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Account linking is disabled")]
    AccountLinkingDisabled,
    #[error("A user with this email already exists; sign in with the original method")]
    AccountNotLinked,
    #[error("This account is already linked to another user")]
    AccountAlreadyLinked,
    #[error("User already exists")]
    UserAlreadyExists,
    #[error("User not found")]
    UserNotFound,
    #[error("The provider did not return an email address")]
    EmailNotFound,
    #[error("OAuth provider error: {0}")]
    OAuthProvider(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON body of an error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    /// Stable error code exposed to clients
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEmail => "INVALID_EMAIL",
            Self::PasswordTooShort(_) => "PASSWORD_TOO_SHORT",
            Self::PasswordTooLong(_) => "PASSWORD_TOO_LONG",
            Self::InvalidField(_) => "INVALID_FIELD",
            Self::InvalidCallbackUrl => "INVALID_CALLBACK_URL",
            Self::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            Self::EmailPasswordDisabled => "EMAIL_PASSWORD_DISABLED",
            Self::InvalidOAuthState => "INVALID_OAUTH_STATE",
            Self::InvalidEmailOrPassword => "INVALID_EMAIL_OR_PASSWORD",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::AccountLinkingDisabled => "ACCOUNT_LINKING_DISABLED",
            Self::AccountNotLinked => "ACCOUNT_NOT_LINKED",
            Self::AccountAlreadyLinked => "ACCOUNT_ALREADY_LINKED",
            Self::UserAlreadyExists => "USER_ALREADY_EXISTS",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::EmailNotFound => "EMAIL_NOT_FOUND",
            Self::OAuthProvider(_) => "OAUTH_PROVIDER_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to clients; server-side failures stay generic
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Configuration(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::OAuthProvider(_) => "The OAuth provider request failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEmail
            | Self::PasswordTooShort(_)
            | Self::PasswordTooLong(_)
            | Self::InvalidField(_)
            | Self::InvalidCallbackUrl
            | Self::ProviderNotFound(_)
            | Self::EmailPasswordDisabled
            | Self::InvalidOAuthState => StatusCode::BAD_REQUEST,
            Self::InvalidEmailOrPassword | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::AccountLinkingDisabled => StatusCode::FORBIDDEN,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::AccountNotLinked | Self::AccountAlreadyLinked => StatusCode::CONFLICT,
            Self::UserAlreadyExists | Self::EmailNotFound => StatusCode::UNPROCESSABLE_ENTITY,
            Self::OAuthProvider(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            log::error!("{self}");
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            code: self.code(),
            message: self.public_message(),
        })
    }
}

impl From<StoreError> for AuthError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity: "user", .. } => Self::UserNotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}
