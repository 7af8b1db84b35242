//! Authentication core
//!
//! [`build_auth`] turns an [`AuthConfig`] and a store into an [`AuthService`],
//! which implements credential sign-up and sign-in, Google sign-in, session
//! lookup and role management. The HTTP layer in [`crate::handlers`] is a
//! thin wrapper around it.

pub mod config;
pub mod fields;
pub mod password;
pub mod service;

pub use config::{
    AccountConfig, AccountLinkingConfig, AdditionalFields, AuthConfig, AuthPlugin, CookieConfig,
    EmailAndPasswordConfig, GoogleProviderConfig, SessionConfig, SocialProvidersConfig,
    UserConfig,
};
pub use fields::RoleField;
pub use service::{
    build_auth, ActiveSession, AuthOutcome, AuthService, CallbackOutcome, SetRole, SignInEmail,
    SignUpEmail, SocialRedirect, SocialSignIn, UpdateUser,
};
