#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the portcullis service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod auth;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oauth;
pub mod session;
pub mod settings;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use auth::{build_auth, AuthConfig, AuthService};
pub use database::{AuthStore, DatabaseClient, MemoryStore, PostgresStore};
pub use error::AuthError;
pub use handlers::configure_services;
pub use models::{Role, Session, User};
pub use settings::PortcullisSettings;
