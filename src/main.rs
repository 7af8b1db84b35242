#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use portcullis::{
    auth::{build_auth, AuthConfig, AuthService},
    database::{DatabaseClient, PostgresStore},
    handlers::configure_services,
    settings::PortcullisSettings,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from Settings.toml and environment variables
    // This also loads .env file and initializes the logger
    let settings = PortcullisSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;

    let auth_config = AuthConfig::from_settings(&settings)
        .map_err(|e| std::io::Error::other(format!("Invalid auth configuration: {e}")))?;

    let provider = auth_config.database_provider;
    let client = DatabaseClient::connect(&settings.database)
        .await
        .map_err(|e| std::io::Error::other(format!("Failed to connect to database: {e}")))?;
    client
        .health_check()
        .await
        .map_err(|e| std::io::Error::other(format!("Database health check failed: {e}")))?;
    let store = PostgresStore::new(client.clone(), provider)
        .map_err(|e| std::io::Error::other(format!("Failed to create store: {e}")))?;

    let auth = build_auth(auth_config, Arc::new(store))
        .map_err(|e| std::io::Error::other(format!("Failed to build auth service: {e}")))?;

    println!("✓ Using {provider} sessions with encrypted cookies");
    let result = start_server(auth, settings).await;
    client.close().await;
    result
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(auth: AuthService, settings: PortcullisSettings) -> std::io::Result<()> {
    let bind_address = settings.get_bind_address();
    print_startup_info(&bind_address, &auth);

    // Configure CORS for SPAs
    let cors_origins = settings.get_cors_origins();
    let base_path = auth.config().base_path.clone();

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let base_path = base_path.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["Authorization", "Content-Type", "Accept"])
            .expose_headers(vec!["set-auth-token"])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(auth.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .configure(|cfg| configure_services(cfg, &base_path))
    })
    .bind(&bind_address)?
    .run()
    .await
}

fn print_startup_info(bind_address: &str, auth: &AuthService) {
    let config = auth.config();
    let base = &config.base_path;
    println!("Starting Portcullis auth service on http://{bind_address}");
    println!();
    println!("Email and password endpoints:");
    println!("  POST {base}/sign-up/email      - Register");
    println!("  POST {base}/sign-in/email      - Sign in");
    println!();
    println!("Social endpoints:");
    println!("  GET|POST {base}/sign-in/social - Start Google sign-in");
    println!("  POST {base}/link-social        - Link a provider account");
    println!("  GET  {base}/callback/{{provider}} - OAuth callback");
    println!();
    println!("OAuth callback URL for identity providers:");
    println!("  {}", config.redirect_uri("google"));
    println!();
    println!("Session endpoints:");
    println!("  GET  {base}/get-session        - Current session");
    println!("  POST {base}/sign-out           - Clear session");
    println!("  POST {base}/revoke-sessions    - Sign out everywhere");
    println!("  GET  {base}/list-accounts      - Linked accounts");
    println!("  POST {base}/update-user        - Update profile");
    println!("  POST {base}/admin/set-role     - Change a user's role (ADMIN)");
    println!();
    println!("System endpoints:");
    println!("  GET  /ping            - Health check");
    println!(
        "  Account linking: {}",
        if config.account.account_linking.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
}
