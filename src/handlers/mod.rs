// HTTP request handlers for the auth routes
pub mod email;
pub mod health;
pub mod session;
pub mod social;
pub mod user;

use actix_web::{cookie::Cookie, web, HttpRequest};
use serde::Serialize;

use crate::auth::{AuthPlugin, AuthService};
use crate::error::AuthError;
use crate::models::{Session, User};

pub use email::{sign_in_email, sign_up_email};
pub use health::{error_page, health, ok};
pub use session::{get_session, revoke_sessions, sign_out};
pub use social::{link_social, oauth_callback, sign_in_social, sign_in_social_redirect};
pub use user::{list_accounts, set_role, update_user};

/// Body returned by the credential and session endpoints
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub redirect: bool,
    pub token: Option<String>,
    pub url: Option<String>,
    pub user: User,
}

/// Register every auth route under `base_path`, plus `/ping` at the root
pub fn configure_services(cfg: &mut web::ServiceConfig, base_path: &str) {
    cfg.service(
        web::scope(base_path)
            .route("/sign-up/email", web::post().to(sign_up_email))
            .route("/sign-in/email", web::post().to(sign_in_email))
            .route("/sign-in/social", web::post().to(sign_in_social))
            .route("/sign-in/social", web::get().to(sign_in_social_redirect))
            .route("/callback/{provider}", web::get().to(oauth_callback))
            .route("/get-session", web::get().to(get_session))
            .route("/sign-out", web::post().to(sign_out))
            .route("/revoke-sessions", web::post().to(revoke_sessions))
            .route("/link-social", web::post().to(link_social))
            .route("/list-accounts", web::get().to(list_accounts))
            .route("/update-user", web::post().to(update_user))
            .route("/admin/set-role", web::post().to(set_role))
            .route("/ok", web::get().to(ok))
            .route("/error", web::get().to(error_page)),
    )
    .route("/ping", web::get().to(health));
}

/// Session cookie for `session`, written only when the host-cookies plugin is on
fn session_cookies(auth: &AuthService, session: &Session) -> Result<Vec<Cookie<'static>>, AuthError> {
    if !auth.config().has_plugin(AuthPlugin::HostCookies) {
        return Ok(Vec::new());
    }
    let cookie = auth
        .cookies()
        .create_session_cookie(&session.token, session.expires_at)
        .map_err(|e| AuthError::Internal(format!("failed to encrypt session cookie: {e}")))?;
    Ok(vec![cookie])
}

/// Cookie clearing the session, when the host-cookies plugin is on
fn clear_session_cookies(auth: &AuthService) -> Vec<Cookie<'static>> {
    if auth.config().has_plugin(AuthPlugin::HostCookies) {
        vec![auth.cookies().expired_session_cookie()]
    } else {
        Vec::new()
    }
}

fn request_token(auth: &AuthService, req: &HttpRequest) -> Option<String> {
    auth.cookies().session_token_from_request(req)
}

/// User behind the request's session, or `UNAUTHORIZED`
async fn current_user(auth: &AuthService, req: &HttpRequest) -> Result<User, AuthError> {
    let token = request_token(auth, req);
    Ok(auth.require_session(token.as_deref()).await?.data.user)
}
