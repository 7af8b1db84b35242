// Social sign-in handlers: start, link and callback
use actix_web::{web, HttpRequest, HttpResponse};
use log::{info, warn};
use serde::Serialize;

use super::{current_user, session_cookies};
use crate::auth::{AuthService, SocialRedirect, SocialSignIn};
use crate::error::AuthError;
use crate::oauth::OAuthCallback;
use crate::session::RequestContext;
use crate::utils::responses::{error_redirect_location, redirect};

#[derive(Debug, Serialize)]
struct RedirectResponse {
    url: String,
    redirect: bool,
}

fn state_cookie_json(
    auth: &AuthService,
    flow: &SocialRedirect,
    disable_redirect: bool,
) -> Result<HttpResponse, AuthError> {
    let cookie = auth
        .cookies()
        .create_state_cookie(&flow.state)
        .map_err(|e| AuthError::Internal(format!("failed to encrypt OAuth state: {e}")))?;
    Ok(HttpResponse::Ok().cookie(cookie).json(RedirectResponse {
        url: flow.url.clone(),
        redirect: !disable_redirect,
    }))
}

/// Start a social sign-in, answering with the provider URL as JSON
///
/// # Errors
///
/// Returns `PROVIDER_NOT_FOUND` or `INVALID_CALLBACK_URL` for bad input.
pub async fn sign_in_social(
    body: web::Json<SocialSignIn>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let flow = auth.sign_in_social(&body)?;
    state_cookie_json(&auth, &flow, body.disable_redirect)
}

/// Start a social sign-in from a plain link, redirecting to the provider
///
/// # Errors
///
/// Returns `PROVIDER_NOT_FOUND` or `INVALID_CALLBACK_URL` for bad input.
pub async fn sign_in_social_redirect(
    query: web::Query<SocialSignIn>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let flow = auth.sign_in_social(&query)?;
    let cookie = auth
        .cookies()
        .create_state_cookie(&flow.state)
        .map_err(|e| AuthError::Internal(format!("failed to encrypt OAuth state: {e}")))?;
    Ok(redirect(&flow.url, vec![cookie]))
}

/// Attach a social account to the signed-in user
///
/// # Errors
///
/// Returns `UNAUTHORIZED` without a session and `ACCOUNT_LINKING_DISABLED`
/// while linking is off.
pub async fn link_social(
    req: HttpRequest,
    body: web::Json<SocialSignIn>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let user = current_user(&auth, &req).await?;
    let flow = auth.link_social(&user, &body)?;
    state_cookie_json(&auth, &flow, body.disable_redirect)
}

/// OAuth callback handler
///
/// Always answers with a redirect: to the flow's callback URL on success,
/// otherwise to its error URL with `?error=<code>`.
pub async fn oauth_callback(
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<OAuthCallback>,
    auth: web::Data<AuthService>,
) -> HttpResponse {
    let provider = path.into_inner();
    let stored = auth.cookies().oauth_state_from_request(&req);
    let error_base = stored
        .as_ref()
        .and_then(|state| state.error_callback_url.clone())
        .unwrap_or_else(|| auth.config().default_error_url());
    let mut cookies = vec![auth.cookies().expired_state_cookie()];

    let context = RequestContext::from_request(&req);
    let outcome = auth
        .handle_oauth_callback(&provider, query.into_inner(), stored, &context)
        .await;

    let result = outcome.and_then(|outcome| {
        if let Some(session) = &outcome.session {
            cookies.extend(session_cookies(&auth, session)?);
        }
        Ok(outcome)
    });

    match result {
        Ok(outcome) => {
            info!(
                "{provider} callback completed for user {} (new: {})",
                outcome.user.id, outcome.is_new_user
            );
            redirect(&outcome.redirect_to, cookies)
        }
        Err(e) => {
            warn!("{provider} callback failed: {e}");
            redirect(
                &error_redirect_location(&error_base, e.code()),
                vec![auth.cookies().expired_state_cookie()],
            )
        }
    }
}
