// Email and password handlers
use actix_web::{web, HttpRequest, HttpResponse};

use super::{session_cookies, SessionResponse};
use crate::auth::{AuthOutcome, AuthService, SignInEmail, SignUpEmail};
use crate::error::AuthError;
use crate::session::RequestContext;
use crate::utils::responses::json_with_session;

fn outcome_response(auth: &AuthService, outcome: AuthOutcome) -> Result<HttpResponse, AuthError> {
    let cookies = match &outcome.session {
        Some(session) => session_cookies(auth, session)?,
        None => Vec::new(),
    };
    let token = outcome.session.map(|session| session.token);
    let body = SessionResponse {
        redirect: outcome.redirect_to.is_some(),
        token: token.clone(),
        url: outcome.redirect_to,
        user: outcome.user,
    };
    Ok(json_with_session(&body, token.as_deref(), cookies))
}

/// Register with email and password
///
/// # Errors
///
/// Returns the [`AuthError`] of the failed registration, rendered as JSON.
pub async fn sign_up_email(
    req: HttpRequest,
    body: web::Json<SignUpEmail>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let context = RequestContext::from_request(&req);
    let outcome = auth.sign_up_email(body.into_inner(), &context).await?;
    outcome_response(&auth, outcome)
}

/// Sign in with email and password
///
/// # Errors
///
/// Returns `INVALID_EMAIL_OR_PASSWORD` on bad credentials.
pub async fn sign_in_email(
    req: HttpRequest,
    body: web::Json<SignInEmail>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let context = RequestContext::from_request(&req);
    let outcome = auth.sign_in_email(body.into_inner(), &context).await?;
    outcome_response(&auth, outcome)
}
