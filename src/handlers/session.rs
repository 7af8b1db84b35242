// Session handlers
use actix_web::{web, HttpRequest, HttpResponse};
use log::debug;

use super::{clear_session_cookies, current_user, request_token, session_cookies};
use crate::auth::AuthService;
use crate::error::AuthError;
use crate::utils::responses::json_with_session;

/// Current session and user, or `null`
///
/// Re-issues the session cookie when the session was extended.
///
/// # Errors
///
/// Returns `INTERNAL_ERROR` when the store fails.
pub async fn get_session(
    req: HttpRequest,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let Some(token) = request_token(&auth, &req) else {
        return Ok(HttpResponse::Ok().json(serde_json::Value::Null));
    };
    let Some(active) = auth.get_session(&token).await? else {
        debug!("No active session for the presented token");
        return Ok(json_with_session(
            &serde_json::Value::Null,
            None,
            clear_session_cookies(&auth),
        ));
    };

    if active.refreshed {
        let cookies = session_cookies(&auth, &active.data.session)?;
        Ok(json_with_session(&active.data, Some(token.as_str()), cookies))
    } else {
        Ok(HttpResponse::Ok().json(&active.data))
    }
}

/// Delete the current session and clear its cookie
///
/// # Errors
///
/// Returns `INTERNAL_ERROR` when the store fails.
pub async fn sign_out(
    req: HttpRequest,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    if let Some(token) = request_token(&auth, &req) {
        auth.sign_out(&token).await?;
    }
    let mut response = HttpResponse::Ok();
    for cookie in clear_session_cookies(&auth) {
        response.cookie(cookie);
    }
    Ok(response.json(serde_json::json!({ "success": true })))
}

/// Delete every session of the signed-in user, this one included
///
/// # Errors
///
/// Returns `UNAUTHORIZED` without a session.
pub async fn revoke_sessions(
    req: HttpRequest,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let user = current_user(&auth, &req).await?;
    auth.revoke_sessions(user.id).await?;
    let mut response = HttpResponse::Ok();
    for cookie in clear_session_cookies(&auth) {
        response.cookie(cookie);
    }
    Ok(response.json(serde_json::json!({ "status": true })))
}
