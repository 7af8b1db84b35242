// Account and profile handlers
use actix_web::{web, HttpRequest, HttpResponse};

use super::current_user;
use crate::auth::{AuthService, SetRole, UpdateUser};
use crate::error::AuthError;

/// Accounts linked to the signed-in user
///
/// # Errors
///
/// Returns `UNAUTHORIZED` without a session.
pub async fn list_accounts(
    req: HttpRequest,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let user = current_user(&auth, &req).await?;
    let accounts = auth.list_accounts(user.id).await?;
    Ok(HttpResponse::Ok().json(accounts))
}

/// Update the signed-in user's name or image
///
/// # Errors
///
/// Returns `UNAUTHORIZED` without a session.
pub async fn update_user(
    req: HttpRequest,
    body: web::Json<UpdateUser>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let user = current_user(&auth, &req).await?;
    let user = auth.update_user(user.id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": true, "user": user })))
}

/// Change another user's role; the caller must be an administrator
///
/// # Errors
///
/// Returns `UNAUTHORIZED` without a session, `FORBIDDEN` for non-admins and
/// `USER_NOT_FOUND` for an unknown target.
pub async fn set_role(
    req: HttpRequest,
    body: web::Json<SetRole>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AuthError> {
    let actor = current_user(&auth, &req).await?;
    let SetRole { user_id, role } = body.into_inner();
    let user = auth.set_role(&actor, user_id, role).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "user": user })))
}
