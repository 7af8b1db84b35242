//! Small response helpers shared by the handlers

use actix_web::{cookie::Cookie, http::header, HttpResponse, HttpResponseBuilder};
use serde::Serialize;

/// Response header carrying the session token for bearer clients
pub const SET_AUTH_TOKEN_HEADER: &str = "set-auth-token";

/// `302 Found` to `location`, setting each given cookie
#[must_use]
pub fn redirect(location: &str, cookies: Vec<Cookie<'static>>) -> HttpResponse {
    let mut builder = HttpResponse::Found();
    builder.insert_header((header::LOCATION, location.to_string()));
    add_cookies(&mut builder, cookies);
    builder.finish()
}

/// Append `error=<code>` to `base`, keeping any existing query string
#[must_use]
pub fn error_redirect_location(base: &str, code: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{separator}error={}",
        urlencoding::encode(&code.to_ascii_lowercase())
    )
}

/// JSON response with optional cookies and session token header
pub fn json_with_session<T: Serialize>(
    body: &T,
    token: Option<&str>,
    cookies: Vec<Cookie<'static>>,
) -> HttpResponse {
    let mut builder = HttpResponse::Ok();
    if let Some(token) = token {
        builder.insert_header((SET_AUTH_TOKEN_HEADER, token.to_string()));
    }
    add_cookies(&mut builder, cookies);
    builder.json(body)
}

fn add_cookies(builder: &mut HttpResponseBuilder, cookies: Vec<Cookie<'static>>) {
    for cookie in cookies {
        builder.cookie(cookie);
    }
}
