//! Session transport: encrypted cookies, bearer tokens and request metadata.

pub mod cookie;

pub use cookie::{create_expired_cookie, CookieFactory, CookieOptions};

use actix_web::{http::header, HttpRequest};

/// Client metadata recorded on new sessions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn from_request(req: &HttpRequest) -> Self {
        let ip_address = req
            .connection_info()
            .realip_remote_addr()
            .map(std::string::ToString::to_string);
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(std::string::ToString::to_string);
        Self {
            ip_address,
            user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_request_context_from_headers() {
        let req = TestRequest::default()
            .insert_header((header::USER_AGENT, "Mozilla/5.0 Test"))
            .insert_header(("X-Forwarded-For", "203.0.113.7"))
            .to_http_request();
        let context = RequestContext::from_request(&req);
        assert_eq!(context.user_agent.as_deref(), Some("Mozilla/5.0 Test"));
        assert_eq!(context.ip_address.as_deref(), Some("203.0.113.7"));
    }
}
