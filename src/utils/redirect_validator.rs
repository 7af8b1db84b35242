use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;

use crate::error::AuthError;

// Compiled lazily; a pattern that failed to compile matches everything so the
// validator fails closed.
type Pattern = LazyLock<Result<Regex, regex::Error>>;

// Path traversal, plain or after decoding
static PATH_TRAVERSAL_PATTERN: Pattern = LazyLock::new(|| Regex::new(r"\.\."));

// Scheme prefix or protocol-relative double slash
static PROTOCOL_PATTERN: Pattern =
    LazyLock::new(|| Regex::new(r"(?i)^(?:[a-z][a-z0-9+.-]*:)|(?:/{2,})"));

// Control characters, backslashes and invisible separators
static SUSPICIOUS_PATTERN: Pattern = LazyLock::new(|| {
    Regex::new(r"[\x00-\x1F\x7F]|\\|[\x{200E}\x{200F}\x{2060}-\x{2064}\x{2000}-\x{200A}]")
});

const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

const MAX_URL_LENGTH: usize = 2048;

fn is_match(pattern: &Pattern, input: &str) -> bool {
    pattern.as_ref().map_or(true, |re| re.is_match(input))
}

/// Validate a post-authentication callback URL.
///
/// Relative paths on this host are accepted. Absolute URLs are accepted only
/// when their origin is one of `trusted_origins`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidCallbackUrl`] for anything else.
pub fn validate_callback_url(url: &str, trusted_origins: &[String]) -> Result<String, AuthError> {
    debug!("Validating callback URL: {url}");

    if url.is_empty() || url.len() > MAX_URL_LENGTH {
        warn!("Callback URL rejected by length: {} characters", url.len());
        return Err(AuthError::InvalidCallbackUrl);
    }

    validate_encoded_patterns(url)?;

    if is_relative_url(url) {
        if is_match(&PROTOCOL_PATTERN, url) {
            warn!("Protocol-relative callback URL rejected: {url}");
            return Err(AuthError::InvalidCallbackUrl);
        }
        return Ok(url.to_string());
    }

    validate_absolute_url(url, trusted_origins)
}

/// Check if URL is relative (starts with /, not //, and has no scheme)
fn is_relative_url(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !has_scheme(url)
}

/// A scheme can only appear before the first `/`, `?` or `#`
fn has_scheme(url: &str) -> bool {
    let end = url.find(['/', '?', '#']).unwrap_or(url.len());
    url[..end].contains(':')
}

fn validate_absolute_url(url: &str, trusted_origins: &[String]) -> Result<String, AuthError> {
    let parsed = url::Url::parse(url).map_err(|e| {
        warn!("Failed to parse callback URL '{url}': {e}");
        AuthError::InvalidCallbackUrl
    })?;

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        warn!("Invalid scheme '{}' in callback URL", parsed.scheme());
        return Err(AuthError::InvalidCallbackUrl);
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        warn!("Callback URL with embedded credentials rejected");
        return Err(AuthError::InvalidCallbackUrl);
    }

    if is_trusted_origin(&parsed, trusted_origins) {
        Ok(url.to_string())
    } else {
        warn!(
            "Callback URL origin {} is not trusted",
            parsed.origin().ascii_serialization()
        );
        Err(AuthError::InvalidCallbackUrl)
    }
}

/// Compare serialized origins so default ports and case differences match.
pub fn is_trusted_origin(url: &url::Url, trusted_origins: &[String]) -> bool {
    let origin = url.origin().ascii_serialization();
    trusted_origins.iter().any(|trusted| {
        url::Url::parse(trusted)
            .map(|t| t.origin().ascii_serialization() == origin)
            .unwrap_or(false)
    })
}

/// Check the raw, decoded and double-decoded forms for attack patterns
fn validate_encoded_patterns(url: &str) -> Result<(), AuthError> {
    for decoded in get_decoded_variants(url) {
        if is_match(&PATH_TRAVERSAL_PATTERN, &decoded) {
            warn!("Path traversal detected in callback URL: {url}");
            return Err(AuthError::InvalidCallbackUrl);
        }

        if is_match(&SUSPICIOUS_PATTERN, &decoded) {
            warn!("Suspicious characters detected in callback URL: {url}");
            return Err(AuthError::InvalidCallbackUrl);
        }

        if contains_dangerous_protocol(&decoded.to_lowercase()) {
            warn!("Dangerous protocol detected in callback URL: {url}");
            return Err(AuthError::InvalidCallbackUrl);
        }

        // Domain confusion such as user@trusted.com@evil.com
        if decoded.matches('@').count() > 1 {
            warn!("Multiple @ symbols in callback URL: {url}");
            return Err(AuthError::InvalidCallbackUrl);
        }
    }

    Ok(())
}

fn get_decoded_variants(url: &str) -> Vec<String> {
    let mut variants = Vec::with_capacity(3);
    variants.push(url.to_string());

    if let Ok(decoded) = urlencoding::decode(url) {
        let decoded = decoded.into_owned();
        if decoded != url {
            if let Ok(double_decoded) = urlencoding::decode(&decoded) {
                let double_decoded = double_decoded.into_owned();
                if double_decoded != decoded {
                    variants.push(double_decoded);
                }
            }
            variants.push(decoded);
        }
    }

    variants
}

fn contains_dangerous_protocol(text: &str) -> bool {
    const DANGEROUS_PROTOCOLS: &[&str] = &["javascript:", "vbscript:", "data:", "file:", "ftp:"];

    DANGEROUS_PROTOCOLS
        .iter()
        .any(|protocol| text.contains(protocol))
}
