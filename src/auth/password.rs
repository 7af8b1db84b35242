use std::sync::LazyLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use super::config::EmailAndPasswordConfig;
use crate::error::AuthError;

/// Check the length policy, counted in characters
///
/// # Errors
///
/// Returns [`AuthError::PasswordTooShort`] or [`AuthError::PasswordTooLong`].
pub fn validate_password(password: &str, config: &EmailAndPasswordConfig) -> Result<(), AuthError> {
    let length = password.chars().count();
    if length < config.min_password_length {
        return Err(AuthError::PasswordTooShort(config.min_password_length));
    }
    if length > config.max_password_length {
        return Err(AuthError::PasswordTooLong(config.max_password_length));
    }
    Ok(())
}

/// Hash a password with Argon2id and a random salt
///
/// # Errors
///
/// Returns [`AuthError::Internal`] if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
}

// Verified against when a sign-in has no stored hash to check
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("portcullis-no-such-user").ok());

/// Compute the dummy hash ahead of the first failed sign-in
pub fn prepare_dummy_hash() {
    LazyLock::force(&DUMMY_HASH);
}

/// Spend one full Argon2 verification on a sign-in that is already lost,
/// so unknown emails take as long as wrong passwords.
pub fn verify_dummy_password(password: &str) {
    match DUMMY_HASH.as_deref() {
        Some(hash) => {
            let _ = verify_password(password, hash);
        }
        None => log::error!("Dummy password hash is unavailable"),
    }
}

/// Constant-time comparison against a stored PHC hash; a malformed hash
/// never verifies.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        log::error!("Stored password hash is malformed");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn test_same_password_gets_distinct_salts() {
        let first = hash_password("password123").unwrap();
        let second = hash_password("password123").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_dummy_hash_is_a_real_argon2_hash() {
        prepare_dummy_hash();
        let hash = DUMMY_HASH.as_deref().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!verify_password("password123", hash));
        verify_dummy_password("password123");
    }

    #[test]
    fn test_length_policy() {
        let config = EmailAndPasswordConfig::default();
        assert!(matches!(
            validate_password("short", &config),
            Err(AuthError::PasswordTooShort(8))
        ));
        assert!(matches!(
            validate_password(&"x".repeat(129), &config),
            Err(AuthError::PasswordTooLong(128))
        ));
        assert!(validate_password("exactly8", &config).is_ok());
    }
}
