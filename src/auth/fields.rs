use log::warn;
use serde_json::Value;

use crate::error::AuthError;
use crate::models::Role;

/// Declaration of the `role` attribute on users
#[derive(Debug, Clone)]
pub struct RoleField {
    /// Values the column accepts
    pub allowed: Vec<Role>,
    pub default: Role,
    /// Whether clients may supply the value
    pub input: bool,
}

impl Default for RoleField {
    fn default() -> Self {
        Self {
            allowed: Role::ALL.to_vec(),
            default: Role::User,
            input: false,
        }
    }
}

impl RoleField {
    /// Role to store for a client-supplied value.
    ///
    /// With `input` disabled the value is dropped and the default returned.
    ///
    /// # Errors
    ///
    /// With `input` enabled, returns [`AuthError::InvalidField`] when the
    /// value is not a string naming an allowed role.
    pub fn resolve(&self, supplied: Option<&Value>) -> Result<Role, AuthError> {
        let Some(value) = supplied.filter(|v| !v.is_null()) else {
            return Ok(self.default);
        };

        if !self.input {
            warn!("Ignoring client-supplied role {value}");
            return Ok(self.default);
        }

        value
            .as_str()
            .and_then(|s| s.parse::<Role>().ok())
            .filter(|role| self.allowed.contains(role))
            .ok_or_else(|| AuthError::InvalidField("role".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_role_dropped_when_input_disabled() {
        let field = RoleField::default();
        assert_eq!(field.resolve(Some(&json!("ADMIN"))).unwrap(), Role::User);
        assert_eq!(field.resolve(Some(&json!(42))).unwrap(), Role::User);
        assert_eq!(field.resolve(None).unwrap(), Role::User);
    }

    #[test]
    fn test_client_role_validated_when_input_enabled() {
        let field = RoleField {
            input: true,
            ..Default::default()
        };
        assert_eq!(field.resolve(Some(&json!("ADMIN"))).unwrap(), Role::Admin);
        assert_eq!(field.resolve(Some(&Value::Null)).unwrap(), Role::User);
        assert!(matches!(
            field.resolve(Some(&json!("ROOT"))),
            Err(AuthError::InvalidField(ref f)) if f == "role"
        ));

        let restricted = RoleField {
            allowed: vec![Role::User],
            input: true,
            ..Default::default()
        };
        assert!(restricted.resolve(Some(&json!("ADMIN"))).is_err());
    }
}
