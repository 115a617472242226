use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;

pub const DEFAULT_ROLE: &str = "user";
pub const ADMIN_ROLE: &str = "admin";

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string, not exposed in JSON
    pub phone_number: Option<String>,
    pub role: String,
    pub created_at: OffsetDateTime,
}

/// Values for a user row about to be inserted. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
    pub phone_number: Option<String>,
    pub role: String,
}

/// Partial update of a user. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPatch {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub role: Option<String>,
    pub password: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.email.is_none()
            && self.phone_number.is_none()
            && self.role.is_none()
            && self.password.is_none()
    }

    /// Normalizes and checks every present field before anything is merged.
    pub fn validate(mut self) -> Result<Self, AuthError> {
        if self.is_empty() {
            return Err(AuthError::validation("No fields to update"));
        }
        if let Some(name) = self.full_name.as_mut() {
            *name = name.trim().to_string();
            if name.is_empty() {
                return Err(AuthError::validation("Full name must not be empty"));
            }
        }
        if let Some(email) = self.email.as_mut() {
            *email = normalize_email(email);
            if !is_valid_email(email) {
                return Err(AuthError::validation("Invalid email"));
            }
        }
        if let Some(role) = self.role.as_mut() {
            *role = role.trim().to_lowercase();
            if role != DEFAULT_ROLE && role != ADMIN_ROLE {
                return Err(AuthError::validation("Unknown role"));
            }
        }
        if let Some(password) = self.password.as_ref() {
            if password.is_empty() {
                return Err(AuthError::validation("Password must not be empty"));
            }
        }
        Ok(self)
    }
}

/// Persisted password-reset token.
#[derive(Debug, Clone, FromRow)]
pub struct ResetTokenRecord {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
}

impl ResetTokenRecord {
    /// Expiry is exclusive: a token is dead at `expires_at` itself.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a b@x.com"));
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[test]
    fn empty_patch_is_rejected() {
        let err = UserPatch::default().validate().unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[test]
    fn patch_normalizes_fields() {
        let patch = UserPatch {
            email: Some(" Bob@Example.COM ".into()),
            role: Some("Admin".into()),
            ..Default::default()
        }
        .validate()
        .expect("valid patch");
        assert_eq!(patch.email.as_deref(), Some("bob@example.com"));
        assert_eq!(patch.role.as_deref(), Some("admin"));
    }

    #[test]
    fn patch_rejects_bad_values() {
        for patch in [
            UserPatch { email: Some("nope".into()), ..Default::default() },
            UserPatch { full_name: Some("   ".into()), ..Default::default() },
            UserPatch { role: Some("root".into()), ..Default::default() },
            UserPatch { password: Some(String::new()), ..Default::default() },
        ] {
            assert!(patch.validate().is_err());
        }
    }

    #[test]
    fn patch_rejects_unknown_json_fields() {
        let res = serde_json::from_str::<UserPatch>(r#"{"is_superuser": true}"#);
        assert!(res.is_err());
    }

    #[test]
    fn reset_token_expiry_is_exclusive() {
        let now = OffsetDateTime::now_utc();
        let rec = ResetTokenRecord { token: "t".into(), user_id: Uuid::new_v4(), expires_at: now };
        assert!(rec.is_expired(now));
        assert!(!rec.is_expired(now - Duration::seconds(1)));
    }
}
