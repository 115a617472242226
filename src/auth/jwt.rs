use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::Claims;
use crate::{config::JwtConfig, error::AuthError};

/// Issues and verifies HS256 session tokens.
///
/// Expiry is checked exactly against the current time; no clock-skew leeway
/// is granted.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(cfg: &JwtConfig) -> Result<Self, AuthError> {
        if cfg.secret.is_empty() {
            return Err(AuthError::Signing("signing secret is not configured".into()));
        }
        if cfg.ttl_minutes <= 0 {
            return Err(AuthError::Signing("token ttl must be positive".into()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::minutes(cfg.ttl_minutes),
        })
    }

    pub fn issue(&self, user_id: Uuid, email: &str, role: &str) -> Result<String, AuthError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role: role.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: (now + self.ttl).unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        debug!(user_id = %user_id, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        // jsonwebtoken only rejects exp < now; a token is already dead at exp.
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if data.claims.exp as i64 <= now {
            return Err(AuthError::InvalidToken("ExpiredSignature".into()));
        }
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn make_signer() -> TokenSigner {
        TokenSigner::new(&AppConfig::for_tests().jwt).expect("signer")
    }

    fn sign_raw(claims: &Claims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let signer = make_signer();
        let user_id = Uuid::new_v4();
        let token = signer.issue(user_id, "a@x.com", "admin").expect("issue");
        assert_eq!(token.split('.').count(), 3);

        let claims = signer.verify(&token).expect("verify");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 24 * 60 * 60);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let signer = make_signer();
        let token = signer.issue(Uuid::new_v4(), "a@x.com", "user").unwrap();
        let (head, sig) = token.rsplit_once('.').unwrap();
        let mut bytes = sig.as_bytes().to_vec();
        bytes[0] = if bytes[0] == b'A' { b'B' } else { b'A' };
        let forged = format!("{head}.{}", String::from_utf8(bytes).unwrap());

        assert!(matches!(signer.verify(&forged), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let signer = make_signer();
        let token = signer.issue(Uuid::new_v4(), "a@x.com", "user").unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        let other = signer.issue(Uuid::new_v4(), "b@x.com", "admin").unwrap();
        let other_payload = other.split('.').nth(1).unwrap();
        let spliced = format!("{}.{}.{}", parts[0], other_payload, parts[2]);

        assert!(signer.verify(&spliced).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = make_signer();
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "a@x.com".into(),
            role: "user".into(),
            iat: now - 120,
            exp: now - 1,
            iss: "test-issuer".into(),
            aud: "test-aud".into(),
        };
        let token = sign_raw(&claims, "test-secret");
        assert!(matches!(signer.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn token_expiring_now_is_rejected() {
        let signer = make_signer();
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let claims = Claims {
            sub: Uuid::new_v4(),
            email: "a@x.com".into(),
            role: "user".into(),
            iat: now - 60,
            exp: now,
            iss: "test-issuer".into(),
            aud: "test-aud".into(),
        };
        let token = sign_raw(&claims, "test-secret");
        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn wrong_secret_or_audience_is_rejected() {
        let signer = make_signer();
        let mut other_cfg = AppConfig::for_tests().jwt;
        other_cfg.secret = "another-secret".into();
        let other = TokenSigner::new(&other_cfg).unwrap();
        let token = other.issue(Uuid::new_v4(), "a@x.com", "user").unwrap();
        assert!(signer.verify(&token).is_err());

        let mut aud_cfg = AppConfig::for_tests().jwt;
        aud_cfg.audience = "someone-else".into();
        let token = TokenSigner::new(&aud_cfg)
            .unwrap()
            .issue(Uuid::new_v4(), "a@x.com", "user")
            .unwrap();
        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn malformed_token_is_rejected() {
        let signer = make_signer();
        for bad in ["", "abc", "a.b", "a.b.c"] {
            assert!(matches!(signer.verify(bad), Err(AuthError::InvalidToken(_))));
        }
    }

    #[test]
    fn missing_secret_fails_construction() {
        let mut cfg = AppConfig::for_tests().jwt;
        cfg.secret.clear();
        assert!(matches!(TokenSigner::new(&cfg), Err(AuthError::Signing(_))));
    }
}
