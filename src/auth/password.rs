use argon2::{
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

use crate::{config::HashConfig, error::AuthError};

/// Argon2id hashing for stored credentials.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    #[cfg(test)]
    verifications: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl PasswordHasher {
    pub fn new(cfg: &HashConfig) -> Result<Self, AuthError> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| AuthError::Hashing(format!("invalid argon2 params: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            #[cfg(test)]
            verifications: Default::default(),
        })
    }

    pub fn hash(&self, plain: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                AuthError::Hashing(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Never errors. Cost and salt come from the stored PHC string, so hashes
    /// made under older parameters keep verifying.
    pub fn verify(&self, plain: &str, hash: &str) -> bool {
        #[cfg(test)]
        self.verifications
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "stored password hash is unparseable");
                return false;
            }
        };
        self.argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn verification_count(&self) -> usize {
        self.verifications.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Runs `hash` on the blocking pool.
    pub async fn hash_blocking(&self, plain: String) -> Result<String, AuthError> {
        let hasher = self.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| AuthError::Hashing(format!("hashing task failed: {e}")))?
    }

    /// Runs `verify` on the blocking pool.
    pub async fn verify_blocking(&self, plain: String, hash: String) -> bool {
        let hasher = self.clone();
        match tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash)).await {
            Ok(ok) => ok,
            Err(e) => {
                error!(error = %e, "verify task failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(&AppConfig::for_tests().hash).expect("valid params")
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = hasher();
        let password = "Secur3P@ssw0rd!";
        let hash = hasher.hash(password).expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify(password, &hash));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = hasher();
        let hash = hasher.hash("correct-horse-battery-staple").expect("hashing should succeed");
        assert!(!hasher.verify("wrong-password", &hash));
    }

    #[test]
    fn verify_returns_false_on_malformed_hash() {
        assert!(!hasher().verify("anything", "not-a-valid-hash"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = hasher();
        let h1 = hasher.hash("pw1").unwrap();
        let h2 = hasher.hash("pw1").unwrap();
        assert_ne!(h1, h2);
        assert!(hasher.verify("pw1", &h1));
        assert!(hasher.verify("pw1", &h2));
    }

    #[test]
    fn verify_uses_params_embedded_in_hash() {
        let weak = hasher();
        let hash = weak.hash("pw1").unwrap();
        let default = PasswordHasher::new(&HashConfig::default()).unwrap();
        assert!(default.verify("pw1", &hash));
    }

    #[test]
    fn rejects_invalid_params() {
        let cfg = HashConfig { memory_kib: 1, iterations: 0, parallelism: 0 };
        assert!(matches!(PasswordHasher::new(&cfg), Err(AuthError::Hashing(_))));
    }

    #[test]
    fn clones_share_verification_count() {
        let hasher = hasher();
        let hash = hasher.hash("pw1").unwrap();
        let clone = hasher.clone();
        clone.verify("pw1", &hash);
        hasher.verify("pw1", "garbage");
        assert_eq!(hasher.verification_count(), 2);
    }

    #[tokio::test]
    async fn blocking_variants_agree() {
        let hasher = hasher();
        let hash = hasher.hash_blocking("pw1".into()).await.unwrap();
        assert!(hasher.verify_blocking("pw1".into(), hash.clone()).await);
        assert!(!hasher.verify_blocking("pw2".into(), hash).await);
    }
}
