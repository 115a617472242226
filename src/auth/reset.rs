use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use super::password::PasswordHasher;
use crate::{error::AuthError, users::repo::AccountRepository};

const TOKEN_BYTES: usize = 32;

/// Opaque single-use password reset tokens.
///
/// A token is `Created` until it is either redeemed (the row is deleted in the
/// same unit of work that stores the new credential) or its expiry passes, after
/// which it is inert until purged.
#[derive(Clone)]
pub struct ResetTokenStore {
    repo: Arc<dyn AccountRepository>,
    hasher: PasswordHasher,
    ttl: Duration,
}

impl ResetTokenStore {
    pub fn new(repo: Arc<dyn AccountRepository>, hasher: PasswordHasher, ttl: Duration) -> Self {
        Self { repo, hasher, ttl }
    }

    pub async fn generate(&self, email: &str) -> Result<String, AuthError> {
        let user = self
            .repo
            .get_user_by_email(email)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::UserNotFound)?;

        let token = random_token();
        let expires_at = OffsetDateTime::now_utc() + self.ttl;
        self.repo
            .create_reset_token(&token, user.id, expires_at)
            .await
            .map_err(AuthError::Storage)?;

        info!(user_id = %user.id, %expires_at, "reset token created");
        Ok(token)
    }

    pub async fn consume(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let record = self
            .repo
            .get_reset_token(token)
            .await
            .map_err(AuthError::Storage)?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        if record.is_expired(OffsetDateTime::now_utc()) {
            debug!(user_id = %record.user_id, "reset token expired");
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let hash = self.hasher.hash_blocking(new_password.to_string()).await?;

        // Re-checked under the repository's lock; the loser of a race sees `false`.
        let redeemed = self
            .repo
            .redeem_reset_token(token, record.user_id, &hash, OffsetDateTime::now_utc())
            .await
            .map_err(AuthError::Storage)?;
        if !redeemed {
            warn!(user_id = %record.user_id, "reset token already redeemed or expired");
            return Err(AuthError::InvalidOrExpiredToken);
        }

        info!(user_id = %record.user_id, "password reset completed");
        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<u64, AuthError> {
        let purged = self
            .repo
            .purge_expired_reset_tokens(OffsetDateTime::now_utc())
            .await
            .map_err(AuthError::Storage)?;
        if purged > 0 {
            info!(purged, "expired reset tokens removed");
        }
        Ok(purged)
    }
}

/// 256 bits from the OS RNG, hex encoded.
pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::users::{
        memory::MemoryRepository,
        repo::{ResetTokenRepository, UserRepository},
        repo_types::NewUser,
    };
    use uuid::Uuid;

    struct Fixture {
        repo: Arc<MemoryRepository>,
        store: ResetTokenStore,
        hasher: PasswordHasher,
        user_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(MemoryRepository::new());
        let hasher = PasswordHasher::new(&AppConfig::for_tests().hash).unwrap();
        let user = repo
            .create_user(NewUser {
                full_name: "A".into(),
                email: "a@x.com".into(),
                password_hash: hasher.hash("pw1").unwrap(),
                phone_number: None,
                role: "user".into(),
            })
            .await
            .unwrap();
        let store = ResetTokenStore::new(repo.clone(), hasher.clone(), Duration::minutes(15));
        Fixture { repo, store, hasher, user_id: user.id }
    }

    async fn stored_hash(f: &Fixture) -> String {
        f.repo.get_user_by_id(f.user_id).await.unwrap().unwrap().password_hash
    }

    #[test]
    fn tokens_are_256_bit_hex() {
        let t = random_token();
        assert_eq!(t.len(), 64);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(t, random_token());
    }

    #[tokio::test]
    async fn generate_persists_token_with_fifteen_minute_expiry() {
        let f = fixture().await;
        let before = OffsetDateTime::now_utc();
        let token = f.store.generate("a@x.com").await.unwrap();

        let rec = f.repo.get_reset_token(&token).await.unwrap().expect("persisted");
        assert_eq!(rec.user_id, f.user_id);
        let ttl = rec.expires_at - before;
        assert!(ttl >= Duration::minutes(15) && ttl < Duration::minutes(15) + Duration::seconds(5));
    }

    #[tokio::test]
    async fn generate_for_unknown_email_persists_nothing() {
        let f = fixture().await;
        let err = f.store.generate("nobody@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
        assert_eq!(f.repo.reset_token_count().await, 0);
    }

    #[tokio::test]
    async fn consume_succeeds_exactly_once() {
        let f = fixture().await;
        let token = f.store.generate("a@x.com").await.unwrap();

        f.store.consume(&token, "pw2").await.expect("first consume");
        assert!(f.hasher.verify("pw2", &stored_hash(&f).await));
        assert_eq!(f.repo.reset_token_count().await, 0);

        let err = f.store.consume(&token, "pw3").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
        assert!(f.hasher.verify("pw2", &stored_hash(&f).await));
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let f = fixture().await;
        let err = f.store.consume("deadbeef", "pw2").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn expired_token_is_rejected_and_credential_untouched() {
        let f = fixture().await;
        let past = OffsetDateTime::now_utc() - Duration::seconds(1);
        f.repo.create_reset_token("stale", f.user_id, past).await.unwrap();

        let err = f.store.consume("stale", "pw2").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
        assert!(f.hasher.verify("pw1", &stored_hash(&f).await));
    }

    #[tokio::test]
    async fn failed_credential_update_keeps_token_for_retry() {
        let f = fixture().await;
        let token = f.store.generate("a@x.com").await.unwrap();

        f.repo.set_fail_credential_updates(true);
        let err = f.store.consume(&token, "pw2").await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));
        assert!(f.repo.get_reset_token(&token).await.unwrap().is_some());

        f.repo.set_fail_credential_updates(false);
        f.store.consume(&token, "pw2").await.expect("retry succeeds");
        assert!(f.hasher.verify("pw2", &stored_hash(&f).await));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumes_have_one_winner() {
        let f = fixture().await;
        let token = f.store.generate("a@x.com").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = f.store.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                store.consume(&token, &format!("pw-{i}")).await
            }));
        }

        let mut wins = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(()) => wins += 1,
                Err(AuthError::InvalidOrExpiredToken) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn purge_expired_drops_dead_tokens() {
        let f = fixture().await;
        let past = OffsetDateTime::now_utc() - Duration::minutes(1);
        f.repo.create_reset_token("stale", f.user_id, past).await.unwrap();
        let live = f.store.generate("a@x.com").await.unwrap();

        assert_eq!(f.store.purge_expired().await.unwrap(), 1);
        assert!(f.repo.get_reset_token(&live).await.unwrap().is_some());
    }
}
