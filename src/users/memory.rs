use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo::{DuplicateEmail, ResetTokenRepository, UserRepository};
use super::repo_types::{NewUser, ResetTokenRecord, User, UserPatch};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    reset_tokens: HashMap<String, ResetTokenRecord>,
}

/// In-process repository. One lock guards both tables, so a redemption is
/// atomic with respect to every other call.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    fail_credential_updates: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes credential writes fail, to exercise storage-error paths.
    pub fn set_fail_credential_updates(&self, fail: bool) {
        self.fail_credential_updates.store(fail, Ordering::SeqCst);
    }

    pub async fn reset_token_count(&self) -> usize {
        self.tables.lock().await.reset_tokens.len()
    }

    fn check_credential_write(&self) -> anyhow::Result<()> {
        if self.fail_credential_updates.load(Ordering::SeqCst) {
            anyhow::bail!("credential update rejected by storage");
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryRepository {
    async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let tables = self.tables.lock().await;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> anyhow::Result<User> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(DuplicateEmail.into());
        }
        let user = User {
            id: Uuid::new_v4(),
            full_name: user.full_name,
            email: user.email,
            password_hash: user.password_hash,
            phone_number: user.phone_number,
            role: user.role,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> anyhow::Result<Option<User>> {
        let mut tables = self.tables.lock().await;
        if let Some(email) = &patch.email {
            if tables.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(DuplicateEmail.into());
            }
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = &patch.full_name {
            user.full_name = v.clone();
        }
        if let Some(v) = &patch.email {
            user.email = v.clone();
        }
        if let Some(v) = &patch.phone_number {
            user.phone_number = Some(v.clone());
        }
        if let Some(v) = &patch.role {
            user.role = v.clone();
        }
        if let Some(v) = &patch.password {
            user.password_hash = v.clone();
        }
        Ok(Some(user.clone()))
    }

    async fn update_user_credential(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        self.check_credential_write()?;
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("user {id} does not exist"))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }
}

#[async_trait]
impl ResetTokenRepository for MemoryRepository {
    async fn create_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        anyhow::ensure!(
            !tables.reset_tokens.contains_key(token),
            "duplicate reset token"
        );
        tables.reset_tokens.insert(
            token.to_string(),
            ResetTokenRecord {
                token: token.to_string(),
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_reset_token(&self, token: &str) -> anyhow::Result<Option<ResetTokenRecord>> {
        Ok(self.tables.lock().await.reset_tokens.get(token).cloned())
    }

    async fn delete_reset_token(&self, token: &str) -> anyhow::Result<bool> {
        Ok(self.tables.lock().await.reset_tokens.remove(token).is_some())
    }

    async fn redeem_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut tables = self.tables.lock().await;
        let live = matches!(
            tables.reset_tokens.get(token),
            Some(rec) if rec.user_id == user_id && !rec.is_expired(now)
        );
        if !live {
            return Ok(false);
        }

        self.check_credential_write()?;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow::anyhow!("user {user_id} does not exist"))?;
        user.password_hash = password_hash.to_string();

        tables.reset_tokens.remove(token);
        Ok(true)
    }

    async fn purge_expired_reset_tokens(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.reset_tokens.len();
        tables.reset_tokens.retain(|_, rec| !rec.is_expired(now));
        Ok((before - tables.reset_tokens.len()) as u64)
    }
}
