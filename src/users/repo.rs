use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::{NewUser, ResetTokenRecord, User, UserPatch};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn list_users(&self) -> anyhow::Result<Vec<User>>;
    async fn create_user(&self, user: NewUser) -> anyhow::Result<User>;
    /// `patch.password` must already hold a hash when set.
    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> anyhow::Result<Option<User>>;
    /// Non-atomic primitive; the reset flow goes through `redeem_reset_token`.
    async fn update_user_credential(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ResetTokenRepository: Send + Sync {
    async fn create_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    async fn get_reset_token(&self, token: &str) -> anyhow::Result<Option<ResetTokenRecord>>;

    /// Returns whether a row was removed. Non-atomic primitive; the reset
    /// flow goes through `redeem_reset_token`.
    async fn delete_reset_token(&self, token: &str) -> anyhow::Result<bool>;

    /// Stores the new credential and then deletes the token as one unit of work.
    ///
    /// Returns `Ok(false)` without touching the credential when the token is
    /// gone or expired at `now`, which is how a concurrent loser observes the
    /// winner. On error nothing is committed and the token stays redeemable.
    async fn redeem_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool>;

    async fn purge_expired_reset_tokens(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

/// Both collaborator contracts, as one object the services can share.
pub trait AccountRepository: UserRepository + ResetTokenRepository {}

impl<T: UserRepository + ResetTokenRepository> AccountRepository for T {}

/// An insert or update collided with another account's email.
#[derive(Debug, thiserror::Error)]
#[error("email already registered")]
pub struct DuplicateEmail;

fn unique_email(err: sqlx::Error, what: &'static str) -> anyhow::Error {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return DuplicateEmail.into();
        }
    }
    anyhow::Error::new(err).context(what)
}

const USER_COLUMNS: &str = "id, full_name, email, password_hash, phone_number, role, created_at";

#[derive(Clone)]
pub struct PgRepository {
    db: PgPool,
}

impl PgRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgRepository {
    async fn get_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("get user by email")?;
        Ok(user)
    }

    async fn get_user_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get user by id")?;
        Ok(user)
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (full_name, email, password_hash, phone_number, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.phone_number)
        .bind(&user.role)
        .fetch_one(&self.db)
        .await
        .map_err(|e| unique_email(e, "insert user"))?;
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, patch: &UserPatch) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET full_name     = COALESCE($2, full_name),
                   email         = COALESCE($3, email),
                   phone_number  = COALESCE($4, phone_number),
                   role          = COALESCE($5, role),
                   password_hash = COALESCE($6, password_hash)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&patch.full_name)
        .bind(&patch.email)
        .bind(&patch.phone_number)
        .bind(&patch.role)
        .bind(&patch.password)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| unique_email(e, "update user"))?;
        Ok(user)
    }

    async fn update_user_credential(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .context("update user credential")?;
        anyhow::ensure!(res.rows_affected() == 1, "user {id} does not exist");
        Ok(())
    }
}

#[async_trait]
impl ResetTokenRepository for PgRepository {
    async fn create_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (token, user_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.db)
        .await
        .context("insert reset token")?;
        Ok(())
    }

    async fn get_reset_token(&self, token: &str) -> anyhow::Result<Option<ResetTokenRecord>> {
        let row = sqlx::query_as::<_, ResetTokenRecord>(
            "SELECT token, user_id, expires_at FROM password_reset_tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await
        .context("get reset token")?;
        Ok(row)
    }

    async fn delete_reset_token(&self, token: &str) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM password_reset_tokens WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await
            .context("delete reset token")?;
        Ok(res.rows_affected() > 0)
    }

    async fn redeem_reset_token(
        &self,
        token: &str,
        user_id: Uuid,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        // Row lock: a concurrent redeemer blocks here and then sees no row.
        let locked: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT user_id
              FROM password_reset_tokens
             WHERE token = $1 AND user_id = $2 AND expires_at > $3
               FOR UPDATE
            "#,
        )
        .bind(token)
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .context("lock reset token")?;

        if locked.is_none() {
            tx.rollback().await.context("rollback tx")?;
            return Ok(false);
        }

        let updated = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&mut *tx)
            .await
            .context("update user credential")?;
        anyhow::ensure!(updated.rows_affected() == 1, "user {user_id} does not exist");

        sqlx::query("DELETE FROM password_reset_tokens WHERE token = $1")
            .bind(token)
            .execute(&mut *tx)
            .await
            .context("delete reset token")?;

        tx.commit().await.context("commit tx")?;
        Ok(true)
    }

    async fn purge_expired_reset_tokens(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.db)
            .await
            .context("purge expired reset tokens")?;
        Ok(res.rows_affected())
    }
}
