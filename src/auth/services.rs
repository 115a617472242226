use std::sync::Arc;

use time::Duration;
use tracing::{info, instrument, warn};

use super::{
    jwt::TokenSigner,
    password::PasswordHasher,
    reset::{random_token, ResetTokenStore},
};
use crate::{
    config::AppConfig,
    error::AuthError,
    notify::{reset_email_body, Notifier},
    users::{
        repo::AccountRepository,
        repo_types::{is_valid_email, normalize_email, NewUser, User, DEFAULT_ROLE},
    },
};

pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub phone_number: Option<String>,
}

pub struct LoginOutcome {
    pub token: String,
    pub user: User,
}

/// Orchestrates registration, login and the password-reset workflow.
pub struct AuthFlow {
    repo: Arc<dyn AccountRepository>,
    hasher: PasswordHasher,
    signer: TokenSigner,
    resets: ResetTokenStore,
    notifier: Arc<dyn Notifier>,
    frontend_url: String,
    /// Verified against when the email is unknown, so both login failures
    /// pay the same Argon2 cost.
    dummy_hash: String,
}

impl AuthFlow {
    pub fn new(
        config: &AppConfig,
        repo: Arc<dyn AccountRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AuthError> {
        if config.reset_ttl_minutes <= 0 {
            return Err(AuthError::validation("reset token ttl must be positive"));
        }
        let hasher = PasswordHasher::new(&config.hash)?;
        let signer = TokenSigner::new(&config.jwt)?;
        let dummy_hash = hasher.hash(&random_token())?;
        let resets = ResetTokenStore::new(
            repo.clone(),
            hasher.clone(),
            Duration::minutes(config.reset_ttl_minutes),
        );
        Ok(Self {
            repo,
            hasher,
            signer,
            resets,
            notifier,
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            dummy_hash,
        })
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub fn resets(&self) -> &ResetTokenStore {
        &self.resets
    }

    /// No password-strength rule is applied here or on reset.
    #[instrument(skip(self, reg), fields(email = %reg.email))]
    pub async fn register(&self, reg: Registration) -> Result<User, AuthError> {
        let email = normalize_email(&reg.email);
        if !is_valid_email(&email) {
            return Err(AuthError::validation("Invalid email"));
        }
        let full_name = reg.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(AuthError::validation("Full name is required"));
        }
        if reg.password.is_empty() {
            return Err(AuthError::validation("Password is required"));
        }

        if self
            .repo
            .get_user_by_email(&email)
            .await
            .map_err(AuthError::Storage)?
            .is_some()
        {
            warn!(%email, "email already registered");
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hasher.hash_blocking(reg.password).await?;
        let user = self
            .repo
            .create_user(NewUser {
                full_name,
                email,
                password_hash,
                phone_number: reg.phone_number,
                role: DEFAULT_ROLE.to_string(),
            })
            .await
            .map_err(AuthError::storage)?;

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = normalize_email(email);
        let user = self
            .repo
            .get_user_by_email(&email)
            .await
            .map_err(AuthError::Storage)?;

        let stored = match &user {
            Some(u) => u.password_hash.clone(),
            None => self.dummy_hash.clone(),
        };
        let password_ok = self
            .hasher
            .verify_blocking(password.to_string(), stored)
            .await;

        let user = match user {
            Some(u) if password_ok => u,
            Some(u) => {
                warn!(user_id = %u.id, "login invalid password");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                warn!(%email, "login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let token = self.signer.issue(user.id, &user.email, &user.role)?;
        info!(user_id = %user.id, "user logged in");
        Ok(LoginOutcome { token, user })
    }

    /// The token is persisted before delivery is attempted, so a delivery
    /// failure still leaves a redeemable token behind.
    #[instrument(skip(self))]
    pub async fn request_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let token = self.resets.generate(&email).await?;
        let link = format!("{}/reset-password?token={}", self.frontend_url, token);

        self.notifier
            .send(&email, "Reset Your Password", &reset_email_body(&link))
            .await
            .map_err(AuthError::Notification)?;
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn complete_reset(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        self.resets.consume(token, new_password).await
    }
}
