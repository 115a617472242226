use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::auth::services::AuthFlow;
use crate::config::AppConfig;
use crate::notify::{LogNotifier, Notifier, SmtpNotifier};
use crate::users::repo::{AccountRepository, PgRepository};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn AccountRepository>,
    pub auth: Arc<AuthFlow>,
}

impl AppState {
    /// Connects to Postgres and wires the services. Returns the pool as well so
    /// the caller can run migrations on it.
    pub async fn init() -> anyhow::Result<(Self, PgPool)> {
        let config = AppConfig::from_env()?;

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let notifier: Arc<dyn Notifier> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
            None => {
                tracing::warn!("SMTP_HOST not set; reset emails will only be logged");
                Arc::new(LogNotifier)
            }
        };

        let repo = Arc::new(PgRepository::new(db.clone())) as Arc<dyn AccountRepository>;
        Ok((Self::from_parts(&config, repo, notifier)?, db))
    }

    pub fn from_parts(
        config: &AppConfig,
        repo: Arc<dyn AccountRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let auth = AuthFlow::new(config, repo.clone(), notifier).context("build auth flow")?;
        Ok(Self {
            repo,
            auth: Arc::new(auth),
        })
    }
}
