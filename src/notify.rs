use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

/// Outbound notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> anyhow::Result<()>;
}

/// Delivers mail through an SMTP relay using STARTTLS.
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = cfg
            .from
            .parse()
            .with_context(|| format!("invalid from address {}", cfg.from))?;
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("build smtp transport")?
            .port(cfg.port)
            .timeout(Some(std::time::Duration::from_secs(10)));
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.username.clone(),
                cfg.password.clone(),
            ));
        }
        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, to: &str, subject: &str, body_html: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().with_context(|| format!("invalid to address {to}"))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body_html.to_string())
            .context("build email")?;
        self.mailer.send(message).await.context("smtp send")?;
        info!(%to, %subject, "email sent");
        Ok(())
    }
}

/// Used when no SMTP relay is configured. The body carries a live reset link,
/// so only the envelope is logged.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, to: &str, subject: &str, _body_html: &str) -> anyhow::Result<()> {
        info!(%to, %subject, "smtp not configured; email not delivered");
        Ok(())
    }
}

pub fn reset_email_body(reset_link: &str) -> String {
    format!(
        "<p>We received a request to reset your password.</p>\
         <p><a href=\"{reset_link}\">Reset your password</a></p>\
         <p>This link expires shortly and can be used once. \
         If you did not ask for a reset, you can ignore this email.</p>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_body_embeds_link() {
        let body = reset_email_body("http://localhost:3000/reset-password?token=abc");
        assert!(body.contains("href=\"http://localhost:3000/reset-password?token=abc\""));
    }

    #[test]
    fn smtp_notifier_rejects_bad_sender() {
        let cfg = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from: "not an address".into(),
        };
        assert!(SmtpNotifier::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        LogNotifier
            .send("a@x.com", "Reset Your Password", "<p>hi</p>")
            .await
            .unwrap();
    }
}
