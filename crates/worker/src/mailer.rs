//! Report delivery over SMTP.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use pipeline_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Sends a plain-text message to the configured recipient.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default = "default_to")]
    pub to: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1025
}

fn default_from() -> String {
    "georeport@localhost".to_string()
}

fn default_to() -> String {
    "reports@localhost".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            from: default_from(),
            to: default_to(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| Error::config(format!("invalid mail address {address:?}: {e}")))
}

/// Builds the report email.
pub fn build_message(from: &Mailbox, to: &Mailbox, subject: &str, body: &str) -> Result<Message> {
    Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| Error::internal(format!("failed to build email: {e}")))
}

/// Mailer relaying through an SMTP server without TLS, as a local relay
/// such as MailHog expects.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    relay: String,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: mailbox(&config.from)?,
            to: mailbox(&config.to)?,
            relay: format!("{}:{}", config.host, config.port),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = build_message(&self.from, &self.to, subject, body)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::downstream(format!("SMTP relay {} failed: {e}", self.relay)))?;

        debug!(relay = %self.relay, to = %self.to, subject = %subject, "Sent email");
        Ok(())
    }
}
