use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{EmailGateway, OutgoingEmail},
    config::{Config, SmtpSecurity},
};

pub struct SmtpClient {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    message_id_domain: String,
}

impl SmtpClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let builder = match config.smtp_security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| anyhow!("Invalid SMTP relay {}: {}", config.smtp_host, e))?,
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                    .map_err(|e| anyhow!("Invalid SMTP relay {}: {}", config.smtp_host, e))?
            }
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
            }
        };

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(config.smtp_timeout()));

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from: Mailbox = config
            .from_address()
            .parse()
            .map_err(|e| anyhow!("Invalid sender address: {}", e))?;

        let message_id_domain = from.email.domain().to_string();

        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            security = ?config.smtp_security,
            "SMTP client initialized"
        );

        Ok(Self {
            mailer: builder.build(),
            from,
            message_id_domain,
        })
    }

    /// Checks that the relay accepts connections. Failure is reported, not
    /// fatal: the worker keeps consuming and records delivery failures.
    pub async fn verify(&self) -> bool {
        match self.mailer.test_connection().await {
            Ok(true) => {
                info!("SMTP connection verified");
                true
            }
            Ok(false) => {
                warn!("SMTP server did not accept the test connection");
                false
            }
            Err(e) => {
                warn!(error = %e, "SMTP connection verification failed");
                false
            }
        }
    }
}

#[async_trait]
impl EmailGateway for SmtpClient {
    async fn send(&self, email: &OutgoingEmail) -> Result<String> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| anyhow!("Invalid recipient address '{}': {}", email.to, e))?;

        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.message_id_domain);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|e| anyhow!("Failed to build email: {}", e))?;

        let response = self
            .mailer
            .send(message)
            .await
            .map_err(|e| anyhow!("SMTP send failed: {}", e))?;

        debug!(
            message_id = %message_id,
            code = %response.code(),
            "SMTP server accepted message"
        );

        Ok(message_id)
    }
}
