use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

use super::{DeploymentEvent, NotificationChannel, SendResult};
use crate::config::SmtpConfig;

/// Plain-text mail to a fixed recipient list
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    recipients: Vec<String>,
}

impl EmailChannel {
    pub fn from_config(config: &SmtpConfig, recipients: Vec<String>) -> Result<Self, String> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let transport = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| format!("Failed to create SMTP transport: {}", e))?
                .port(config.port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .credentials(creds)
                .build()
        };

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
            recipients,
        })
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> SendResult {
        let from = format!("Dockyard <{}>", self.from_address);

        let to_mailbox = match to.parse() {
            Ok(mbox) => mbox,
            Err(_) => return SendResult::failed(format!("Invalid recipient address: {}", to)),
        };

        let from_mailbox = match from.parse() {
            Ok(mbox) => mbox,
            Err(_) => match self.from_address.parse() {
                Ok(mbox) => mbox,
                Err(_) => return SendResult::failed("Invalid from address"),
            },
        };

        let email = match Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
        {
            Ok(email) => email,
            Err(e) => return SendResult::failed(format!("Failed to build email: {}", e)),
        };

        match self.transport.send(email).await {
            Ok(_) => SendResult::ok(),
            Err(e) => SendResult::failed(format!("Failed to send email: {}", e)),
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, event: &DeploymentEvent) -> SendResult {
        let subject = event.title();
        let body = format!("{}\n\n---\nSent by Dockyard", event.body());

        let mut errors = Vec::new();
        for recipient in &self.recipients {
            let result = self.send_email(recipient, &subject, &body).await;
            if let Some(error) = result.error {
                errors.push(error);
            }
        }

        if errors.is_empty() {
            SendResult::ok()
        } else {
            SendResult::failed(errors.join("; "))
        }
    }
}
