use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::info;

use shared_config::AppConfig;
use shared_models::NotificationChannel;

use crate::error::DeliveryError;
use crate::models::NotificationMessage;

/// A delivery medium. One implementation per channel is registered with
/// the dispatcher.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> NotificationChannel;

    async fn send(&self, recipient: &str, message: &NotificationMessage) -> Result<(), DeliveryError>;
}

pub struct SmtpEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpEmailSender {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: &str,
        password: &str,
        from_address: &str,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let builder = match smtp_port {
            465 => AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host),
            587 => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host),
            _ => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)),
        }
        .map_err(|e: lettre::transport::smtp::Error| DeliveryError::ConnectionFailed(e.to_string()))?
        .port(smtp_port)
        .timeout(Some(timeout));

        let builder = if username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(username.to_string(), password.to_string()))
        };

        Ok(Self {
            mailer: builder.build(),
            from_address: from_address.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, DeliveryError> {
        Self::new(
            &config.smtp_host,
            config.smtp_port,
            &config.smtp_username,
            &config.smtp_password,
            &config.smtp_from_address,
            Duration::from_secs(config.notification_send_timeout_seconds),
        )
    }
}

#[async_trait]
impl ChannelSender for SmtpEmailSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    async fn send(&self, recipient: &str, message: &NotificationMessage) -> Result<(), DeliveryError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|e: lettre::address::AddressError| {
                        DeliveryError::InvalidAddress(format!("from address: {}", e))
                    })?,
            )
            .to(recipient.parse().map_err(|e: lettre::address::AddressError| {
                DeliveryError::InvalidAddress(format!("{}: {}", recipient, e))
            })?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| DeliveryError::Other(format!("failed to build email: {}", e)))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e: lettre::transport::smtp::Error| DeliveryError::ConnectionFailed(e.to_string()))?;

        info!("Email sent to {}", recipient);
        Ok(())
    }
}

/// Accepts messages for channels without a real transport yet (SMS,
/// WhatsApp). The attempt is still logged by the dispatcher.
pub struct LoggingSender {
    channel: NotificationChannel,
}

impl LoggingSender {
    pub fn new(channel: NotificationChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LoggingSender {
    fn channel(&self) -> NotificationChannel {
        self.channel
    }

    async fn send(&self, recipient: &str, message: &NotificationMessage) -> Result<(), DeliveryError> {
        info!(
            "{} delivery not implemented, accepted notification {:?} for {}",
            self.channel, message.subject, recipient
        );
        Ok(())
    }
}
