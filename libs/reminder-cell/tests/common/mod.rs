#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reminder_cell::{ChannelSender, DeliveryError, NotificationDispatcher, NotificationMessage};
use shared_models::NotificationChannel;
use shared_utils::test_utils::{TestClinic, TestConfig};

/// Records every message it is asked to send.
pub struct RecordingSender {
    channel: NotificationChannel,
    fail_with: Option<String>,
    delay: Option<Duration>,
    sent: Mutex<Vec<(String, NotificationMessage)>>,
}

impl RecordingSender {
    pub fn new(channel: NotificationChannel) -> Self {
        Self {
            channel,
            fail_with: None,
            delay: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(channel: NotificationChannel, error: &str) -> Self {
        Self {
            fail_with: Some(error.to_string()),
            ..Self::new(channel)
        }
    }

    pub fn slow(channel: NotificationChannel, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(channel)
        }
    }

    pub fn sent(&self) -> Vec<(String, NotificationMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    fn channel(&self) -> NotificationChannel {
        self.channel
    }

    async fn send(&self, recipient: &str, message: &NotificationMessage) -> Result<(), DeliveryError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.clone()));

        match &self.fail_with {
            Some(error) => Err(DeliveryError::ConnectionFailed(error.clone())),
            None => Ok(()),
        }
    }
}

pub struct Harness {
    pub clinic: TestClinic,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub email: Arc<RecordingSender>,
    pub sms: Arc<RecordingSender>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_senders(
            RecordingSender::new(NotificationChannel::Email),
            RecordingSender::new(NotificationChannel::Sms),
        )
        .await
    }

    pub async fn with_senders(email: RecordingSender, sms: RecordingSender) -> Self {
        let clinic = TestClinic::seeded().await;
        let email = Arc::new(email);
        let sms = Arc::new(sms);

        let config = TestConfig::default().to_app_config();
        let dispatcher = NotificationDispatcher::new(clinic.store.clone(), &config)
            .with_sender(email.clone())
            .with_sender(sms.clone());

        Self {
            clinic,
            dispatcher: Arc::new(dispatcher),
            email,
            sms,
        }
    }
}
