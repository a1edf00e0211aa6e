//! Surfaces scan outcomes to the operator. The pipeline never blocks on a
//! notification: it hands a message to the notifier actor and moves on.

use crate::shutdown::ShutdownSignals;
use models::device::{DeviceRecord, DeviceStatus};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A status write landed.
    Updated {
        device: DeviceRecord,
        previous: Option<DeviceStatus>,
    },
    NotFound {
        payload: String,
    },
    /// Store or network failure, reported verbatim.
    Failed {
        payload: String,
        message: String,
    },
}

impl Notification {
    pub fn message(&self) -> String {
        match self {
            Notification::Updated {
                device,
                previous: Some(previous),
            } => format!(
                "{} ({}) {} -> {}",
                device.serial_number, device.registration_number, previous, device.status
            ),
            Notification::Updated {
                device,
                previous: None,
            } => format!(
                "{} ({}) is now {}",
                device.serial_number, device.registration_number, device.status
            ),
            Notification::NotFound { payload } => format!("No device found for `{payload}`"),
            Notification::Failed { payload, message } => {
                format!("Scan of `{payload}` failed: {message}")
            }
        }
    }

    fn is_failure(&self) -> bool {
        !matches!(self, Notification::Updated { .. })
    }
}

#[derive(Clone, Debug)]
pub struct NotifierHandle {
    sender: mpsc::Sender<Notification>,
}

impl NotifierHandle {
    pub fn new(shutdown: ShutdownSignals, slack_hook_url: Option<String>) -> Self {
        let (sender, receiver) = mpsc::channel(32);
        let mut actor = Actor::new(shutdown, receiver, slack_hook_url);
        tokio::spawn(async move { actor.run().await });

        Self { sender }
    }

    /// A handle whose notifications are delivered to the returned receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    pub async fn notify(&self, notification: Notification) {
        if self.sender.send(notification).await.is_err() {
            warn!("Notifier is gone, dropping notification");
        }
    }
}

struct Actor {
    shutdown: ShutdownSignals,
    receiver: mpsc::Receiver<Notification>,
    slack_hook_url: Option<String>,
    http: reqwest::Client,
}

impl Actor {
    fn new(
        shutdown: ShutdownSignals,
        receiver: mpsc::Receiver<Notification>,
        slack_hook_url: Option<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            shutdown,
            receiver,
            slack_hook_url,
            http,
        }
    }

    async fn handle(&self, notification: Notification) {
        let message = notification.message();
        if !notification.is_failure() {
            info!("{message}");
            return;
        }

        warn!("{message}");
        if let Some(url) = &self.slack_hook_url {
            send_slack_notification(&self.http, url, json!({ "text": message })).await;
        }
    }

    async fn run(&mut self) {
        info!("Notifier task is running");
        loop {
            tokio::select! {
                Some(notification) = self.receiver.recv() => {
                    self.handle(notification).await;
                }
                _ = self.shutdown.token.cancelled() => {
                    break;
                }
                else => break,
            }
        }
        info!("Notifier task shutting down");
    }
}

async fn send_slack_notification(client: &reqwest::Client, slack_hook_url: &str, message: Value) {
    if let Err(e) = client
        .post(slack_hook_url)
        .header("Content-Type", "application/json")
        .json(&message)
        .send()
        .await
        .and_then(|response| response.error_for_status())
    {
        error!("Failed to send Slack notification: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn device() -> DeviceRecord {
        DeviceRecord {
            id: 1,
            serial_number: "X1".into(),
            model: None,
            owner_id: 1,
            registration_number: "R1".into(),
            status: DeviceStatus::InSchool,
            last_verified_at: Some(Utc::now()),
            last_scanned_by: Some(2),
            sn_mismatch: false,
            created_on: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn test_messages() {
        let toggled = Notification::Updated {
            device: device(),
            previous: Some(DeviceStatus::OutSchool),
        };
        assert_eq!(toggled.message(), "X1 (R1) out_school -> in_school");

        let missing = Notification::NotFound {
            payload: "X9".into(),
        };
        assert_eq!(missing.message(), "No device found for `X9`");
        assert!(missing.is_failure());
    }

    #[tokio::test]
    async fn test_failures_are_forwarded_to_slack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "text": "No device found for `X9`" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let shutdown = ShutdownSignals::new();
        let notifier = NotifierHandle::new(shutdown.clone(), Some(server.uri()));
        notifier
            .notify(Notification::Updated {
                device: device(),
                previous: None,
            })
            .await;
        notifier
            .notify(Notification::NotFound {
                payload: "X9".into(),
            })
            .await;

        for _ in 0..50 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.token.cancel();
        // the mock verifies exactly one request when the server drops
    }
}
