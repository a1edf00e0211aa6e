//! The gate pipeline: accepted codes in, status writes and notifications out.

use crate::client::{ClientError, CustodyApi};
use crate::notifier::{Notification, NotifierHandle};
use crate::scanner::{ScanMode, ScannerHandle};
use crate::shutdown::ShutdownSignals;
use models::device::DeviceStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// What a single-shot scan does to the devices it matches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    #[default]
    CheckIn,
    CheckOut,
}

impl GateAction {
    pub fn status(self) -> DeviceStatus {
        match self {
            GateAction::CheckIn => DeviceStatus::InSchool,
            GateAction::CheckOut => DeviceStatus::OutSchool,
        }
    }
}

pub struct Station {
    api: Arc<dyn CustodyApi>,
    notifier: NotifierHandle,
    scanner: ScannerHandle,
    mode: ScanMode,
    action: GateAction,
    rearm: bool,
}

impl Station {
    pub fn new(
        api: Arc<dyn CustodyApi>,
        notifier: NotifierHandle,
        scanner: ScannerHandle,
        mode: ScanMode,
        action: GateAction,
        rearm: bool,
    ) -> Self {
        Self {
            api,
            notifier,
            scanner,
            mode,
            action,
            rearm,
        }
    }

    /// Handles codes in arrival order until the scanner goes away or the
    /// daemon shuts down.
    pub async fn run(self, mut codes: mpsc::Receiver<String>, shutdown: ShutdownSignals) {
        info!("Station running in {:?} mode", self.mode);
        loop {
            tokio::select! {
                code = codes.recv() => match code {
                    Some(code) => self.handle_code(&code).await,
                    None => break,
                },
                _ = shutdown.token.cancelled() => break,
            }
        }
        info!("Station shutting down");
    }

    pub async fn handle_code(&self, code: &str) {
        match self.mode {
            ScanMode::SingleShot => {
                self.apply_action(code).await;
                if self.rearm {
                    if let Err(err) = self.scanner.start(ScanMode::SingleShot).await {
                        error!("Failed to re-arm scanner: {err:#}");
                    }
                }
            }
            ScanMode::Continuous => self.toggle(code).await,
        }
    }

    async fn apply_action(&self, code: &str) {
        let resolution = match self.api.resolve(code).await {
            Ok(resolution) => resolution,
            Err(err) => return self.failed(code, err).await,
        };

        if resolution.devices.is_empty() {
            self.notifier
                .notify(Notification::NotFound {
                    payload: code.to_owned(),
                })
                .await;
            return;
        }

        let status = self.action.status();
        debug!(
            "Applying {status} to {} device(s)",
            resolution.devices.len()
        );
        for device in resolution.devices {
            match self.api.set_status(device.id, status).await {
                Ok(updated) => {
                    self.notifier
                        .notify(Notification::Updated {
                            device: updated,
                            previous: Some(device.status),
                        })
                        .await
                }
                Err(err) => self.failed(&device.serial_number, err).await,
            }
        }
    }

    async fn toggle(&self, code: &str) {
        match self.api.toggle(code).await {
            Ok(outcome) => {
                self.notifier
                    .notify(Notification::Updated {
                        device: outcome.device,
                        previous: Some(outcome.previous),
                    })
                    .await
            }
            Err(ClientError::NotFound(_)) => {
                self.notifier
                    .notify(Notification::NotFound {
                        payload: code.to_owned(),
                    })
                    .await
            }
            Err(err) => self.failed(code, err).await,
        }
    }

    async fn failed(&self, payload: &str, err: ClientError) {
        self.notifier
            .notify(Notification::Failed {
                payload: payload.to_owned(),
                message: err.to_string(),
            })
            .await;
    }
}
