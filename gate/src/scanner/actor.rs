use super::{ScanMode, Scanner, ScannerState};
use crate::shutdown::ShutdownSignals;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info};

pub enum ActorMessage {
    Start {
        mode: ScanMode,
        result: oneshot::Sender<Result<()>>,
    },
    Close,
    State {
        reply: oneshot::Sender<ScannerState>,
    },
}

// Scanner actor
pub struct Actor {
    shutdown: ShutdownSignals,
    receiver: mpsc::Receiver<ActorMessage>,
    codes: mpsc::Sender<String>,
    scanner: Scanner,
    sample_interval: Duration,
}

impl Actor {
    pub fn new(
        shutdown: ShutdownSignals,
        receiver: mpsc::Receiver<ActorMessage>,
        codes: mpsc::Sender<String>,
        scanner: Scanner,
        sample_interval: Duration,
    ) -> Self {
        Self {
            shutdown,
            receiver,
            codes,
            scanner,
            sample_interval,
        }
    }

    fn is_detecting(&self) -> bool {
        matches!(self.scanner.state(), ScannerState::Detecting(_))
    }

    async fn handle_message(&mut self, msg: ActorMessage) {
        match msg {
            ActorMessage::Start { mode, result } => {
                let started = self.scanner.start(mode).await;
                if let Err(err) = &started {
                    error!("Failed to start scanner: {err:#}");
                    self.scanner.close();
                }
                _ = result.send(started);
            }
            ActorMessage::Close => {
                info!("Closing scanner");
                self.scanner.close();
            }
            ActorMessage::State { reply } => {
                _ = reply.send(self.scanner.state());
            }
        }
    }

    async fn sample(&mut self) {
        match self.scanner.sample(Instant::now()).await {
            Ok(Some(code)) => {
                if self.codes.send(code).await.is_err() {
                    info!("Nobody is consuming scanned codes, closing scanner");
                    self.scanner.close();
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!("Failed to decode frame: {err:#}");
                self.scanner.close();
            }
        }
    }

    pub async fn run(&mut self) {
        info!("Scanner task is running");

        let mut ticker = time::interval(self.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let detecting = self.is_detecting();
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
                _ = ticker.tick(), if detecting => {
                    self.sample().await;
                }
                _ = self.shutdown.token.cancelled() => {
                    break;
                }
            }
        }

        self.scanner.close();
        info!("Scanner task shutting down");
    }
}
