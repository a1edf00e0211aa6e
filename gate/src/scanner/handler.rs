use super::actor::{Actor, ActorMessage};
use super::{ScanMode, Scanner, ScannerState};
use crate::decoder::CodeSource;
use crate::shutdown::ShutdownSignals;
use anyhow::{Result, anyhow};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Clone, Debug)]
pub struct ScannerHandle {
    sender: mpsc::Sender<ActorMessage>,
}

impl std::fmt::Debug for ActorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorMessage::Start { mode, .. } => write!(f, "Start({mode:?})"),
            ActorMessage::Close => f.write_str("Close"),
            ActorMessage::State { .. } => f.write_str("State"),
        }
    }
}

impl ScannerHandle {
    /// Spawns the scanner actor. Accepted codes arrive on the returned
    /// receiver.
    pub fn new(
        shutdown: ShutdownSignals,
        source: Box<dyn CodeSource>,
        sample_interval: Duration,
        debounce_window: Duration,
    ) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(8);
        let (codes_tx, codes_rx) = mpsc::channel(16);
        let scanner = Scanner::new(source, debounce_window);
        let mut actor = Actor::new(shutdown, receiver, codes_tx, scanner, sample_interval);
        tokio::spawn(async move { actor.run().await });

        (Self { sender }, codes_rx)
    }

    pub async fn start(&self, mode: ScanMode) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::Start { mode, result: tx })
            .await
            .map_err(|_| anyhow!("Scanner task is gone"))?;
        rx.await.map_err(|_| anyhow!("Scanner task is gone"))?
    }

    pub async fn close(&self) {
        _ = self.sender.send(ActorMessage::Close).await;
    }

    pub async fn state(&self) -> Result<ScannerState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ActorMessage::State { reply: tx })
            .await
            .map_err(|_| anyhow!("Scanner task is gone"))?;
        rx.await.map_err(|_| anyhow!("Scanner task is gone"))
    }
}
