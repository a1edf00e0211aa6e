//! Decoder adapter: drives a [`CodeSource`] through
//! `idle -> detecting -> suspended | continuous`.

use crate::decoder::{CodeSource, Debouncer};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

mod actor;
mod handler;

pub use handler::ScannerHandle;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Emit the first accepted code, then suspend and release the source.
    #[default]
    SingleShot,
    /// Emit every accepted code until closed.
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    Idle,
    Detecting(ScanMode),
    Suspended,
}

pub struct Scanner {
    source: Box<dyn CodeSource>,
    debouncer: Debouncer,
    state: ScannerState,
}

impl Scanner {
    pub fn new(source: Box<dyn CodeSource>, debounce_window: Duration) -> Self {
        Self {
            source,
            debouncer: Debouncer::new(debounce_window),
            state: ScannerState::Idle,
        }
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    /// Acquires the source and starts detecting. Restarting while detecting
    /// only switches the mode.
    pub async fn start(&mut self, mode: ScanMode) -> Result<()> {
        if !matches!(self.state, ScannerState::Detecting(_)) {
            self.source.acquire().await?;
            self.debouncer.reset();
        }
        info!("Scanner detecting in {mode:?} mode");
        self.state = ScannerState::Detecting(mode);
        Ok(())
    }

    /// Samples the source once. Returns the code when it passes the debounce
    /// rule; in single-shot mode that also suspends the scanner.
    pub async fn sample(&mut self, now: Instant) -> Result<Option<String>> {
        let ScannerState::Detecting(mode) = self.state else {
            return Ok(None);
        };

        let Some(code) = self.source.decode_frame().await? else {
            return Ok(None);
        };

        if !self.debouncer.accept(&code, now) {
            debug!("Debounced repeated code");
            return Ok(None);
        }

        if mode == ScanMode::SingleShot {
            self.source.release();
            self.state = ScannerState::Suspended;
            debug!("Scanner suspended after single-shot match");
        }

        Ok(Some(code))
    }

    /// Releases the source from any state.
    pub fn close(&mut self) {
        self.source.release();
        self.state = ScannerState::Idle;
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.source.release();
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Replays scripted frames; `None` frames are samples with nothing in view.
    #[derive(Clone, Default)]
    pub struct FakeSource {
        frames: Arc<Mutex<VecDeque<Option<String>>>>,
        pub acquired: Arc<AtomicBool>,
        pub releases: Arc<AtomicUsize>,
        pub decodes: Arc<AtomicUsize>,
    }

    impl FakeSource {
        pub fn new<'a>(frames: impl IntoIterator<Item = Option<&'a str>>) -> Self {
            let source = Self::default();
            source.push(frames);
            source
        }

        pub fn push<'a>(&self, frames: impl IntoIterator<Item = Option<&'a str>>) {
            self.frames
                .lock()
                .unwrap()
                .extend(frames.into_iter().map(|frame| frame.map(str::to_owned)));
        }

        pub fn is_acquired(&self) -> bool {
            self.acquired.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CodeSource for FakeSource {
        async fn acquire(&mut self) -> Result<()> {
            self.acquired.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn decode_frame(&mut self) -> Result<Option<String>> {
            assert!(self.is_acquired(), "decoding from a released source");
            self.decodes.fetch_add(1, Ordering::SeqCst);
            Ok(self.frames.lock().unwrap().pop_front().flatten())
        }

        fn release(&mut self) {
            if self.acquired.swap(false, Ordering::SeqCst) {
                self.releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
