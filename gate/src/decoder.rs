//! Code sources and the debounce rule applied to what they decode.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Something that can be sampled for decoded codes, e.g. a barcode reader.
#[async_trait]
pub trait CodeSource: Send {
    async fn acquire(&mut self) -> Result<()>;

    /// The code currently in front of the reader, if any.
    async fn decode_frame(&mut self) -> Result<Option<String>>;

    /// Must be safe to call in any state, any number of times.
    fn release(&mut self);
}

/// Drops a decode identical to the previous one seen within `window`. Every
/// identical decode refreshes the window, so a code that stays in front of
/// the reader is accepted once.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn accept(&mut self, code: &str, now: Instant) -> bool {
        let accepted = match &self.last {
            Some((previous, seen)) => {
                previous != code || now.saturating_duration_since(*seen) >= self.window
            }
            None => true,
        };
        self.last = Some((code.to_owned(), now));
        accepted
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Line-oriented readers: keyboard-wedge and serial barcode scanners emit one
/// code per line.
///
/// The input is opened on the first `acquire` and owned until the source is
/// dropped. A blocking read cannot be cancelled, so `release` only stops
/// delivery and lines read while released are discarded.
#[derive(Debug)]
pub struct LineSource {
    path: Option<PathBuf>,
    lines: Option<mpsc::UnboundedReceiver<String>>,
    delivering: Arc<AtomicBool>,
}

impl LineSource {
    /// Reads from `path`, or stdin when `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            lines: None,
            delivering: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn open(&self) -> Result<mpsc::UnboundedReceiver<String>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let delivering = self.delivering.clone();
        match &self.path {
            Some(path) => {
                // opening a FIFO blocks until a writer shows up
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?
                    .into_std()
                    .await;
                Self::spawn_reader(file, sender, delivering)?;
            }
            None => Self::spawn_reader(std::io::stdin(), sender, delivering)?,
        }
        Ok(receiver)
    }

    fn spawn_reader<R>(
        input: R,
        sender: mpsc::UnboundedSender<String>,
        delivering: Arc<AtomicBool>,
    ) -> Result<()>
    where
        R: Read + Send + 'static,
    {
        std::thread::Builder::new()
            .name("code-reader".into())
            .spawn(move || {
                for line in BufReader::new(input).lines() {
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            error!("Failed to read from code source: {err}");
                            return;
                        }
                    };
                    let code = line.trim_end_matches(['\r', '\0']);
                    if code.is_empty() || !delivering.load(Ordering::Acquire) {
                        continue;
                    }
                    if sender.send(code.to_owned()).is_err() {
                        return;
                    }
                }
                info!("Code source reached end of input");
            })
            .context("failed to start code reader thread")?;
        Ok(())
    }
}

#[async_trait]
impl CodeSource for LineSource {
    async fn acquire(&mut self) -> Result<()> {
        if self.lines.is_some() && self.delivering.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.lines.as_mut() {
            Some(lines) => {
                let mut stale = 0;
                while lines.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!("Dropped {stale} codes read while released");
                }
            }
            None => {
                // the reader starts delivering as soon as it is spawned
                self.delivering.store(true, Ordering::Release);
                match self.open().await {
                    Ok(lines) => self.lines = Some(lines),
                    Err(err) => {
                        self.delivering.store(false, Ordering::Release);
                        return Err(err);
                    }
                }
            }
        }

        self.delivering.store(true, Ordering::Release);
        debug!("Acquired code source {:?}", self.path);
        Ok(())
    }

    async fn decode_frame(&mut self) -> Result<Option<String>> {
        if !self.delivering.load(Ordering::Acquire) {
            return Ok(None);
        }
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        match lines.try_recv() {
            Ok(code) => Ok(Some(code)),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn release(&mut self) {
        if self.delivering.swap(false, Ordering::AcqRel) {
            debug!("Released code source {:?}", self.path);
        }
    }
}

impl Drop for LineSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn next_code(source: &mut LineSource) -> Option<String> {
        for _ in 0..100 {
            if let Some(code) = source.decode_frame().await.unwrap() {
                return Some(code);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[test]
    fn test_identical_code_within_window_is_dropped() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));

        assert!(debouncer.accept("X1", start));
        assert!(!debouncer.accept("X1", start + Duration::from_millis(100)));
        assert!(!debouncer.accept("X1", start + Duration::from_millis(1400)));
    }

    #[test]
    fn test_held_code_keeps_refreshing_the_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));
        assert!(debouncer.accept("X1", start));

        // sampled every 100ms for five seconds
        for tick in 1..=50 {
            let now = start + Duration::from_millis(tick * 100);
            assert!(!debouncer.accept("X1", now));
        }

        let later = start + Duration::from_millis(5000 + 1500);
        assert!(debouncer.accept("X1", later));
    }

    #[test]
    fn test_different_code_is_accepted_immediately() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1500));

        assert!(debouncer.accept("X1", start));
        assert!(debouncer.accept("X2", start + Duration::from_millis(10)));
        // only the immediately preceding code counts
        assert!(debouncer.accept("X1", start + Duration::from_millis(20)));

        debouncer.reset();
        assert!(debouncer.accept("X1", start + Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn test_line_source_reads_codes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "SN-1\r").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{\"sn\":[\"A\"]}}").unwrap();

        let mut source = LineSource::new(Some(file.path().to_path_buf()));
        assert_eq!(source.decode_frame().await.unwrap(), None, "not acquired yet");

        source.acquire().await.unwrap();
        let codes = vec![next_code(&mut source).await, next_code(&mut source).await];
        assert_eq!(
            codes,
            vec![Some("SN-1".to_string()), Some("{\"sn\":[\"A\"]}".to_string())]
        );

        source.release();
        source.release();
        assert_eq!(source.decode_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_device_fails_to_acquire() {
        let mut source = LineSource::new(Some(PathBuf::from("/nonexistent/reader")));
        assert!(source.acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_code_after_rearm_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("reader");
        let made = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(made.success());

        let writer_path = fifo.clone();
        let writer = tokio::task::spawn_blocking(move || {
            std::fs::OpenOptions::new()
                .write(true)
                .open(writer_path)
                .unwrap()
        });

        let mut source = LineSource::new(Some(fifo));
        source.acquire().await.unwrap();
        let mut writer = writer.await.unwrap();

        writeln!(writer, "A").unwrap();
        assert_eq!(next_code(&mut source).await.as_deref(), Some("A"));

        source.release();
        writeln!(writer, "STALE").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.decode_frame().await.unwrap(), None);

        source.acquire().await.unwrap();
        writeln!(writer, "B").unwrap();
        assert_eq!(next_code(&mut source).await.as_deref(), Some("B"));
    }
}
