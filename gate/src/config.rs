use crate::scanner::ScanMode;
use crate::station::GateAction;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/custody/gated.toml";

const MIN_SAMPLE_INTERVAL_MS: u64 = 80;
const MAX_SAMPLE_INTERVAL_MS: u64 = 350;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub url: Url,
    /// Sent as-is on every request and never refreshed, so this has to be a
    /// long-lived service credential for a `security` account. A user token
    /// from `gk auth login` expires and the station then fails every write
    /// with 401 until the daemon is reconfigured.
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub mode: ScanMode,
    #[serde(default)]
    pub action: GateAction,
    /// Start detecting again after a single-shot scan was handled.
    #[serde(default = "default_rearm")]
    pub rearm: bool,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            action: GateAction::default(),
            rearm: default_rearm(),
        }
    }
}

fn default_rearm() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    /// Device to read codes from, stdin when unset.
    pub source: Option<PathBuf>,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            source: None,
            sample_interval_ms: default_sample_interval_ms(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_sample_interval_ms() -> u64 {
    100
}

fn default_debounce_ms() -> u64 {
    1500
}

impl DecoderConfig {
    pub fn sample_interval(&self) -> Duration {
        let clamped = self
            .sample_interval_ms
            .clamp(MIN_SAMPLE_INTERVAL_MS, MAX_SAMPLE_INTERVAL_MS);
        if clamped != self.sample_interval_ms {
            warn!(
                "sample_interval_ms {} out of range, using {clamped}",
                self.sample_interval_ms
            );
        }
        Duration::from_millis(clamped)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}

impl Config {
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("invalid gate configuration")?;
        if config.api.token.trim().is_empty() {
            warn!("api.token is empty, every request will be rejected");
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [api]
            url = "https://custody.example.edu/"
            token = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.station.mode, ScanMode::SingleShot);
        assert_eq!(config.station.action, GateAction::CheckIn);
        assert!(config.station.rearm);
        assert_eq!(config.decoder.sample_interval(), Duration::from_millis(100));
        assert_eq!(config.decoder.debounce_window(), Duration::from_millis(1500));
        assert!(config.decoder.source.is_none());
        assert!(config.slack.is_none());
    }

    #[rstest]
    #[case(10, 80)]
    #[case(80, 80)]
    #[case(200, 200)]
    #[case(1000, 350)]
    fn test_sample_interval_is_clamped(#[case] configured: u64, #[case] expected: u64) {
        let decoder = DecoderConfig {
            sample_interval_ms: configured,
            ..Default::default()
        };
        assert_eq!(decoder.sample_interval(), Duration::from_millis(expected));
    }

    #[test]
    fn test_load_shipped_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(include_bytes!("../gated.toml")).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.api.url.as_str(), "http://localhost:8080/");
        assert_eq!(config.station.mode, ScanMode::SingleShot);
    }

    #[test]
    fn test_continuous_check_out_station() {
        let config = Config::parse(
            r#"
            [api]
            url = "http://localhost:8080/"
            token = "t"

            [station]
            mode = "continuous"
            action = "check_out"
            rearm = false

            [slack]
            webhook_url = "https://hooks.slack.test/x"
            "#,
        )
        .unwrap();
        assert_eq!(config.station.mode, ScanMode::Continuous);
        assert_eq!(config.station.action, GateAction::CheckOut);
        assert!(!config.station.rearm);
        assert!(config.slack.is_some());
    }

    #[test]
    fn test_api_token_is_required() {
        let err = Config::parse(
            r#"
            [api]
            url = "https://custody.example.edu/"
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("token"));
    }
}
