use anyhow::{Context, anyhow};
use colored::{Color, ColoredString, Style};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{collections::HashMap, fmt::Display};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Profile {
    server: String,
    #[serde(default = "default_color")]
    color: String,
    auth_domain: String,
    auth_client_id: String,
    auth_audience: String,
}

fn default_color() -> String {
    "white".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub current_profile: String,
    profile: HashMap<String, Profile>,
    #[serde(skip)]
    path: PathBuf,
}

/// `~/.custody`, where the config and credentials live.
pub fn custody_dir() -> anyhow::Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow!("Cannot determine home directory"))?
        .join(".custody"))
}

impl Config {
    pub async fn load() -> anyhow::Result<Self> {
        Self::load_from(&custody_dir()?.join("config.toml")).await
    }

    pub async fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config_str = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Invalid config in {}", path.display()))?;

        if !config.profile.contains_key(&config.current_profile) {
            return Err(anyhow!(
                "Current profile '{}' is not defined",
                config.current_profile
            ));
        }

        config.path = path.to_path_buf();
        Ok(config)
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let temp_path = self.path.with_extension("toml.save");
        let config_str = toml::to_string(&self)?;
        tokio::fs::write(&temp_path, config_str).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    pub async fn change_profile(&mut self, profile: String) -> anyhow::Result<()> {
        if !self.profile.contains_key(&profile) {
            return Err(anyhow!("Profile '{}' does not exist", profile));
        }

        self.current_profile = profile;
        self.save().await
    }

    fn current(&self) -> &Profile {
        // checked on load and on every profile change
        &self.profile[&self.current_profile]
    }

    /// (domain, client id, audience) of the identity provider.
    pub fn auth_credentials(&self) -> (String, String, String) {
        let profile = self.current();
        (
            profile.auth_domain.clone(),
            profile.auth_client_id.clone(),
            profile.auth_audience.clone(),
        )
    }

    pub fn current_domain(&self) -> String {
        self.current().server.trim_end_matches('/').to_owned()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.profile.keys().map(String::as_str)
    }
}

impl Display for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current_profile = self.current();
        let color = Color::from(current_profile.color.as_str());
        let mut colored_string = ColoredString::from(self.current_profile.as_str());
        colored_string.fgcolor = Some(color);
        colored_string.style = Style::default().bold();
        let mut colored_server = ColoredString::from(current_profile.server.as_str());
        colored_server.fgcolor = Some(color);
        write!(f, "{} {}", colored_string, colored_server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
current_profile = "campus"

[profile.campus]
server = "https://custody.example.edu/"
color = "green"
auth_domain = "login.example.edu"
auth_client_id = "abc"
auth_audience = "https://custody.example.edu"

[profile.local]
server = "http://localhost:8080"
auth_domain = "login.example.edu"
auth_client_id = "abc"
auth_audience = "http://localhost:8080"
"#;

    #[tokio::test]
    async fn test_profiles_and_switching() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, CONFIG).await.unwrap();

        let mut config = Config::load_from(&path).await.unwrap();
        assert_eq!(config.current_domain(), "https://custody.example.edu");

        assert!(config.change_profile("missing".into()).await.is_err());
        config.change_profile("local".into()).await.unwrap();

        let reloaded = Config::load_from(&path).await.unwrap();
        assert_eq!(reloaded.current_profile, "local");
        assert_eq!(reloaded.current_domain(), "http://localhost:8080");
        assert_eq!(reloaded.profiles().count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_current_profile_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let broken = CONFIG.replace(r#"current_profile = "campus""#, r#"current_profile = "x""#);
        tokio::fs::write(&path, broken).await.unwrap();

        assert!(Config::load_from(&path).await.is_err());
    }
}
