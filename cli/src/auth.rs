use anyhow::{Result, anyhow};
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::config::{Config, custody_dir};

#[derive(Serialize, Deserialize)]
struct DeviceAuthResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    verification_uri_complete: String,
    expires_in: usize,
    interval: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<usize>,
    scope: Option<String>,
}

pub async fn login(config: &Config, open: bool) -> Result<()> {
    let store = CredentialFile::default_location()?;
    if get_secrets(config).await?.is_some() {
        println!("Already logged in");
        return Ok(());
    }

    let client = Client::new();
    let (domain, client_id, audience) = config.auth_credentials();

    let device_auth_response: DeviceAuthResponse = client
        .post(format!("https://{domain}/oauth/device/code"))
        .form(&[
            ("client_id", client_id.as_str()),
            ("audience", audience.as_str()),
            ("scope", "openid profile email offline_access"),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    println!(
        "Go to {} and enter the code: {}",
        device_auth_response.verification_uri, device_auth_response.user_code
    );

    if open {
        open::that(&device_auth_response.verification_uri_complete)?;
    }

    let token_endpoint = format!("https://{domain}/oauth/token");
    let deadline = chrono::Utc::now()
        + chrono::Duration::seconds(device_auth_response.expires_in as i64);

    loop {
        let resp: TokenResponse = client
            .post(&token_endpoint)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", &device_auth_response.device_code),
                ("client_id", &client_id),
            ])
            .send()
            .await?
            .json()
            .await?;

        if let (Some(access_token), Some(refresh_token)) = (resp.access_token, resp.refresh_token) {
            let mut session_secrets = store.read()?.unwrap_or_default();
            session_secrets.profiles.insert(
                config.current_profile.clone(),
                ProfileSecrets {
                    access_token,
                    refresh_token,
                },
            );
            store.write(&session_secrets)?;
            println!("Logged in as profile {}", config.current_profile);
            break;
        }

        if chrono::Utc::now() > deadline {
            return Err(anyhow!("Login code expired, run `gk auth login` again"));
        }

        tokio::time::sleep(std::time::Duration::from_secs(
            device_auth_response.interval as u64,
        ))
        .await;
    }

    Ok(())
}

pub fn logout(config: &Config) -> Result<()> {
    let store = CredentialFile::default_location()?;
    let Some(mut secrets) = store.read()? else {
        println!("Not logged in");
        return Ok(());
    };

    secrets.profiles.remove(&config.current_profile);
    if secrets.profiles.is_empty() {
        store.delete()?;
    } else {
        store.write(&secrets)?;
    }
    println!("Logged out, credentials removed.");
    Ok(())
}

pub async fn show(config: &Config) -> Result<()> {
    let Some(secrets) = get_secrets(config).await? else {
        println!("Not logged in");
        return Ok(());
    };

    let Some(profile) = secrets.profiles.get(&config.current_profile) else {
        println!("Profile '{}' not found", config.current_profile);
        return Ok(());
    };

    println!("Profile: {}", config.current_profile);
    println!("\nAccess Token:");
    println!("{}", profile.access_token);

    let claims = decode_claims_without_verification(&profile.access_token)?;
    let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0)
        .ok_or_else(|| anyhow!("Invalid timestamp"))?;
    let now = chrono::Utc::now();

    if claims.exp < now.timestamp() {
        println!(
            "\nStatus: Expired at {}",
            expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    } else {
        let duration = expires_at.signed_duration_since(now);
        println!(
            "\nStatus: Valid for {} more minutes",
            duration.num_minutes()
        );
    }
    if let Some(email) = claims.email {
        println!("Email: {email}");
    }

    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    exp: i64,
    #[serde(default)]
    email: Option<String>,
}

fn decode_claims_without_verification(token: &str) -> Result<Claims> {
    let parts: Vec<&str> = token.split('.').collect();

    if parts.len() != 3 {
        return Err(anyhow!("Token does not have 3 parts"));
    }

    let decoded_payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(parts[1])?;
    let claims: Claims = serde_json::from_slice(&decoded_payload)?;

    Ok(claims)
}

fn is_token_expired(token: &str) -> bool {
    match decode_claims_without_verification(token) {
        Ok(claims) => claims.exp < chrono::Utc::now().timestamp(),
        Err(_) => true,
    }
}

pub async fn refresh_access_token(
    domain: &str,
    client_id: &str,
    refresh_token: &str,
    audience: &str,
) -> Result<TokenResponse> {
    let response = Client::new()
        .post(format!("https://{domain}/oauth/token"))
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
            ("audience", audience),
        ])
        .send()
        .await
        .map_err(|e| anyhow!("Failed to refresh token: {e}"))?;

    if !response.status().is_success() {
        let error_text = response.text().await?;
        return Err(anyhow!("Token refresh failed: {error_text}"));
    }

    Ok(response.json().await?)
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionSecrets {
    pub profiles: HashMap<String, ProfileSecrets>,
}

impl SessionSecrets {
    pub fn bearer_token(&self, profile_name: &str) -> Option<String> {
        self.profiles
            .get(profile_name)
            .map(|profile| profile.access_token.clone())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileSecrets {
    pub access_token: String,
    pub refresh_token: String,
}

/// Returns the secrets for the current profile, refreshing an expired access
/// token on the way.
pub async fn get_secrets(config: &Config) -> Result<Option<SessionSecrets>> {
    let store = CredentialFile::default_location()?;
    let Some(mut session_secrets) = store.read()? else {
        return Ok(None);
    };

    let Some(current) = session_secrets.profiles.get(&config.current_profile) else {
        return Ok(None);
    };

    if !is_token_expired(&current.access_token) {
        return Ok(Some(session_secrets));
    }

    let current_refresh_token = current.refresh_token.clone();
    let (domain, client_id, audience) = config.auth_credentials();
    let token_response =
        refresh_access_token(&domain, &client_id, &current_refresh_token, &audience).await?;

    let access_token = token_response
        .access_token
        .ok_or(anyhow!("No access token in refresh response"))?;
    let refresh_token = token_response
        .refresh_token
        .unwrap_or(current_refresh_token);

    session_secrets.profiles.insert(
        config.current_profile.clone(),
        ProfileSecrets {
            access_token,
            refresh_token,
        },
    );
    store.write(&session_secrets)?;

    Ok(Some(session_secrets))
}

/// Plain JSON file readable only by its owner.
struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    fn default_location() -> Result<Self> {
        Ok(Self {
            path: custody_dir()?.join("credentials.json"),
        })
    }

    fn read(&self) -> Result<Option<SessionSecrets>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow!("Failed to read credentials file: {}", e)),
        }
    }

    fn write(&self, secrets: &SessionSecrets) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // write to a temp file, then rename over the old one
        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut perms = file.metadata()?.permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms)?;

        file.write_all(serde_json::to_string(secrets)?.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!("Failed to delete credentials file: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use chrono::{Duration, Utc};

    fn token(exp: i64) -> String {
        let payload = serde_json::json!({ "exp": exp, "email": "guard@example.edu" });
        format!("header.{}.signature", URL_SAFE_NO_PAD.encode(payload.to_string()))
    }

    #[test]
    fn test_decode_claims_without_verification() {
        let exp = Utc::now().timestamp();
        let claims = decode_claims_without_verification(&token(exp)).unwrap();

        assert_eq!(claims.exp, exp);
        assert_eq!(claims.email.as_deref(), Some("guard@example.edu"));
    }

    #[test]
    fn test_decode_claims_invalid_token() {
        assert!(decode_claims_without_verification("invalid.token.parts").is_err());
        assert!(decode_claims_without_verification("nodots").is_err());
    }

    #[test]
    fn test_is_token_expired() {
        assert!(!is_token_expired(&token(
            (Utc::now() + Duration::seconds(60)).timestamp()
        )));
        assert!(is_token_expired(&token(
            (Utc::now() - Duration::seconds(60)).timestamp()
        )));
    }

    #[test]
    fn test_credential_file_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialFile {
            path: dir.path().join("nested").join("credentials.json"),
        };
        assert_eq!(store.read().unwrap(), None);

        let mut secrets = SessionSecrets::default();
        secrets.profiles.insert(
            "campus".into(),
            ProfileSecrets {
                access_token: "a".into(),
                refresh_token: "r".into(),
            },
        );
        store.write(&secrets).unwrap();

        let mode = std::fs::metadata(&store.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let read = store.read().unwrap().unwrap();
        assert_eq!(read.bearer_token("campus").as_deref(), Some("a"));
        assert_eq!(read.bearer_token("local"), None);

        store.delete().unwrap();
        store.delete().unwrap();
        assert_eq!(store.read().unwrap(), None);
    }
}
