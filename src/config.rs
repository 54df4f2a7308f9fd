use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub apple_music: AppleMusicConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: default_redirect_uri(),
        }
    }
}

impl SpotifyConfig {
    pub fn is_configured(&self) -> bool {
        self.client_id.as_ref().is_some_and(|s| !s.is_empty())
            && self.client_secret.as_ref().is_some_and(|s| !s.is_empty())
            && !self.redirect_uri.is_empty()
    }
}

fn default_redirect_uri() -> String {
    "http://localhost:8888/callback".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    FirstResult,
    #[default]
    MostViewed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub policy: PolicyKind,
    pub top_n: usize,
    pub include_playlist_name: bool,
    pub pause_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::MostViewed,
            top_n: 10,
            include_playlist_name: true,
            pause_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppleMusicConfig {
    pub marker_timeout_secs: u64,
}

impl Default for AppleMusicConfig {
    fn default() -> Self {
        Self {
            marker_timeout_secs: 10,
        }
    }
}

impl AppleMusicConfig {
    pub fn marker_timeout(&self) -> Duration {
        Duration::from_secs(self.marker_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub url: String,
    pub headless: bool,
    pub input_timeout_secs: u64,
    pub settle_secs: u64,
    pub download_timeout_secs: u64,
    pub tab_timeout_secs: u64,
    pub inter_track_delay_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            url: "https://ytmp3s.nu/D9K1/".to_string(),
            headless: false,
            input_timeout_secs: 2,
            settle_secs: 10,
            download_timeout_secs: 60,
            tab_timeout_secs: 2,
            inter_track_delay_secs: 5,
        }
    }
}

/// 기본 설정 디렉토리: `$HOME/.config/playlist2mp3`.
pub fn config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("playlist2mp3")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Spotify 토큰 캐시는 설정 파일과 같은 디렉토리에 둔다.
pub fn token_cache_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|dir| dir.join("token.json"))
        .unwrap_or_else(|| PathBuf::from("token.json"))
}

/// 설정 파일을 읽는다. 파일이 없거나 잘못되었으면 기본값을 쓴다.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        log::info!("no config at {}, using defaults", path.display());
        return Config::default();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("cannot read {}: {}; using defaults", path.display(), e);
            return Config::default();
        }
    };
    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("invalid config {}: {}; using defaults", path.display(), e);
            Config::default()
        }
    }
}

pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("설정 디렉토리를 만들 수 없습니다: {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("설정 파일을 쓸 수 없습니다: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.toml"));
        assert!(!config.spotify.is_configured());
        assert_eq!(config.search.policy, PolicyKind::MostViewed);
        assert_eq!(config.search.top_n, 10);
        assert_eq!(config.converter.inter_track_delay_secs, 5);
        assert_eq!(config.converter.url, "https://ytmp3s.nu/D9K1/");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[spotify]\nclient_id = \"id\"\nclient_secret = \"secret\"\n\n[search]\npolicy = \"first_result\"\n",
        )
        .unwrap();

        let config = load_config(&path);
        assert!(config.spotify.is_configured());
        assert_eq!(config.spotify.redirect_uri, "http://localhost:8888/callback");
        assert_eq!(config.search.policy, PolicyKind::FirstResult);
        assert_eq!(config.search.pause_ms, 1000);
        assert_eq!(config.apple_music.marker_timeout_secs, 10);
    }

    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        let config = load_config(&path);
        assert!(config.spotify.client_id.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.spotify.client_id = Some("abc".to_string());
        config.spotify.client_secret = Some("def".to_string());
        config.converter.headless = true;

        save_config(&path, &config).unwrap();
        let reloaded = load_config(&path);
        assert_eq!(reloaded.spotify.client_id.as_deref(), Some("abc"));
        assert!(reloaded.converter.headless);
    }

    #[test]
    fn test_empty_redirect_uri_is_not_configured() {
        let config = SpotifyConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            redirect_uri: String::new(),
        };
        assert!(!config.is_configured());
    }

    #[test]
    fn test_token_cache_next_to_config() {
        let path = PathBuf::from("/tmp/p2m/config.toml");
        assert_eq!(token_cache_path(&path), PathBuf::from("/tmp/p2m/token.json"));
    }
}
