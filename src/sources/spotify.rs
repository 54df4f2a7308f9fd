use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::Engine;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SpotifyConfig;
use crate::models::{Playlist, PlaylistSummary, Track};
use crate::sources::{
    or_placeholder, paginate, PlaylistLookup, PlaylistSource, MAX_TRACKS, UNKNOWN_ARTIST,
    UNKNOWN_PLAYLIST, UNKNOWN_TRACK,
};

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const SCOPE: &str = "playlist-read-private";

const PLAYLIST_PAGE_SIZE: usize = 50;
const TRACK_PAGE_SIZE: usize = 100;

/// 만료 직전 토큰은 새로 받는다.
const EXPIRY_MARGIN_SECS: i64 = 60;

pub struct SpotifyClient {
    client: reqwest::blocking::Client,
    access_token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct CachedToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: i64,
}

impl CachedToken {
    fn from_response(resp: TokenResponse, previous_refresh: Option<String>) -> Self {
        Self {
            access_token: resp.access_token,
            // 갱신 응답에는 refresh_token이 빠질 수 있다.
            refresh_token: resp.refresh_token.or(previous_refresh),
            expires_at: Utc::now().timestamp() + resp.expires_in,
        }
    }

    fn is_fresh(&self, now: i64) -> bool {
        now + EXPIRY_MARGIN_SECS < self.expires_at
    }
}

#[derive(Deserialize)]
struct Page<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct SimplePlaylist {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct PlaylistHeader {
    name: Option<String>,
    owner: Option<Owner>,
}

#[derive(Deserialize)]
struct Owner {
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    track: Option<SpotifyTrack>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    name: String,
}

impl SpotifyClient {
    /// 캐시된 토큰을 쓰거나, 만료되었으면 갱신하고, 없으면 인증 코드 흐름을 진행한다.
    /// `prompt`는 인증 URL을 받아 사용자가 붙여넣은 리다이렉트 URL을 돌려준다.
    pub fn connect<F>(config: &SpotifyConfig, cache_path: &Path, prompt: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let client_id = config
            .client_id
            .as_deref()
            .context("Spotify client_id가 설정되지 않았습니다")?;
        let client_secret = config
            .client_secret
            .as_deref()
            .context("Spotify client_secret가 설정되지 않았습니다")?;

        let client = reqwest::blocking::Client::new();
        let cached = load_cached_token(cache_path);

        let token = match cached {
            Some(token) if token.is_fresh(Utc::now().timestamp()) => {
                log::debug!("using cached Spotify token");
                token
            }
            Some(CachedToken {
                refresh_token: Some(refresh),
                ..
            }) => {
                log::info!("refreshing Spotify access token");
                let resp = Self::request_token(
                    &client,
                    client_id,
                    client_secret,
                    &[("grant_type", "refresh_token"), ("refresh_token", refresh.as_str())],
                )?;
                CachedToken::from_response(resp, Some(refresh))
            }
            _ => {
                let state = format!("{:x}", Utc::now().timestamp_micros());
                let auth_url = authorize_url(client_id, &config.redirect_uri, &state)?;
                let redirected = prompt(&auth_url)?;
                let code = extract_code(&redirected, &state)?;
                let resp = Self::request_token(
                    &client,
                    client_id,
                    client_secret,
                    &[
                        ("grant_type", "authorization_code"),
                        ("code", code.as_str()),
                        ("redirect_uri", config.redirect_uri.as_str()),
                    ],
                )?;
                CachedToken::from_response(resp, None)
            }
        };

        if let Err(e) = save_cached_token(cache_path, &token) {
            log::warn!("cannot cache Spotify token: {:#}", e);
        }

        Ok(Self {
            client,
            access_token: token.access_token,
        })
    }

    fn request_token(
        client: &reqwest::blocking::Client,
        client_id: &str,
        client_secret: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let credentials = format!("{}:{}", client_id, client_secret);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);

        let resp: TokenResponse = client
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {}", encoded))
            .form(form)
            .send()
            .context("Spotify 연결에 실패했습니다")?
            .error_for_status()
            .context("Spotify 인증에 실패했습니다. client_id, client_secret, redirect_uri를 확인하세요.")?
            .json()
            .context("Spotify 토큰 응답 파싱에 실패했습니다")?;

        Ok(resp)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", API_BASE, path);
        self.client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .with_context(|| format!("Spotify 요청에 실패했습니다: {}", path))?
            .error_for_status()
            .with_context(|| format!("Spotify 요청이 거부되었습니다: {}", path))?
            .json()
            .with_context(|| format!("Spotify 응답 파싱에 실패했습니다: {}", path))
    }

    fn fetch_page<T: DeserializeOwned>(
        &self,
        path: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<T>> {
        log::debug!("GET {} offset={} limit={}", path, offset, limit);
        let page: Page<T> = self.get_json(
            path,
            &[("offset", offset.to_string()), ("limit", limit.to_string())],
        )?;
        Ok(page.items)
    }
}

impl PlaylistSource for SpotifyClient {
    fn name(&self) -> &str {
        "Spotify"
    }

    fn lookup(&self) -> PlaylistLookup {
        PlaylistLookup::Listed
    }

    fn list_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        let playlists: Vec<SimplePlaylist> =
            paginate(PLAYLIST_PAGE_SIZE, MAX_TRACKS, |offset, limit| {
                self.fetch_page("/me/playlists", offset, limit)
            })?;

        Ok(playlists
            .into_iter()
            .map(|p| PlaylistSummary {
                id: p.id,
                name: p.name,
            })
            .collect())
    }

    fn fetch_playlist(&self, id_or_url: &str) -> Result<Playlist> {
        let id = playlist_id(id_or_url);

        let header: PlaylistHeader = self.get_json(
            &format!("/playlists/{}", id),
            &[("fields", "name,owner(display_name)".to_string())],
        )?;

        let tracks_path = format!("/playlists/{}/tracks", id);
        let items: Vec<PlaylistItem> = paginate(TRACK_PAGE_SIZE, MAX_TRACKS, |offset, limit| {
            self.fetch_page(&tracks_path, offset, limit)
        })?;

        Ok(Playlist {
            name: or_placeholder(header.name, UNKNOWN_PLAYLIST),
            curator: header.owner.and_then(|o| o.display_name),
            tracks: convert_items(items),
        })
    }
}

/// Playlist items to tracks. Removed or local items (`track: null`) are
/// dropped; positions keep the playlist offset.
fn convert_items(items: Vec<PlaylistItem>) -> Vec<Track> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let track = item.track?;
            let artists: Vec<String> = track
                .artists
                .into_iter()
                .map(|a| a.name)
                .filter(|n| !n.trim().is_empty())
                .collect();
            let artists = if artists.is_empty() {
                vec![UNKNOWN_ARTIST.to_string()]
            } else {
                artists
            };
            Some(Track::new(
                or_placeholder(track.name, UNKNOWN_TRACK),
                artists,
                Some(i as u32 + 1),
            ))
        })
        .collect()
}

/// `open.spotify.com` 링크나 `spotify:playlist:` URI에서 ID만 꺼낸다.
pub fn playlist_id(input: &str) -> String {
    let input = input.trim();
    if let Some(rest) = input.strip_prefix("spotify:playlist:") {
        return rest.to_string();
    }
    if let Ok(url) = Url::parse(input) {
        if let Some(mut segments) = url.path_segments() {
            if let Some(id) = segments.find(|s| *s == "playlist").and_then(|_| segments.next()) {
                return id.to_string();
            }
        }
    }
    input.to_string()
}

pub fn authorize_url(client_id: &str, redirect_uri: &str, state: &str) -> Result<String> {
    let url = Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", client_id),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
            ("scope", SCOPE),
            ("state", state),
        ],
    )?;
    Ok(url.to_string())
}

/// 리다이렉트된 URL에서 인증 코드를 꺼낸다. state가 다르면 에러.
pub fn extract_code(redirected: &str, expected_state: &str) -> Result<String> {
    let url = Url::parse(redirected.trim()).context("리다이렉트 URL 형식이 올바르지 않습니다")?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        bail!("Spotify 인증이 거부되었습니다: {}", error);
    }
    if state.as_deref() != Some(expected_state) {
        bail!("리다이렉트 URL의 state가 일치하지 않습니다");
    }
    code.context("리다이렉트 URL에 code가 없습니다")
}

fn load_cached_token(path: &Path) -> Option<CachedToken> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(token) => Some(token),
        Err(e) => {
            log::warn!("ignoring unreadable token cache {}: {}", path.display(), e);
            None
        }
    }
}

fn save_cached_token(path: &Path, token: &CachedToken) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(token)?;
    std::fs::write(path, content)
        .with_context(|| format!("토큰 캐시를 쓸 수 없습니다: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_items_skips_null_tracks() {
        let json = r#"[
            {"track": {"name": "Blueming", "artists": [{"name": "IU"}]}},
            {"track": null},
            {"track": {"name": "Dynamite", "artists": [{"name": "BTS"}, {"name": "Feat"}]}},
            {"track": {"name": "", "artists": []}}
        ]"#;
        let items: Vec<PlaylistItem> = serde_json::from_str(json).unwrap();
        let tracks = convert_items(items);

        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].name, "Blueming");
        assert_eq!(tracks[0].position, Some(1));
        assert_eq!(tracks[1].artist_line(), "BTS, Feat");
        assert_eq!(tracks[1].position, Some(3));
        assert_eq!(tracks[2].name, "Unknown Track");
        assert_eq!(tracks[2].artists, vec!["Unknown Artist".to_string()]);
    }

    #[test]
    fn test_episode_items_deserialize() {
        let json = r#"{"items": [{"track": {"name": "Podcast Ep", "type": "episode"}}]}"#;
        let page: Page<PlaylistItem> = serde_json::from_str(json).unwrap();
        let tracks = convert_items(page.items);
        assert_eq!(tracks[0].artists, vec!["Unknown Artist".to_string()]);
    }

    #[test]
    fn test_playlist_id_forms() {
        assert_eq!(playlist_id("37i9dQZF1DXcBWIGoYBM5M"), "37i9dQZF1DXcBWIGoYBM5M");
        assert_eq!(
            playlist_id("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc"),
            "37i9dQZF1DXcBWIGoYBM5M"
        );
        assert_eq!(
            playlist_id("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M"),
            "37i9dQZF1DXcBWIGoYBM5M"
        );
    }

    #[test]
    fn test_authorize_url_contains_params() {
        let url = authorize_url("my-id", "http://localhost:8888/callback", "xyz").unwrap();
        assert!(url.starts_with("https://accounts.spotify.com/authorize?"));
        assert!(url.contains("client_id=my-id"));
        assert!(url.contains("scope=playlist-read-private"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8888%2Fcallback"));
        assert!(url.contains("state=xyz"));
    }

    #[test]
    fn test_extract_code() {
        let code = extract_code("http://localhost:8888/callback?code=AQB123&state=xyz", "xyz").unwrap();
        assert_eq!(code, "AQB123");
    }

    #[test]
    fn test_extract_code_rejects_state_mismatch() {
        assert!(extract_code("http://localhost:8888/callback?code=AQB123&state=other", "xyz").is_err());
    }

    #[test]
    fn test_extract_code_reports_denial() {
        let err = extract_code("http://localhost:8888/callback?error=access_denied&state=xyz", "xyz")
            .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_token_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let token = CachedToken {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: 1_700_000_000,
        };
        save_cached_token(&path, &token).unwrap();
        assert_eq!(load_cached_token(&path), Some(token));
        assert!(load_cached_token(&dir.path().join("missing.json")).is_none());
    }

    #[test]
    fn test_token_freshness() {
        let token = CachedToken {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: 1000,
        };
        assert!(token.is_fresh(900));
        assert!(!token.is_fresh(950));
        assert!(!token.is_fresh(2000));
    }

    #[test]
    fn test_refresh_keeps_previous_refresh_token() {
        let resp = TokenResponse {
            access_token: "new".to_string(),
            refresh_token: None,
            expires_in: 3600,
        };
        let token = CachedToken::from_response(resp, Some("old-refresh".to_string()));
        assert_eq!(token.refresh_token.as_deref(), Some("old-refresh"));
        assert!(token.is_fresh(Utc::now().timestamp()));
    }
}
