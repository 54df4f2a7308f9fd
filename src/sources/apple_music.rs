use std::time::Duration;

use anyhow::{bail, Context, Result};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::core::browser::{wait_for, BrowserSession, ChromeSession, Locator, SleepPacer};
use crate::models::{Playlist, PlaylistSummary, Track};
use crate::sources::{
    cap_tracks, or_placeholder, PlaylistLookup, PlaylistSource, UNKNOWN_ARTIST, UNKNOWN_CURATOR,
    UNKNOWN_PLAYLIST, UNKNOWN_TRACK,
};

const TRACK_ROW: &str = ".songs-list-row";
const APPLE_MUSIC_HOST: &str = "music.apple.com";

/// Apple Music 플레이리스트 페이지 스크래핑 소스.
/// 인증 없이 브라우저로 페이지를 렌더링한 뒤 HTML을 파싱한다.
pub struct AppleMusicScraper {
    headless: bool,
    marker_timeout: Duration,
}

impl AppleMusicScraper {
    pub fn new(headless: bool, marker_timeout: Duration) -> Self {
        Self {
            headless,
            marker_timeout,
        }
    }

    /// 페이지를 열고 트랙 목록이 나타날 때까지 기다린 뒤 HTML을 돌려준다.
    /// 브라우저 세션은 이 호출 안에서만 살아 있다.
    fn render_page(&self, url: &str) -> Result<String> {
        let session = ChromeSession::launch(self.headless)?;
        session.navigate(url)?;

        let marker = Locator::Css(TRACK_ROW);
        if !wait_for(&session, &SleepPacer, &marker, self.marker_timeout)? {
            bail!(
                "{}초 안에 트랙 목록이 나타나지 않았습니다: {}",
                self.marker_timeout.as_secs(),
                url
            );
        }
        session.page_source()
    }
}

impl PlaylistSource for AppleMusicScraper {
    fn name(&self) -> &str {
        "Apple Music"
    }

    fn lookup(&self) -> PlaylistLookup {
        PlaylistLookup::ByUrl
    }

    fn list_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        log::info!("Apple Music doesn't support listing public playlists");
        Ok(Vec::new())
    }

    /// 페이지를 불러오지 못하면 로그를 남기고 트랙이 없는 플레이리스트를 돌려준다.
    fn fetch_playlist(&self, url: &str) -> Result<Playlist> {
        let url = playlist_url(url)?;
        let playlist = playlist_or_empty(self.render_page(url.as_str()));
        log::debug!("number of tracks found: {}", playlist.tracks.len());
        Ok(playlist)
    }
}

/// 사용자가 입력한 Apple Music 주소를 정규화한다.
/// 스킴이 없으면 https로 보고, 호스트는 music.apple.com 또는 그 하위 도메인이어야 한다.
pub fn playlist_url(input: &str) -> Result<Url> {
    let input = input.trim();
    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };
    let url = Url::parse(&with_scheme)
        .with_context(|| format!("잘못된 URL입니다: {}", input))?;

    let host = url.host_str().unwrap_or_default();
    let apple_host = host == APPLE_MUSIC_HOST || host.ends_with(".music.apple.com");
    if !matches!(url.scheme(), "http" | "https") || !apple_host {
        bail!("Apple Music 플레이리스트 URL이 아닙니다: {}", input);
    }
    Ok(url)
}

fn playlist_or_empty(rendered: Result<String>) -> Playlist {
    match rendered {
        Ok(html) => parse_playlist_page(&html),
        Err(e) => {
            log::error!("error fetching Apple Music playlist tracks: {:#}", e);
            Playlist {
                name: UNKNOWN_PLAYLIST.to_string(),
                curator: Some(UNKNOWN_CURATOR.to_string()),
                tracks: Vec::new(),
            }
        }
    }
}

/// 렌더링된 플레이리스트 페이지에서 이름, 큐레이터, 트랙을 추출한다.
/// 빠진 필드는 자리표시자로 채우며, 일부 필드가 없어도 전체 추출은 실패하지 않는다.
pub fn parse_playlist_page(html: &str) -> Playlist {
    let document = Html::parse_document(html);

    let title_sel = Selector::parse("h1.headings__title").unwrap();
    let curator_sel =
        Selector::parse(r#".headings__subtitles a[data-testid="click-action"]"#).unwrap();
    let row_sel = Selector::parse(TRACK_ROW).unwrap();
    let name_sel = Selector::parse(".songs-list-row__song-name").unwrap();
    let artist_sel = Selector::parse(".songs-list__col--secondary a").unwrap();
    let rank_sel = Selector::parse(".songs-list-row__rank").unwrap();

    let name = or_placeholder(first_text(document.root_element(), &title_sel), UNKNOWN_PLAYLIST);
    let curator = or_placeholder(
        first_text(document.root_element(), &curator_sel),
        UNKNOWN_CURATOR,
    );

    let tracks = document
        .select(&row_sel)
        .map(|row| {
            let track_name = or_placeholder(first_text(row, &name_sel), UNKNOWN_TRACK);
            let artist = or_placeholder(first_text(row, &artist_sel), UNKNOWN_ARTIST);
            let position = first_text(row, &rank_sel).and_then(|r| r.trim().parse::<u32>().ok());
            Track::new(track_name, vec![artist], position)
        })
        .collect();

    Playlist {
        name,
        curator: Some(curator),
        tracks: cap_tracks(tracks),
    }
}

fn first_text(root: ElementRef<'_>, sel: &Selector) -> Option<String> {
    root.select(sel)
        .next()
        .map(|el| el.text().collect::<String>())
}
