pub mod apple_music;
pub mod spotify;
pub mod youtube;

use anyhow::Result;

use crate::models::{Playlist, PlaylistSummary, VideoCandidate};

/// 한 플레이리스트에서 가져오는 최대 트랙 수.
pub const MAX_TRACKS: usize = 1000;

pub const UNKNOWN_TRACK: &str = "Unknown Track";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_PLAYLIST: &str = "Unknown Playlist";
pub const UNKNOWN_CURATOR: &str = "Unknown Curator";

/// 사용자가 플레이리스트를 고르는 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistLookup {
    /// 목록에서 번호로 선택한다.
    Listed,
    /// URL을 직접 입력한다.
    ByUrl,
}

/// 플레이리스트 소스 트레이트.
/// Spotify API, Apple Music 페이지 스크래핑 등 서로 다른 소스를 같은 Track 형태로 추상화한다.
pub trait PlaylistSource {
    fn name(&self) -> &str;
    fn lookup(&self) -> PlaylistLookup;
    /// 선택 가능한 플레이리스트 목록. 목록을 지원하지 않는 소스는 빈 목록을 반환한다.
    fn list_playlists(&self) -> Result<Vec<PlaylistSummary>>;
    /// ID 또는 URL로 플레이리스트와 트랙을 가져온다. 트랙은 최대 MAX_TRACKS개.
    fn fetch_playlist(&self, id_or_url: &str) -> Result<Playlist>;
}

/// 동영상 검색 인덱스 트레이트.
pub trait VideoIndex {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoCandidate>>;
}

pub fn cap_tracks<T>(mut items: Vec<T>) -> Vec<T> {
    items.truncate(MAX_TRACKS);
    items
}

/// Fetch pages of `page_size` items until a short page comes back or `cap`
/// items have been collected. `fetch_page` receives `(offset, limit)`.
pub fn paginate<T, F>(page_size: usize, cap: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize, usize) -> Result<Vec<T>>,
{
    let mut items = Vec::new();
    let mut offset = 0;

    while items.len() < cap {
        let page = fetch_page(offset, page_size)?;
        let fetched = page.len();
        items.extend(page);

        if fetched < page_size {
            break;
        }
        offset += page_size;
    }

    items.truncate(cap);
    Ok(items)
}

/// Trimmed text, or `placeholder` when the field is missing or blank.
pub fn or_placeholder(value: Option<String>, placeholder: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => placeholder.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_tracks_exactly_max() {
        let items: Vec<u32> = (0..1500).collect();
        assert_eq!(cap_tracks(items).len(), MAX_TRACKS);
    }

    #[test]
    fn test_cap_tracks_keeps_short_lists() {
        let items: Vec<u32> = (0..12).collect();
        assert_eq!(cap_tracks(items).len(), 12);
    }

    #[test]
    fn test_paginate_stops_on_short_page() {
        let sizes = [100, 100, 37];
        let mut calls = Vec::new();
        let items = paginate(100, MAX_TRACKS, |offset, limit| {
            calls.push((offset, limit));
            let size = sizes[calls.len() - 1];
            Ok((0..size).map(|i| offset + i).collect::<Vec<_>>())
        })
        .unwrap();

        assert_eq!(items.len(), 237);
        assert_eq!(calls, vec![(0, 100), (100, 100), (200, 100)]);
    }

    #[test]
    fn test_paginate_stops_at_cap() {
        let mut calls = 0;
        let items = paginate(100, MAX_TRACKS, |offset, limit| {
            calls += 1;
            Ok((0..limit).map(|i| offset + i).collect::<Vec<_>>())
        })
        .unwrap();

        assert_eq!(items.len(), MAX_TRACKS);
        assert_eq!(calls, 10);
        assert_eq!(items.last(), Some(&999));
    }

    #[test]
    fn test_paginate_truncates_overfull_pages() {
        // 페이지가 요청보다 많이 돌려줘도 상한은 지켜진다.
        let items = paginate(100, MAX_TRACKS, |_, _| Ok(vec![0u8; 1500])).unwrap();
        assert_eq!(items.len(), MAX_TRACKS);
    }

    #[test]
    fn test_paginate_propagates_errors() {
        let result: Result<Vec<u8>> = paginate(100, MAX_TRACKS, |_, _| Err(anyhow::anyhow!("boom")));
        assert!(result.is_err());
    }

    #[test]
    fn test_or_placeholder() {
        assert_eq!(or_placeholder(None, UNKNOWN_TRACK), "Unknown Track");
        assert_eq!(or_placeholder(Some("  ".to_string()), UNKNOWN_ARTIST), "Unknown Artist");
        assert_eq!(or_placeholder(Some(" IU ".to_string()), UNKNOWN_ARTIST), "IU");
    }
}
