use std::time::Duration;

use crate::config::{PolicyKind, SearchConfig};
use crate::core::browser::Pacer;
use crate::models::{MatchResult, Playlist, Track, VideoCandidate};
use crate::sources::VideoIndex;

/// 검색 결과 중 하나를 고르는 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    FirstResult,
    MostViewed { top_n: usize },
}

impl SelectionPolicy {
    pub fn from_config(config: &SearchConfig) -> Self {
        match config.policy {
            PolicyKind::FirstResult => SelectionPolicy::FirstResult,
            PolicyKind::MostViewed => SelectionPolicy::MostViewed {
                top_n: config.top_n.max(1),
            },
        }
    }

    fn limit(&self) -> usize {
        match self {
            SelectionPolicy::FirstResult => 1,
            SelectionPolicy::MostViewed { top_n } => *top_n,
        }
    }

    /// Pick one candidate. Ties on view count keep the earliest candidate.
    pub fn select<'a>(&self, candidates: &'a [VideoCandidate]) -> Option<&'a VideoCandidate> {
        match self {
            SelectionPolicy::FirstResult => candidates.first(),
            SelectionPolicy::MostViewed { .. } => {
                let mut best: Option<(&VideoCandidate, u64)> = None;
                for candidate in candidates {
                    let views = candidate
                        .view_count_text
                        .as_deref()
                        .map(parse_view_count)
                        .unwrap_or(0);
                    match best {
                        Some((_, best_views)) if views <= best_views => {}
                        _ => best = Some((candidate, views)),
                    }
                }
                best.map(|(candidate, _)| candidate)
            }
        }
    }
}

/// Parse a view-count label such as `"1,234 views"`, `"1 234 567 vues"`,
/// `"1.2M views"` or `"987K"`. Anything unparseable counts as zero.
pub fn parse_view_count(text: &str) -> u64 {
    let text = text.trim();
    let (number, rest) = text.split_at(leading_number_len(text));
    if !number.starts_with(|c: char| c.is_ascii_digit()) {
        return 0;
    }

    let multiplier = match rest.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('K') => 1_000f64,
        Some('M') => 1_000_000f64,
        Some('B') => 1_000_000_000f64,
        _ => 1f64,
    };
    // "1.2 Million" 같은 단어는 접미사가 아니다.
    let suffixed = multiplier > 1.0 && !rest.chars().nth(1).is_some_and(char::is_alphabetic);

    if suffixed {
        // 축약형: "1.2M", "1,5K"
        if number.chars().any(char::is_whitespace) {
            return 0;
        }
        let normalized = number.replace(',', ".");
        return match normalized.parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 => (n * multiplier).round() as u64,
            _ => 0,
        };
    }

    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// 앞쪽의 숫자와 자릿수 구분자(`,` `.` `'`, 숫자 사이의 공백) 길이.
fn leading_number_len(text: &str) -> usize {
    let mut end = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let separator_space = c.is_whitespace()
            && end > 0
            && chars.peek().is_some_and(|(_, next)| next.is_ascii_digit());
        if c.is_ascii_digit() || matches!(c, ',' | '.' | '\'') || separator_space {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// `"{name} {artists}"`, optionally followed by the playlist name.
pub fn build_query(track: &Track, playlist_name: Option<&str>) -> String {
    let mut parts = vec![track.name.clone()];
    let artists = track.artist_line();
    if !artists.is_empty() {
        parts.push(artists);
    }
    if let Some(name) = playlist_name.filter(|n| !n.trim().is_empty()) {
        parts.push(name.trim().to_string());
    }
    parts.join(" ")
}

/// 트랙마다 동영상 링크를 하나씩 찾는다. 검색 사이에는 고정 지연을 둔다.
pub struct MatchResolver<'a, I: VideoIndex, P: Pacer> {
    index: &'a I,
    pacer: &'a P,
    policy: SelectionPolicy,
    pause: Duration,
    include_playlist_name: bool,
}

impl<'a, I: VideoIndex, P: Pacer> MatchResolver<'a, I, P> {
    pub fn new(index: &'a I, pacer: &'a P, config: &SearchConfig) -> Self {
        Self {
            index,
            pacer,
            policy: SelectionPolicy::from_config(config),
            pause: Duration::from_millis(config.pause_ms),
            include_playlist_name: config.include_playlist_name,
        }
    }

    /// 검색어 하나를 결과로 바꾼다. 실패는 결과 값에 담기며 에러를 던지지 않는다.
    pub fn resolve(&self, query: &str) -> MatchResult {
        log::debug!("searching YouTube for: {}", query);
        let candidates = match self.index.search(query, self.policy.limit()) {
            Ok(c) => c,
            Err(e) => {
                log::error!("error searching YouTube for query '{}': {:#}", query, e);
                return MatchResult::Error(e.to_string());
            }
        };

        match self.policy.select(&candidates) {
            Some(best) => {
                log::info!(
                    "using video: {} (view count: {})",
                    best.title,
                    best.view_count_text.as_deref().unwrap_or("Unknown")
                );
                MatchResult::Found(best.link.clone())
            }
            None => {
                log::warn!("no video link found for query: {}", query);
                MatchResult::NotFound
            }
        }
    }

    pub fn resolve_all(&self, playlist: &mut Playlist) {
        let context = if self.include_playlist_name {
            Some(playlist.name.clone())
        } else {
            None
        };
        let total = playlist.tracks.len();
        log::info!("fetching YouTube URLs for {} tracks...", total);

        for (i, track) in playlist.tracks.iter_mut().enumerate() {
            if i > 0 {
                self.pacer.pause(self.pause);
            }
            let query = build_query(track, context.as_deref());
            let result = self.resolve(&query);
            track.attach_match(result);

            if (i + 1) % 10 == 0 {
                log::info!("processed {} / {} tracks", i + 1, total);
            }
        }
    }
}
