use std::fmt;

/// 트랙 번호/위치가 없을 때 표시하는 자리표시자.
pub const UNKNOWN: &str = "Unknown";

/// 검색 결과가 없을 때의 센티널 문자열.
pub const NO_VIDEO_FOUND: &str = "No YouTube URL found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Found(String),
    NotFound,
    Error(String),
}

impl MatchResult {
    pub fn link(&self) -> Option<&str> {
        match self {
            MatchResult::Found(link) => Some(link),
            _ => None,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::Found(link) => f.write_str(link),
            MatchResult::NotFound => f.write_str(NO_VIDEO_FOUND),
            MatchResult::Error(msg) => write!(f, "Error searching YouTube: {}", msg),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Track {
    pub name: String,
    pub artists: Vec<String>,
    pub position: Option<u32>,
    pub matched: Option<MatchResult>,
}

impl Track {
    pub fn new(name: impl Into<String>, artists: Vec<String>, position: Option<u32>) -> Self {
        Self {
            name: name.into(),
            artists,
            position,
            matched: None,
        }
    }

    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }

    pub fn display_position(&self) -> String {
        self.position
            .map(|p| p.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// 검색 결과를 붙인다. 한 트랙에는 한 번만 붙일 수 있다.
    pub fn attach_match(&mut self, result: MatchResult) {
        if self.matched.is_some() {
            log::debug!("track '{}' already has a match, ignoring", self.name);
            return;
        }
        self.matched = Some(result);
    }

    pub fn video_link(&self) -> Option<&str> {
        self.matched.as_ref().and_then(MatchResult::link)
    }

    pub fn display_match(&self) -> String {
        self.matched
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    pub fn summary(&self) -> String {
        format!("{} - {}", self.artist_line(), self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    pub name: String,
    pub curator: Option<String>,
    pub tracks: Vec<Track>,
}

/// 선택 목록에 표시할 플레이리스트 요약.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
}

/// 동영상 검색 결과 한 건.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoCandidate {
    pub link: String,
    pub title: String,
    pub view_count_text: Option<String>,
}
