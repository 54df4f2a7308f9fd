use anyhow::{Context, Result};
use scraper::{Html, Selector};
use serde_json::Value;

use crate::models::VideoCandidate;
use crate::sources::VideoIndex;

const SEARCH_URL: &str = "https://www.youtube.com/results";
const INITIAL_DATA_MARKER: &str = "ytInitialData";

/// YouTube 검색 결과 페이지 스크래핑 클라이언트.
/// API 키 없이 결과 페이지에 포함된 `ytInitialData` JSON을 파싱한다.
pub struct YouTubeSearch {
    client: reqwest::blocking::Client,
}

impl YouTubeSearch {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .build()
            .context("YouTube HTTP 클라이언트 생성에 실패했습니다")?;

        Ok(Self { client })
    }
}

impl VideoIndex for YouTubeSearch {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoCandidate>> {
        let html = self
            .client
            .get(SEARCH_URL)
            .query(&[("search_query", query)])
            // 조회수 텍스트를 영어 형식("1,234 views")으로 받는다.
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .context("YouTube 검색에 실패했습니다")?
            .error_for_status()
            .context("YouTube 검색 요청이 실패했습니다")?
            .text()
            .context("YouTube 검색 응답 읽기에 실패했습니다")?;

        let mut results = parse_search_page(&html)?;
        results.truncate(limit);
        Ok(results)
    }
}

/// Extract video results, in page order, from a YouTube results page.
pub fn parse_search_page(html: &str) -> Result<Vec<VideoCandidate>> {
    let data = extract_initial_data(html).context("ytInitialData를 찾을 수 없습니다")?;

    let sections = data["contents"]["twoColumnSearchResultsRenderer"]["primaryContents"]
        ["sectionListRenderer"]["contents"]
        .as_array()
        .cloned()
        .unwrap_or_default();

    let results = sections
        .iter()
        .filter_map(|section| section["itemSectionRenderer"]["contents"].as_array())
        .flatten()
        .filter_map(|item| item.get("videoRenderer"))
        .filter_map(convert_video)
        .collect();

    Ok(results)
}

fn extract_initial_data(html: &str) -> Option<Value> {
    let document = Html::parse_document(html);
    let script_sel = Selector::parse("script").unwrap();

    document.select(&script_sel).find_map(|script| {
        let text = script.text().collect::<String>();
        let marker = text.find(INITIAL_DATA_MARKER)?;
        let rest = &text[marker..];
        let start = rest.find('{')?;
        let end = rest.rfind('}')?;
        if end < start {
            return None;
        }
        serde_json::from_str(&rest[start..=end]).ok()
    })
}

fn convert_video(renderer: &Value) -> Option<VideoCandidate> {
    let video_id = renderer["videoId"].as_str()?;
    Some(VideoCandidate {
        link: format!("https://www.youtube.com/watch?v={}", video_id),
        title: text_of(&renderer["title"]).unwrap_or_default(),
        view_count_text: text_of(&renderer["viewCountText"])
            .or_else(|| text_of(&renderer["shortViewCountText"])),
    })
}

/// YouTube text objects are either `{"simpleText": ..}` or `{"runs": [{"text": ..}, ..]}`.
fn text_of(value: &Value) -> Option<String> {
    if let Some(simple) = value["simpleText"].as_str() {
        return Some(simple.to_string());
    }
    let runs = value["runs"].as_array()?;
    let joined: String = runs.iter().filter_map(|r| r["text"].as_str()).collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(initial_data: &str) -> String {
        format!(
            "<html><head><script>var foo = 1;</script></head><body>\
             <script>var ytInitialData = {};</script></body></html>",
            initial_data
        )
    }

    const SAMPLE: &str = r#"{
      "contents": {"twoColumnSearchResultsRenderer": {"primaryContents": {"sectionListRenderer": {"contents": [
        {"itemSectionRenderer": {"contents": [
          {"adSlotRenderer": {}},
          {"videoRenderer": {
            "videoId": "abc123",
            "title": {"runs": [{"text": "IU - "}, {"text": "Blueming"}]},
            "viewCountText": {"simpleText": "12,345,678 views"}
          }},
          {"channelRenderer": {"channelId": "x"}},
          {"videoRenderer": {
            "videoId": "def456",
            "title": {"simpleText": "Blueming (Live)"},
            "shortViewCountText": {"simpleText": "1.2M views"}
          }}
        ]}},
        {"continuationItemRenderer": {}},
        {"itemSectionRenderer": {"contents": [
          {"videoRenderer": {"videoId": "ghi789", "title": {"runs": []}}}
        ]}}
      ]}}}}
    }"#;

    #[test]
    fn test_parse_search_page_keeps_order() {
        let results = parse_search_page(&page(SAMPLE)).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].link, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(results[0].title, "IU - Blueming");
        assert_eq!(results[0].view_count_text.as_deref(), Some("12,345,678 views"));
        assert_eq!(results[1].title, "Blueming (Live)");
        assert_eq!(results[1].view_count_text.as_deref(), Some("1.2M views"));
        assert_eq!(results[2].title, "");
        assert!(results[2].view_count_text.is_none());
    }

    #[test]
    fn test_parse_search_page_without_results() {
        let results = parse_search_page(&page(r#"{"contents": {}}"#)).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_parse_search_page_without_initial_data() {
        assert!(parse_search_page("<html><body>nothing</body></html>").is_err());
    }

    #[test]
    #[ignore]
    fn test_live_search() {
        let search = YouTubeSearch::new().expect("클라이언트 생성 실패");
        let results = search.search("Metallica Enter Sandman", 5).expect("검색 실패");
        assert!(!results.is_empty(), "검색 결과가 없음");
        assert!(results.len() <= 5);
        println!("{:?}", results[0]);
    }
}
