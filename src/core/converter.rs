use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConverterConfig;
use crate::core::browser::{poll_until, wait_for, BrowserSession, Locator, Pacer};
use crate::models::Playlist;

const URL_INPUT: Locator = Locator::Css("#url");
const SUBMIT_BUTTON: Locator = Locator::Css("input[type='submit']");
const DOWNLOAD_LINK: Locator = Locator::XPath("//a[text()='Download']");

/// 변환 사이트 조작 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    SiteLoaded,
    UrlSubmitted,
    AwaitingDownloadLink,
    DownloadClicked,
    TabOpened,
    TabClosed,
    Done,
    Error,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Idle => "idle",
            DriverState::SiteLoaded => "site_loaded",
            DriverState::UrlSubmitted => "url_submitted",
            DriverState::AwaitingDownloadLink => "awaiting_download_link",
            DriverState::DownloadClicked => "download_clicked",
            DriverState::TabOpened => "tab_opened",
            DriverState::TabClosed => "tab_closed",
            DriverState::Done => "done",
            DriverState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out after {timeout:?} waiting for {what} (state: {state})")]
    Timeout {
        state: DriverState,
        what: String,
        timeout: Duration,
    },

    #[error("missing {what} (state: {state})")]
    MissingElement { state: DriverState, what: String },

    #[error("browser error (state: {state}): {source:#}")]
    Browser {
        state: DriverState,
        source: anyhow::Error,
    },
}

impl DriverError {
    /// 실패 직전에 도달해 있던 상태.
    pub fn state(&self) -> DriverState {
        match self {
            DriverError::Timeout { state, .. }
            | DriverError::MissingElement { state, .. }
            | DriverError::Browser { state, .. } => *state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOutcome {
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverTimings {
    pub input_timeout: Duration,
    pub settle: Duration,
    pub download_timeout: Duration,
    pub tab_timeout: Duration,
    pub inter_track_delay: Duration,
}

impl From<&ConverterConfig> for DriverTimings {
    fn from(config: &ConverterConfig) -> Self {
        Self {
            input_timeout: Duration::from_secs(config.input_timeout_secs),
            settle: Duration::from_secs(config.settle_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            tab_timeout: Duration::from_secs(config.tab_timeout_secs),
            inter_track_delay: Duration::from_secs(config.inter_track_delay_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFailure {
    pub track: String,
    pub state: DriverState,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failures: Vec<TrackFailure>,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// 변환 사이트를 한 트랙씩 조작하는 상태 기계.
/// 세션은 실행 동안 하나만 쓰고, 트랙 하나의 실패가 전체 실행을 멈추지 않는다.
pub struct ConverterDriver<'a, B: BrowserSession + ?Sized, P: Pacer + ?Sized> {
    session: &'a B,
    pacer: &'a P,
    site_url: String,
    timings: DriverTimings,
    state: DriverState,
    /// 변환 사이트를 연 원래 창. 실패한 트랙 뒤에 이 창으로 돌아온다.
    home: Option<String>,
}

impl<'a, B: BrowserSession + ?Sized, P: Pacer + ?Sized> ConverterDriver<'a, B, P> {
    pub fn new(session: &'a B, pacer: &'a P, config: &ConverterConfig) -> Self {
        Self {
            session,
            pacer,
            site_url: config.url.clone(),
            timings: DriverTimings::from(config),
            state: DriverState::Idle,
            home: None,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn advance(&mut self, next: DriverState) {
        log::debug!("converter: {} -> {}", self.state, next);
        self.state = next;
    }

    fn browser_err(&self, source: anyhow::Error) -> DriverError {
        DriverError::Browser {
            state: self.state,
            source,
        }
    }

    fn wait_element(&self, locator: &Locator, timeout: Duration) -> Result<(), DriverError> {
        let found = wait_for(self.session, self.pacer, locator, timeout)
            .map_err(|e| self.browser_err(e))?;
        if found {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                state: self.state,
                what: locator.to_string(),
                timeout,
            })
        }
    }

    /// 동영상 링크 하나를 변환하고 다운로드를 시작한다.
    /// 실패하면 상태는 `Error`가 되고, 실패한 단계가 에러에 담긴다.
    pub fn convert(&mut self, video_link: &str) -> Result<ConversionOutcome, DriverError> {
        self.state = DriverState::Idle;
        let result = self.drive(video_link);
        if result.is_err() {
            self.state = DriverState::Error;
            self.return_home();
        }
        result
    }

    /// 실패한 트랙이 팝업 창에 포커스를 남겼다면 원래 창으로 되돌린다.
    fn return_home(&self) {
        let home = match self.home.as_deref() {
            Some(home) => home,
            None => return,
        };
        match self.session.current_window() {
            Ok(current) if current == home => {}
            _ => {
                if let Err(e) = self.session.switch_to(home) {
                    log::warn!("cannot switch back to converter window {}: {:#}", home, e);
                }
            }
        }
    }

    fn drive(&mut self, video_link: &str) -> Result<ConversionOutcome, DriverError> {
        let session = self.session;

        // idle -> site_loaded
        session
            .navigate(&self.site_url)
            .map_err(|e| self.browser_err(e))?;
        let original = session
            .current_window()
            .map_err(|e| self.browser_err(e))?;
        self.home = Some(original.clone());
        self.advance(DriverState::SiteLoaded);

        // site_loaded -> url_submitted
        self.wait_element(&URL_INPUT, self.timings.input_timeout)?;
        session
            .type_into(&URL_INPUT, video_link)
            .map_err(|e| self.browser_err(e))?;
        if !session
            .is_present(&SUBMIT_BUTTON)
            .map_err(|e| self.browser_err(e))?
        {
            return Err(DriverError::MissingElement {
                state: self.state,
                what: SUBMIT_BUTTON.to_string(),
            });
        }
        session
            .click(&SUBMIT_BUTTON)
            .map_err(|e| self.browser_err(e))?;
        self.advance(DriverState::UrlSubmitted);

        // url_submitted -> awaiting_download_link
        self.pacer.pause(self.timings.settle);
        self.advance(DriverState::AwaitingDownloadLink);
        self.wait_element(&DOWNLOAD_LINK, self.timings.download_timeout)?;

        // awaiting_download_link -> download_clicked
        let download_url = session
            .attribute(&DOWNLOAD_LINK, "href")
            .map_err(|e| self.browser_err(e))?;
        log::info!(
            "download URL: {}",
            download_url.as_deref().unwrap_or("(none)")
        );
        let before = session.window_handles().map_err(|e| self.browser_err(e))?;
        session
            .click(&DOWNLOAD_LINK)
            .map_err(|e| self.browser_err(e))?;
        self.advance(DriverState::DownloadClicked);

        // download_clicked -> tab_opened
        let mut opened: Option<String> = None;
        let appeared = poll_until(self.pacer, self.timings.tab_timeout, || {
            let handles = session.window_handles()?;
            opened = handles.into_iter().find(|h| !before.contains(h));
            Ok(opened.is_some())
        })
        .map_err(|e| self.browser_err(e))?;
        let opened = match opened {
            Some(handle) if appeared => handle,
            _ => {
                return Err(DriverError::Timeout {
                    state: self.state,
                    what: "a new browser tab".to_string(),
                    timeout: self.timings.tab_timeout,
                })
            }
        };
        self.advance(DriverState::TabOpened);

        // tab_opened -> tab_closed
        session
            .switch_to(&opened)
            .and_then(|_| {
                // 다운로드 팝업은 스스로 닫히기도 한다.
                if session.window_handles()?.contains(&opened) {
                    session.close_window(&opened)
                } else {
                    log::debug!("tab {} already closed", opened);
                    Ok(())
                }
            })
            .and_then(|_| session.switch_to(&original))
            .map_err(|e| self.browser_err(e))?;
        self.advance(DriverState::TabClosed);

        self.advance(DriverState::Done);
        Ok(ConversionOutcome { download_url })
    }

    /// 플레이리스트 전체를 순서대로 처리한다.
    /// 링크가 없는 트랙은 건너뛰고, 시도한 트랙 뒤에는 결과와 무관하게 고정 지연을 둔다.
    pub fn run(&mut self, playlist: &Playlist) -> RunReport {
        let mut report = RunReport::default();

        for track in &playlist.tracks {
            let link = match track.video_link() {
                Some(link) => link,
                None => {
                    log::warn!(
                        "skipping track '{}' - no YouTube URL available ({})",
                        track.name,
                        track.display_match()
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            match self.convert(link) {
                Ok(_) => {
                    log::info!("download initiated for: {}", track.summary());
                    report.downloaded += 1;
                }
                Err(e) => {
                    log::error!("failed to initiate download for: {}. error: {}", track.name, e);
                    report.failures.push(TrackFailure {
                        track: track.name.clone(),
                        state: e.state(),
                        message: e.to_string(),
                    });
                }
            }

            log::debug!("track '{}' finished in state {}", track.name, self.state());
            self.pacer.pause(self.timings.inter_track_delay);
        }

        report
    }
}
