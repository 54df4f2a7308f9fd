use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::{Browser, Element, LaunchOptions, Tab};

const INITIAL_POLL: Duration = Duration::from_millis(100);
const MAX_POLL: Duration = Duration::from_secs(2);

/// 페이지 요소 위치 지정자.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    Css(&'static str),
    XPath(&'static str),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css `{}`", s),
            Locator::XPath(s) => write!(f, "xpath `{}`", s),
        }
    }
}

/// 브라우저 세션 트레이트.
/// 변환 사이트 조작과 페이지 스크래핑에 필요한 최소한의 동작만 노출한다.
/// 창(탭)은 불투명한 핸들 문자열로 식별한다.
pub trait BrowserSession {
    fn navigate(&self, url: &str) -> Result<()>;
    /// 요소가 지금 존재하는지 확인한다. 기다리지 않는다.
    fn is_present(&self, locator: &Locator) -> Result<bool>;
    fn type_into(&self, locator: &Locator, text: &str) -> Result<()>;
    fn click(&self, locator: &Locator) -> Result<()>;
    fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>>;
    fn page_source(&self) -> Result<String>;
    fn current_window(&self) -> Result<String>;
    fn window_handles(&self) -> Result<Vec<String>>;
    fn close_window(&self, handle: &str) -> Result<()>;
    fn switch_to(&self, handle: &str) -> Result<()>;
}

/// 고정 지연과 폴링 간격을 담당한다. 테스트에서는 실제로 잠들지 않는 구현을 쓴다.
pub trait Pacer {
    fn pause(&self, duration: Duration);
}

pub struct SleepPacer;

impl Pacer for SleepPacer {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Poll `check` with exponential backoff until it returns true or `timeout`
/// worth of pauses has elapsed. Returns `Ok(false)` on timeout.
pub fn poll_until<P, F>(pacer: &P, timeout: Duration, mut check: F) -> Result<bool>
where
    P: Pacer + ?Sized,
    F: FnMut() -> Result<bool>,
{
    let mut waited = Duration::ZERO;
    let mut delay = INITIAL_POLL;

    loop {
        if check()? {
            return Ok(true);
        }
        if waited >= timeout {
            return Ok(false);
        }
        let step = delay.min(timeout - waited);
        pacer.pause(step);
        waited += step;
        delay = (delay * 2).min(MAX_POLL);
    }
}

/// Wait until `locator` is present in the current window.
pub fn wait_for<B, P>(session: &B, pacer: &P, locator: &Locator, timeout: Duration) -> Result<bool>
where
    B: BrowserSession + ?Sized,
    P: Pacer + ?Sized,
{
    poll_until(pacer, timeout, || session.is_present(locator))
}

/// headless_chrome 기반 세션. 드롭되면 브라우저 프로세스도 종료된다.
pub struct ChromeSession {
    browser: Browser,
    active: RefCell<Arc<Tab>>,
}

impl ChromeSession {
    pub fn launch(headless: bool) -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(headless)
            .window_size(Some((1280, 900)))
            .idle_browser_timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| anyhow!("브라우저 옵션 생성에 실패했습니다: {}", e))?;

        let browser = Browser::new(options).context("브라우저를 실행할 수 없습니다")?;
        let tab = browser.new_tab().context("브라우저 탭을 열 수 없습니다")?;
        log::debug!("browser launched (headless: {})", headless);

        Ok(Self {
            browser,
            active: RefCell::new(tab),
        })
    }

    fn tab(&self) -> Arc<Tab> {
        self.active.borrow().clone()
    }

    fn tabs(&self) -> Result<Vec<Arc<Tab>>> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("탭 목록 잠금이 손상되었습니다"))?;
        Ok(tabs.clone())
    }

    fn find_tab(&self, handle: &str) -> Result<Arc<Tab>> {
        self.tabs()?
            .into_iter()
            .find(|t| t.get_target_id().as_str() == handle)
            .with_context(|| format!("창을 찾을 수 없습니다: {}", handle))
    }

    fn with_element<R>(
        &self,
        locator: &Locator,
        f: impl FnOnce(&Element<'_>) -> Result<R>,
    ) -> Result<R> {
        let tab = self.tab();
        let element = match locator {
            Locator::Css(css) => tab.find_element(css),
            Locator::XPath(xpath) => tab.find_element_by_xpath(xpath),
        }
        .with_context(|| format!("요소를 찾을 수 없습니다: {}", locator))?;
        f(&element)
    }
}

/// "요소 없음"만 부재로 보고, 그 밖의 실패(끊긴 탭, 죽은 브라우저)는 에러로 돌려준다.
fn presence(lookup: Result<()>) -> Result<bool> {
    match lookup {
        Ok(()) => Ok(true),
        Err(e) if e.downcast_ref::<NoElementFound>().is_some() => Ok(false),
        Err(e) => Err(e),
    }
}

impl BrowserSession for ChromeSession {
    fn navigate(&self, url: &str) -> Result<()> {
        self.tab()
            .navigate_to(url)
            .with_context(|| format!("페이지 이동에 실패했습니다: {}", url))?
            .wait_until_navigated()
            .with_context(|| format!("페이지 로딩에 실패했습니다: {}", url))?;
        Ok(())
    }

    fn is_present(&self, locator: &Locator) -> Result<bool> {
        let tab = self.tab();
        let lookup = match locator {
            Locator::Css(css) => tab.find_element(css).map(|_| ()),
            Locator::XPath(xpath) => tab.find_element_by_xpath(xpath).map(|_| ()),
        };
        presence(lookup).with_context(|| format!("요소를 확인할 수 없습니다: {}", locator))
    }

    fn type_into(&self, locator: &Locator, text: &str) -> Result<()> {
        self.with_element(locator, |el| {
            el.click()?;
            el.type_into(text)?;
            Ok(())
        })
    }

    fn click(&self, locator: &Locator) -> Result<()> {
        self.with_element(locator, |el| {
            el.click()?;
            Ok(())
        })
    }

    fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>> {
        self.with_element(locator, |el| el.get_attribute_value(name))
    }

    fn page_source(&self) -> Result<String> {
        self.tab().get_content().context("페이지 소스를 읽을 수 없습니다")
    }

    fn current_window(&self) -> Result<String> {
        Ok(self.tab().get_target_id().to_string())
    }

    fn window_handles(&self) -> Result<Vec<String>> {
        Ok(self
            .tabs()?
            .iter()
            .map(|t| t.get_target_id().to_string())
            .collect())
    }

    fn close_window(&self, handle: &str) -> Result<()> {
        let tab = self.find_tab(handle)?;
        tab.close(true)
            .with_context(|| format!("창을 닫을 수 없습니다: {}", handle))?;
        Ok(())
    }

    fn switch_to(&self, handle: &str) -> Result<()> {
        let tab = self.find_tab(handle)?;
        tab.activate().context("창 전환에 실패했습니다")?;
        *self.active.borrow_mut() = tab;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingPacer;
    use super::*;

    #[test]
    fn test_poll_until_immediate() {
        let pacer = RecordingPacer::default();
        let ok = poll_until(&pacer, Duration::from_secs(2), || Ok(true)).unwrap();
        assert!(ok);
        assert_eq!(pacer.calls.get(), 0);
    }

    #[test]
    fn test_poll_until_times_out_within_budget() {
        let pacer = RecordingPacer::default();
        let ok = poll_until(&pacer, Duration::from_secs(2), || Ok(false)).unwrap();
        assert!(!ok);
        assert_eq!(pacer.total(), Duration::from_secs(2));
        // 100 + 200 + 400 + 800 + 500(남은 시간)
        assert_eq!(pacer.calls.get(), 5);
    }

    #[test]
    fn test_poll_until_backoff_caps() {
        let pacer = RecordingPacer::default();
        poll_until(&pacer, Duration::from_secs(60), || Ok(false)).unwrap();
        let pauses = pacer.pauses.borrow();
        assert_eq!(pauses[0], Duration::from_millis(100));
        assert_eq!(pauses[1], Duration::from_millis(200));
        assert!(pauses.iter().all(|p| *p <= Duration::from_secs(2)));
        assert_eq!(pacer.total(), Duration::from_secs(60));
    }

    #[test]
    fn test_poll_until_succeeds_after_retries() {
        let pacer = RecordingPacer::default();
        let mut attempts = 0;
        let ok = poll_until(&pacer, Duration::from_secs(10), || {
            attempts += 1;
            Ok(attempts >= 3)
        })
        .unwrap();
        assert!(ok);
        assert_eq!(pacer.calls.get(), 2);
    }

    #[test]
    fn test_poll_until_propagates_errors() {
        let pacer = RecordingPacer::default();
        let result = poll_until(&pacer, Duration::from_secs(1), || {
            Err(anyhow::anyhow!("browser gone"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_presence_only_hides_missing_elements() {
        assert!(presence(Ok(())).unwrap());
        assert!(!presence(Err(NoElementFound {}.into())).unwrap());
        assert!(presence(Err(anyhow!("connection is closed"))).is_err());
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::Css("#url").to_string(), "css `#url`");
        assert_eq!(
            Locator::XPath("//a[text()='Download']").to_string(),
            "xpath `//a[text()='Download']`"
        );
    }

    #[test]
    #[ignore]
    fn test_chrome_session_navigates() {
        let session = ChromeSession::launch(true).expect("브라우저 실행 실패");
        session.navigate("https://example.com").expect("이동 실패");
        assert!(session.is_present(&Locator::Css("h1")).unwrap());
        assert_eq!(session.window_handles().unwrap().len(), 1);
    }
}
