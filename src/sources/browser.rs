//! Headless Chrome page source.
//!
//! The search result list loads more items as the page scrolls, and the purchase options
//! only exist after the purchase button mounts its modal, so neither is present in the
//! server-rendered HTML. This source drives Chrome through the DevTools protocol and hands
//! the rendered DOM to the same parsers the HTTP source feeds.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::YeoshinError;
use crate::sources::PageSource;
use crate::sources::yeoshin::{SessionCookies, YEOSHIN_BASE, YEOSHIN_BASE_ENV, search_url};
use crate::transform::event::{OPTION_LIST, PURCHASE_SECTION};

pub(crate) const CHROME_PATH_ENV: &str = "YEOSHIN_CHROME_PATH";

/// Pause after navigation for client-side rendering to finish.
const SETTLE: Duration = Duration::from_secs(2);
const SCROLL_ROUNDS: usize = 5;
const SCROLL_PAUSE: Duration = Duration::from_secs(3);
const MODAL_TIMEOUT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(250);

fn browser_err(err: impl std::fmt::Display) -> YeoshinError {
    YeoshinError::Browser(err.to_string())
}

fn js_string(value: &str) -> Result<String, YeoshinError> {
    Ok(serde_json::to_string(value)?)
}

/// Clicks the purchase button: the second button of the bottom section when there are
/// several, the only one otherwise. Evaluates to whether a button was clicked.
fn click_purchase_script() -> Result<String, YeoshinError> {
    Ok(format!(
        "(function () {{ \
            const section = document.querySelector({section}); \
            if (!section) return false; \
            const buttons = section.querySelectorAll('button'); \
            const target = buttons.length >= 2 ? buttons[1] : buttons[0]; \
            if (!target) return false; \
            target.click(); \
            return true; \
        }})()",
        section = js_string(PURCHASE_SECTION)?
    ))
}

/// Evaluates to whether the option list container has mounted.
fn options_mounted_script() -> Result<String, YeoshinError> {
    let checks = OPTION_LIST
        .iter()
        .map(|css| js_string(css).map(|css| format!("document.querySelector({css}) !== null")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(checks.join(" || "))
}

const SCROLL_SCRIPT: &str =
    "window.scrollTo(0, document.body.scrollHeight); document.body.scrollHeight";

async fn eval<T: DeserializeOwned>(page: &Page, script: &str) -> Result<T, YeoshinError> {
    page.evaluate_expression(EvaluateParams::new(script))
        .await
        .map_err(browser_err)?
        .into_value()
        .map_err(browser_err)
}

async fn close_page(page: Page) {
    if let Err(err) = page.close().await {
        debug!("Closing browser tab failed: {err}");
    }
}

/// Scrolls until the document stops growing or the round limit is reached.
async fn scroll_to_end(page: &Page) -> Result<(), YeoshinError> {
    let mut height: u64 = eval(page, "document.body.scrollHeight").await?;
    for round in 1..=SCROLL_ROUNDS {
        eval::<u64>(page, SCROLL_SCRIPT).await?;
        sleep(SCROLL_PAUSE).await;
        let next: u64 = eval(page, "document.body.scrollHeight").await?;
        debug!(round, height = next, "Scrolled result list");
        if next <= height {
            break;
        }
        height = next;
    }
    Ok(())
}

/// Opens the purchase modal and waits for its option list.
async fn open_options(page: &Page) -> Result<bool, YeoshinError> {
    let clicked: bool = eval(page, &click_purchase_script()?).await?;
    if !clicked {
        warn!("Purchase button not found; options unavailable");
        return Ok(false);
    }

    let mounted = options_mounted_script()?;
    let deadline = Instant::now() + MODAL_TIMEOUT;
    loop {
        if eval::<bool>(page, &mounted).await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            warn!("Option list did not appear after clicking purchase");
            return Ok(false);
        }
        sleep(POLL).await;
    }
}

pub struct BrowserSource {
    browser: Browser,
    handler: JoinHandle<()>,
    base: String,
    cookies: SessionCookies,
}

impl BrowserSource {
    /// Starts headless Chrome (`YEOSHIN_CHROME_PATH` overrides auto-detection).
    pub async fn launch() -> Result<Self, YeoshinError> {
        let base = crate::sources::env_base(YEOSHIN_BASE, YEOSHIN_BASE_ENV)
            .trim_end_matches('/')
            .to_string();
        let cookies = SessionCookies::from_env();

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .request_timeout(Duration::from_secs(60))
            .arg(format!("--user-agent={}", crate::sources::BROWSER_USER_AGENT))
            .arg("--lang=ko-KR");
        if let Some(path) = crate::sources::env_value(CHROME_PATH_ENV) {
            builder = builder.chrome_executable(PathBuf::from(path));
        }
        let config = builder
            .build()
            .map_err(|err| YeoshinError::Browser(format!("Invalid browser config: {err}")))?;

        let (browser, mut events) = Browser::launch(config).await.map_err(|err| {
            YeoshinError::Browser(format!(
                "Chrome could not be started ({err}). Install Chrome or Chromium, or point \
                 {CHROME_PATH_ENV} at its executable"
            ))
        })?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(err) = event {
                    debug!("Browser event error: {err}");
                }
            }
        });
        info!("Headless browser started");

        Ok(Self {
            browser,
            handler,
            base,
            cookies,
        })
    }

    pub async fn close(mut self) {
        if let Err(err) = self.browser.close().await {
            warn!("Browser shutdown failed: {err}");
        }
        self.handler.abort();
    }

    fn cookie_params(&self) -> Result<Vec<CookieParam>, YeoshinError> {
        self.cookies
            .pairs()
            .map(|(name, value)| {
                CookieParam::builder()
                    .name(name)
                    .value(value)
                    .url(self.base.clone())
                    .build()
                    .map_err(YeoshinError::Browser)
            })
            .collect()
    }

    /// New tab with the session cookies, navigated to `url` and settled.
    async fn open(&self, url: &str) -> Result<Page, YeoshinError> {
        let parsed = Url::parse(url)
            .map_err(|err| YeoshinError::InvalidArgument(format!("Invalid page URL {url}: {err}")))?;
        crate::sources::rate_limit::global_limiter()
            .acquire(&parsed)
            .await;

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(browser_err)?;
        let ready = async {
            if !self.cookies.is_empty() {
                page.set_cookies(self.cookie_params()?)
                    .await
                    .map_err(browser_err)?;
            }
            page.goto(url).await.map_err(browser_err)?;
            page.wait_for_navigation().await.map_err(browser_err)?;
            Ok::<(), YeoshinError>(())
        }
        .await;
        if let Err(err) = ready {
            close_page(page).await;
            return Err(err);
        }
        sleep(SETTLE).await;
        Ok(page)
    }

    async fn rendered(page: Page, prepared: Result<(), YeoshinError>) -> Result<String, YeoshinError> {
        let html = match prepared {
            Ok(()) => page.content().await.map_err(browser_err),
            Err(err) => Err(err),
        };
        close_page(page).await;
        html
    }
}

#[async_trait::async_trait]
impl PageSource for BrowserSource {
    fn base(&self) -> &str {
        &self.base
    }

    fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    async fn my_page(&self) -> Result<String, YeoshinError> {
        let page = self.open(&self.absolute_url("myPage")).await?;
        Self::rendered(page, Ok(())).await
    }

    async fn search_page(&self, keyword: &str) -> Result<String, YeoshinError> {
        let url = search_url(&self.base, keyword)?;
        let page = self.open(url.as_str()).await?;
        let scrolled = scroll_to_end(&page).await;
        Self::rendered(page, scrolled).await
    }

    async fn event_page(&self, link: &str) -> Result<String, YeoshinError> {
        let page = self.open(&self.absolute_url(link)).await?;
        // Without the modal the page still yields the event fields and a default option row.
        let opened = open_options(&page).await.map(|_| ());
        Self::rendered(page, opened).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_script_targets_purchase_section_and_second_button() {
        let script = click_purchase_script().unwrap();
        assert!(script.contains(r##"document.querySelector("#ct-view > div > div > section")"##));
        assert!(script.contains("buttons.length >= 2 ? buttons[1] : buttons[0]"));
        assert!(script.starts_with("(function () {"));
    }

    #[test]
    fn options_check_covers_every_container_candidate() {
        let script = options_mounted_script().unwrap();
        assert_eq!(script.matches("document.querySelector(").count(), OPTION_LIST.len());
        assert!(script.contains(&js_string(OPTION_LIST[0]).unwrap()));
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a[href*="x"]"#).unwrap(), r#""a[href*=\"x\"]""#);
    }
}
