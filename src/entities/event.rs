use std::path::Path;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::YeoshinError;
use crate::sources::browser::BrowserSource;
use crate::sources::yeoshin::YeoshinClient;
use crate::sources::{FetchMode, PageSource};
use crate::transform::event::{LoginState, event_links, event_rows, login_state};

pub const NO_HOSPITAL: &str = "정보 없음";
pub const NO_LOCATION: &str = "위치 정보 없음";
pub const NO_EVENT: &str = "이벤트 정보 없음";
pub const NO_OPTION: &str = "옵션 정보 없음";
pub const NO_PRICE: &str = "가격 정보 없음";
pub const NOT_AVAILABLE: &str = "N/A";

const DEFAULT_CONCURRENCY: usize = 2;
const MAX_CONCURRENCY: usize = 8;

/// One row per (event, option). Events without options produce a single row with option defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub exposure_order: usize,
    pub hospital_name: String,
    pub location: String,
    pub event_name: String,
    pub option_name: String,
    pub price: String,
    pub rating: String,
    pub review_count: String,
    pub scrap_count: String,
    pub inquiry_count: String,
    pub detail_link: String,
}

impl EventRecord {
    pub fn placeholder(exposure_order: usize, detail_link: &str) -> Self {
        let link = detail_link.trim();
        Self {
            exposure_order,
            hospital_name: NO_HOSPITAL.into(),
            location: NO_LOCATION.into(),
            event_name: NO_EVENT.into(),
            option_name: NO_OPTION.into(),
            price: NO_PRICE.into(),
            rating: NOT_AVAILABLE.into(),
            review_count: NOT_AVAILABLE.into(),
            scrap_count: NOT_AVAILABLE.into(),
            inquiry_count: NOT_AVAILABLE.into(),
            detail_link: if link.is_empty() {
                NOT_AVAILABLE.into()
            } else {
                link.to_string()
            },
        }
    }

    pub fn with_option(&self, option_name: String, price: String) -> Self {
        Self {
            option_name,
            price,
            ..self.clone()
        }
    }
}

/// Display columns in report order: (field key, Korean label).
pub const COLUMNS: [(&str, &str); 10] = [
    ("hospital_name", "병원명"),
    ("location", "위치"),
    ("event_name", "이벤트명"),
    ("option_name", "옵션명"),
    ("price", "가격"),
    ("rating", "평점"),
    ("review_count", "리뷰수"),
    ("scrap_count", "스크랩수"),
    ("inquiry_count", "문의수"),
    ("detail_link", "상세링크"),
];

impl EventRecord {
    pub fn field(&self, key: &str) -> &str {
        match key {
            "hospital_name" => &self.hospital_name,
            "location" => &self.location,
            "event_name" => &self.event_name,
            "option_name" => &self.option_name,
            "price" => &self.price,
            "rating" => &self.rating,
            "review_count" => &self.review_count,
            "scrap_count" => &self.scrap_count,
            "inquiry_count" => &self.inquiry_count,
            "detail_link" => &self.detail_link,
            _ => NOT_AVAILABLE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub limit: Option<usize>,
    pub concurrency: usize,
    pub fetch: FetchMode,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            limit: None,
            concurrency: DEFAULT_CONCURRENCY,
            fetch: FetchMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginReport {
    pub state: LoginState,
    pub cookies: Vec<String>,
}

impl LoginReport {
    pub fn to_markdown(&self) -> String {
        let status = match self.state {
            LoginState::LoggedIn => "logged in",
            LoginState::LoggedOut => "logged out",
            LoginState::Unknown => "unknown",
        };
        let cookies = if self.cookies.is_empty() {
            "(none)".to_string()
        } else {
            self.cookies.join(", ")
        };
        format!("# Yeoshin Login Check\n\nStatus: {status}\nSession cookies: {cookies}\n")
    }
}

pub async fn login_check(fetch: FetchMode) -> Result<LoginReport, YeoshinError> {
    match fetch {
        FetchMode::Http => login_check_with(&YeoshinClient::new()?).await,
        FetchMode::Browser => {
            let source = BrowserSource::launch().await?;
            let report = login_check_with(&source).await;
            source.close().await;
            report
        }
    }
}

pub(crate) async fn login_check_with(client: &dyn PageSource) -> Result<LoginReport, YeoshinError> {
    let cookies = client
        .cookies()
        .names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if client.cookies().is_empty() {
        return Ok(LoginReport {
            state: LoginState::LoggedOut,
            cookies,
        });
    }
    let html = client.my_page().await?;
    Ok(LoginReport {
        state: login_state(&html),
        cookies,
    })
}

async fn ensure_logged_in(client: &dyn PageSource) -> Result<(), YeoshinError> {
    let report = login_check_with(client).await?;
    let reason = match report.state {
        LoginState::LoggedIn => {
            info!(cookies = ?report.cookies, "Login confirmed");
            return Ok(());
        }
        LoginState::LoggedOut if report.cookies.is_empty() => "no session cookies are set",
        LoginState::LoggedOut => "the login link is shown on /myPage",
        LoginState::Unknown => "could not determine the login state from /myPage",
    };
    Err(YeoshinError::NotLoggedIn {
        site: client.base().to_string(),
        reason: reason.to_string(),
    })
}

fn check_request<'a>(keyword: &'a str, opts: &ScrapeOptions) -> Result<&'a str, YeoshinError> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(YeoshinError::InvalidArgument(
            "Search keyword is required. Example: yeoshin search 보톡스".into(),
        ));
    }
    if opts.limit == Some(0) {
        return Err(YeoshinError::InvalidArgument(
            "--limit must be at least 1".into(),
        ));
    }
    Ok(keyword)
}

/// Runs the keyword search and collects one row per event option, in search order.
pub async fn scrape(keyword: &str, opts: &ScrapeOptions) -> Result<Vec<EventRecord>, YeoshinError> {
    let keyword = check_request(keyword, opts)?;
    match opts.fetch {
        FetchMode::Http => scrape_with(&YeoshinClient::new()?, keyword, opts).await,
        FetchMode::Browser => {
            let source = BrowserSource::launch().await?;
            let rows = scrape_with(&source, keyword, opts).await;
            source.close().await;
            rows
        }
    }
}

pub(crate) async fn scrape_with(
    client: &dyn PageSource,
    keyword: &str,
    opts: &ScrapeOptions,
) -> Result<Vec<EventRecord>, YeoshinError> {
    let keyword = check_request(keyword, opts)?;

    ensure_logged_in(client).await?;

    let html = client.search_page(keyword).await?;
    let Some(mut links) = event_links(&html) else {
        warn!(keyword, "Search result list not found on the page");
        return Ok(Vec::new());
    };
    if let Some(limit) = opts.limit {
        links.truncate(limit);
    }

    let total = links.len();
    info!(keyword, total, "Found events");

    let concurrency = opts.concurrency.clamp(1, MAX_CONCURRENCY);
    let per_event: Vec<Option<Vec<EventRecord>>> = futures::stream::iter(links.into_iter().enumerate())
        .map(|(idx, link)| fetch_event(client, idx + 1, total, link))
        .buffered(concurrency)
        .collect()
        .await;

    let collected = per_event.iter().filter(|rows| rows.is_some()).count();
    let rows: Vec<EventRecord> = per_event.into_iter().flatten().flatten().collect();
    info!(
        keyword,
        total,
        collected,
        rows = rows.len(),
        "Scrape complete"
    );
    Ok(rows)
}

async fn fetch_event(
    client: &dyn PageSource,
    order: usize,
    total: usize,
    link: String,
) -> Option<Vec<EventRecord>> {
    match client.event_page(&link).await {
        Ok(html) => {
            let rows = event_rows(&html, &client.absolute_url(&link), order);
            info!(order, total, options = rows.len(), "Event collected");
            Some(rows)
        }
        Err(err) => {
            warn!(order, total, link = %link, "Event skipped: {err}");
            None
        }
    }
}

/// Fails with `NoResults` for an empty result set.
pub fn validate(rows: &[EventRecord], keyword: &str) -> Result<(), YeoshinError> {
    if rows.is_empty() {
        return Err(YeoshinError::NoResults {
            keyword: keyword.trim().to_string(),
        });
    }
    Ok(())
}

/// Loads rows previously written by `search --json`.
pub async fn load(path: &Path) -> Result<Vec<EventRecord>, YeoshinError> {
    let bytes = tokio::fs::read(path).await?;
    let rows: Vec<EventRecord> = serde_json::from_slice(&bytes)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::yeoshin::SessionCookies;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MY_PAGE_LOGGED_IN: &str = r#"<html><body><div id="ct-view"><div><div>
        <div class="sc-d64fbdbd-0 IeGIQ"><a href="/myPage/profile">홍길동님</a></div>
    </div></div></div></body></html>"#;

    const MY_PAGE_LOGGED_OUT: &str = r#"<html><body><div id="ct-view"><div><div>
        <div><a href="/login">로그인</a></div>
    </div></div></div></body></html>"#;

    fn search_html(links: &[&str]) -> String {
        let items: String = links
            .iter()
            .map(|link| format!(r#"<div><article><a href="{link}">event</a></article></div>"#))
            .collect();
        format!(
            r#"<html><body><div id="ct-view"><div><main><article>
                <section><h2>tabs</h2></section>
                <section><section>{items}</section></section>
            </article></main></div></div></body></html>"#
        )
    }

    fn detail_html(event: &str, hospital: &str, options: &[(&str, &str)]) -> String {
        let options: String = options
            .iter()
            .map(|(name, price)| format!("<div><div><p>{name}</p></div><p>{price}</p></div>"))
            .collect();
        format!(
            r#"<html><body><div id="ct-view"><div><div>
                <div class="relative flex-col">
                    <div class="top"></div>
                    <div>
                        <article><h1><span>{event}</span></h1></article>
                        <div><article><div><div><p>{hospital}</p></div></div></article></div>
                    </div>
                </div>
                <div><div><div><div>
                    <div></div>
                    <div><div></div><div>{options}</div></div>
                </div></div></div></div>
            </div></div></div></body></html>"#
        )
    }

    fn cookies() -> SessionCookies {
        SessionCookies::from_pairs([("access_token", "tok")])
    }

    async fn mount_html(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn scrape_preserves_search_order_and_skips_failed_events() {
        let server = MockServer::start().await;
        mount_html(&server, "/myPage", MY_PAGE_LOGGED_IN.to_string()).await;
        Mock::given(method("GET"))
            .and(path("/search/category"))
            .and(query_param("q", "보톡스"))
            .and(query_param("tab", "events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(search_html(&["/events/1", "/events/2", "/events/3"])),
            )
            .mount(&server)
            .await;
        mount_html(
            &server,
            "/events/1",
            detail_html("턱 보톡스", "A의원", &[("국산 50u", "19,000원"), ("수입 50u", "59,000원")]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/events/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_html(&server, "/events/3", detail_html("이마 보톡스", "B의원", &[])).await;

        let client = YeoshinClient::with_base(server.uri(), cookies()).unwrap();
        let rows = scrape_with(&client, "보톡스", &ScrapeOptions::default())
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].exposure_order, 1);
        assert_eq!(rows[0].option_name, "국산 50u");
        assert_eq!(rows[0].price, "19,000원");
        assert_eq!(rows[1].option_name, "수입 50u");
        assert_eq!(rows[1].hospital_name, "A의원");
        assert_eq!(rows[2].exposure_order, 3);
        assert_eq!(rows[2].event_name, "이마 보톡스");
        assert_eq!(rows[2].option_name, NO_OPTION);
        assert!(rows[2].detail_link.ends_with("/events/3"));
    }

    #[tokio::test]
    async fn scrape_applies_limit() {
        let server = MockServer::start().await;
        mount_html(&server, "/myPage", MY_PAGE_LOGGED_IN.to_string()).await;
        mount_html(
            &server,
            "/search/category",
            search_html(&["/events/1", "/events/2"]),
        )
        .await;
        mount_html(&server, "/events/1", detail_html("E1", "H1", &[])).await;

        let client = YeoshinClient::with_base(server.uri(), cookies()).unwrap();
        let rows = scrape_with(
            &client,
            "필러",
            &ScrapeOptions {
                limit: Some(1),
                concurrency: 4,
                ..ScrapeOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_name, "E1");
    }

    #[tokio::test]
    async fn scrape_fails_when_logged_out() {
        let server = MockServer::start().await;
        mount_html(&server, "/myPage", MY_PAGE_LOGGED_OUT.to_string()).await;

        let client = YeoshinClient::with_base(server.uri(), cookies()).unwrap();
        let err = scrape_with(&client, "보톡스", &ScrapeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, YeoshinError::NotLoggedIn { .. }));
        assert!(err.to_string().contains("login link"));
    }

    #[tokio::test]
    async fn scrape_without_cookies_fails_before_any_request() {
        let client =
            YeoshinClient::with_base("http://127.0.0.1:9".into(), SessionCookies::default())
                .unwrap();
        let err = scrape_with(&client, "보톡스", &ScrapeOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no session cookies"));
    }

    #[tokio::test]
    async fn scrape_returns_empty_when_result_list_missing() {
        let server = MockServer::start().await;
        mount_html(&server, "/myPage", MY_PAGE_LOGGED_IN.to_string()).await;
        mount_html(
            &server,
            "/search/category",
            "<html><body><p>검색 결과가 없습니다</p></body></html>".to_string(),
        )
        .await;

        let client = YeoshinClient::with_base(server.uri(), cookies()).unwrap();
        let rows = scrape_with(&client, "없는키워드", &ScrapeOptions::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(matches!(
            validate(&rows, "없는키워드"),
            Err(YeoshinError::NoResults { .. })
        ));
    }

    #[tokio::test]
    async fn scrape_rejects_blank_keyword_and_zero_limit() {
        let client =
            YeoshinClient::with_base("http://127.0.0.1:9".into(), cookies()).unwrap();
        let err = scrape_with(&client, "  ", &ScrapeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, YeoshinError::InvalidArgument(_)));

        let err = scrape_with(
            &client,
            "보톡스",
            &ScrapeOptions {
                limit: Some(0),
                concurrency: 1,
                ..ScrapeOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("--limit"));
    }

    #[tokio::test]
    async fn scrape_validates_request_before_starting_a_browser() {
        let opts = ScrapeOptions::default();
        assert_eq!(opts.fetch, FetchMode::Browser);
        let err = scrape(" ", &opts).await.unwrap_err();
        assert!(matches!(err, YeoshinError::InvalidArgument(_)));
    }

    #[test]
    fn placeholder_uses_defaults_and_with_option_keeps_event_fields() {
        let base = EventRecord::placeholder(4, "");
        assert_eq!(base.hospital_name, NO_HOSPITAL);
        assert_eq!(base.price, NO_PRICE);
        assert_eq!(base.detail_link, NOT_AVAILABLE);

        let row = base.with_option("1cc".into(), "100,000원".into());
        assert_eq!(row.exposure_order, 4);
        assert_eq!(row.option_name, "1cc");
        assert_eq!(row.location, NO_LOCATION);
        assert_eq!(row.field("price"), "100,000원");
        assert_eq!(row.field("unknown"), NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn load_reads_search_json_output() {
        let rows = vec![EventRecord::placeholder(1, "https://www.yeoshin.co.kr/events/1")];
        let path = std::env::temp_dir().join(format!(
            "yeoshin-load-test-{}.json",
            std::process::id()
        ));
        tokio::fs::write(&path, serde_json::to_vec(&rows).unwrap())
            .await
            .unwrap();
        let loaded = load(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
        assert_eq!(loaded, rows);
    }
}
