use std::borrow::Cow;

use reqwest::Url;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use tracing::{debug, warn};

use crate::error::YeoshinError;
use crate::sources::PageSource;

pub(crate) const YEOSHIN_BASE: &str = "https://www.yeoshin.co.kr";
pub(crate) const YEOSHIN_BASE_ENV: &str = "YEOSHIN_BASE";
const YEOSHIN_API: &str = "yeoshin";

/// Session cookie names paired with the environment variables that carry their values.
const SESSION_COOKIES: [(&str, &str); 5] = [
    ("_kau", "_kau"),
    ("_kahai", "_kahai"),
    ("_karmt", "_karmt"),
    ("_kawlt", "_kawlt"),
    ("access_token", "ACCESS_TOKEN"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies {
    pairs: Vec<(String, String)>,
}

impl SessionCookies {
    /// Reads the session cookies from the environment, skipping (and warning about) unset ones.
    pub fn from_env() -> Self {
        let mut pairs = Vec::new();
        for (name, env_var) in SESSION_COOKIES {
            match crate::sources::env_value(env_var) {
                Some(value) => {
                    debug!(cookie = name, "Session cookie loaded");
                    pairs.push((name.to_string(), value));
                }
                None => warn!(cookie = name, env_var, "Missing session cookie value"),
            }
        }
        Self { pairs }
    }

    #[cfg(test)]
    pub(crate) fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.pairs.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn header_value(&self) -> Option<String> {
        if self.pairs.is_empty() {
            return None;
        }
        Some(
            self.pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Resolves a link found in a page against `base`.
pub(crate) fn resolve_link(base: &str, link: &str) -> String {
    let link = link.trim();
    if link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    if let Some(rest) = link.strip_prefix("//") {
        return format!("https://{rest}");
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        link.trim_start_matches('/')
    )
}

/// `{base}/search/category?q=<keyword>&tab=events`, rejecting a blank keyword.
pub(crate) fn search_url(base: &str, keyword: &str) -> Result<Url, YeoshinError> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(YeoshinError::InvalidArgument(
            "Search keyword is required".into(),
        ));
    }
    Url::parse_with_params(
        &resolve_link(base, "search/category"),
        &[("q", keyword), ("tab", "events")],
    )
    .map_err(|err| YeoshinError::InvalidArgument(format!("Invalid site base URL {base}: {err}")))
}

pub struct YeoshinClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    cookies: SessionCookies,
}

impl YeoshinClient {
    pub fn new() -> Result<Self, YeoshinError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(YEOSHIN_BASE, YEOSHIN_BASE_ENV),
            cookies: SessionCookies::from_env(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base(base: String, cookies: SessionCookies) -> Result<Self, YeoshinError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: Cow::Owned(base),
            cookies,
        })
    }

    async fn get_html(&self, url: &str) -> Result<String, YeoshinError> {
        let mut req = self
            .client
            .get(url)
            .header(USER_AGENT, crate::sources::BROWSER_USER_AGENT)
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .header(ACCEPT_LANGUAGE, "ko-KR,ko;q=0.9");
        let cookie = self.cookies.header_value();
        let authenticated = cookie.is_some();
        if let Some(cookie) = cookie {
            req = req.header(COOKIE, cookie);
        }

        let resp = crate::sources::apply_cache_mode_with_auth(req, authenticated)
            .send()
            .await?;
        let status = resp.status();
        let bytes = crate::sources::read_limited_body(resp, YEOSHIN_API).await?;
        if !status.is_success() {
            let excerpt = crate::sources::body_excerpt(&bytes);
            return Err(YeoshinError::Api {
                api: YEOSHIN_API.to_string(),
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait::async_trait]
impl PageSource for YeoshinClient {
    fn base(&self) -> &str {
        self.base.as_ref().trim_end_matches('/')
    }

    fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    async fn my_page(&self) -> Result<String, YeoshinError> {
        self.get_html(&self.absolute_url("myPage")).await
    }

    async fn search_page(&self, keyword: &str) -> Result<String, YeoshinError> {
        let url = search_url(self.base(), keyword)?;
        self.get_html(url.as_str()).await
    }

    async fn event_page(&self, link: &str) -> Result<String, YeoshinError> {
        self.get_html(&self.absolute_url(link)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_cookies() -> SessionCookies {
        SessionCookies::from_pairs([("_kau", "k1"), ("access_token", "tok")])
    }

    #[test]
    fn cookie_header_joins_pairs_and_drops_blank_values() {
        let cookies = SessionCookies::from_pairs([("_kau", "k1"), ("_kahai", " "), ("access_token", "tok")]);
        assert_eq!(cookies.names(), vec!["_kau", "access_token"]);
        assert_eq!(
            cookies.header_value().as_deref(),
            Some("_kau=k1; access_token=tok")
        );
        assert_eq!(SessionCookies::default().header_value(), None);
    }

    #[test]
    fn absolute_url_handles_relative_and_absolute_links() {
        let client =
            YeoshinClient::with_base("https://www.yeoshin.co.kr/".into(), test_cookies()).unwrap();
        assert_eq!(
            client.absolute_url("/events/42"),
            "https://www.yeoshin.co.kr/events/42"
        );
        assert_eq!(
            client.absolute_url("events/42"),
            "https://www.yeoshin.co.kr/events/42"
        );
        assert_eq!(
            client.absolute_url("https://m.yeoshin.co.kr/events/42"),
            "https://m.yeoshin.co.kr/events/42"
        );
        assert_eq!(
            client.absolute_url("//cdn.yeoshin.co.kr/x"),
            "https://cdn.yeoshin.co.kr/x"
        );
    }

    #[tokio::test]
    async fn search_page_sends_keyword_tab_and_cookies() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/search/category"))
            .and(query_param("q", "보톡스"))
            .and(query_param("tab", "events"))
            .and(header("cookie", "_kau=k1; access_token=tok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><body>results</body></html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = YeoshinClient::with_base(server.uri(), test_cookies()).unwrap();
        let html = client.search_page("  보톡스 ").await.unwrap();
        assert!(html.contains("results"));
    }

    #[tokio::test]
    async fn search_page_rejects_blank_keyword() {
        let client = YeoshinClient::with_base("http://127.0.0.1".into(), test_cookies()).unwrap();
        let err = client.search_page("   ").await.unwrap_err();
        assert!(matches!(err, YeoshinError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn event_page_maps_http_errors_to_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/events/404"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;

        let client = YeoshinClient::with_base(server.uri(), test_cookies()).unwrap();
        let err = client.event_page("/events/404").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("yeoshin"));
        assert!(msg.contains("404"));
        assert!(msg.contains("not here"));
    }

    #[test]
    fn search_url_encodes_keyword_and_tab() {
        let url = search_url("https://www.yeoshin.co.kr/", " 울쎄라 리프팅 ").unwrap();
        assert_eq!(url.path(), "/search/category");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("q".to_string(), "울쎄라 리프팅".to_string()),
                ("tab".to_string(), "events".to_string())
            ]
        );
    }

    fn cacheable_page() -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html; charset=utf-8")
            .insert_header("cache-control", "public, max-age=3600")
            .set_body_string("<html><body>cached?</body></html>")
    }

    #[tokio::test]
    async fn cookie_bearing_requests_are_never_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/myPage"))
            .respond_with(cacheable_page())
            .expect(2)
            .mount(&server)
            .await;

        let client = YeoshinClient::with_base(server.uri(), test_cookies()).unwrap();
        client.my_page().await.unwrap();
        client.my_page().await.unwrap();
    }

    #[tokio::test]
    async fn no_cache_scope_bypasses_cache_for_anonymous_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events/7"))
            .respond_with(cacheable_page())
            .expect(2)
            .mount(&server)
            .await;

        let client = YeoshinClient::with_base(server.uri(), SessionCookies::default()).unwrap();
        crate::sources::with_no_cache(true, async {
            client.event_page("/events/7").await.unwrap();
            client.event_page("/events/7").await.unwrap();
        })
        .await;
    }
}
