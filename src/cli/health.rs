use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, COOKIE, USER_AGENT};

use crate::error::YeoshinError;
use crate::sources::anthropic::{ANTHROPIC_API_KEY_ENV, ANTHROPIC_BASE, ANTHROPIC_BASE_ENV};
use crate::sources::yeoshin::{SessionCookies, YEOSHIN_BASE, YEOSHIN_BASE_ENV};
use crate::transform::event::{LoginState, login_state};

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub api: String,
    pub status: String,
    pub detail: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    fn from_rows(rows: Vec<HealthRow>) -> Self {
        let healthy = rows.iter().filter(|r| r.status == "ok").count();
        let total = rows.iter().filter(|r| r.status != "skipped").count();
        Self {
            healthy,
            total,
            rows,
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Yeoshin Scrape Health Check\n\n");
        out.push_str("| Check | Status | Detail |\n");
        out.push_str("|-------|--------|--------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.api, row.status, row.detail
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} checks healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

/// Endpoints and credentials a health run talks to.
pub(crate) struct Targets {
    pub yeoshin_base: String,
    pub anthropic_base: String,
    pub cookies: SessionCookies,
    pub api_key: Option<String>,
}

impl Targets {
    fn from_env() -> Self {
        Self {
            yeoshin_base: crate::sources::env_base(YEOSHIN_BASE, YEOSHIN_BASE_ENV).into_owned(),
            anthropic_base: crate::sources::env_base(ANTHROPIC_BASE, ANTHROPIC_BASE_ENV)
                .into_owned(),
            cookies: SessionCookies::from_env(),
            api_key: crate::sources::env_value(ANTHROPIC_API_KEY_ENV),
        }
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

fn error_reason(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "error"
    }
}

fn row(api: &str, status: &str, detail: String) -> HealthRow {
    HealthRow {
        api: api.to_string(),
        status: status.to_string(),
        detail,
    }
}

async fn check_site(client: &reqwest::Client, base: &str) -> HealthRow {
    let start = Instant::now();
    let resp = client
        .get(join(base, ""))
        .header(USER_AGENT, crate::sources::BROWSER_USER_AGENT)
        .header(ACCEPT, "text/html")
        .send()
        .await;

    let elapsed = start.elapsed().as_millis();
    match resp {
        Ok(resp) if resp.status().is_success() => row("Yeoshin site", "ok", format!("{elapsed}ms")),
        Ok(resp) => row(
            "Yeoshin site",
            "error",
            format!("{elapsed}ms (HTTP {})", resp.status().as_u16()),
        ),
        Err(err) => row("Yeoshin site", "error", error_reason(&err).into()),
    }
}

async fn check_login(client: &reqwest::Client, base: &str, cookies: &SessionCookies) -> HealthRow {
    let Some(cookie) = cookies.header_value() else {
        return row("Yeoshin login", "skipped", "no session cookies set".into());
    };

    let start = Instant::now();
    let resp = client
        .get(join(base, "myPage"))
        .header(USER_AGENT, crate::sources::BROWSER_USER_AGENT)
        .header(ACCEPT, "text/html")
        .header(COOKIE, cookie)
        .send()
        .await;

    let resp = match resp {
        Ok(resp) => resp,
        Err(err) => return row("Yeoshin login", "error", error_reason(&err).into()),
    };
    let status = resp.status();
    let body = match resp.text().await {
        Ok(body) => body,
        Err(err) => return row("Yeoshin login", "error", error_reason(&err).into()),
    };
    let elapsed = start.elapsed().as_millis();
    if !status.is_success() {
        return row(
            "Yeoshin login",
            "error",
            format!("{elapsed}ms (HTTP {})", status.as_u16()),
        );
    }
    match login_state(&body) {
        LoginState::LoggedIn => row("Yeoshin login", "ok", format!("{elapsed}ms")),
        LoginState::LoggedOut => row("Yeoshin login", "error", "logged out".into()),
        LoginState::Unknown => row("Yeoshin login", "error", "login state unknown".into()),
    }
}

async fn check_anthropic(client: &reqwest::Client, base: &str, api_key: Option<&str>) -> HealthRow {
    let Some(api_key) = api_key else {
        return row(
            "Anthropic",
            "skipped",
            format!("{ANTHROPIC_API_KEY_ENV} not set"),
        );
    };

    let start = Instant::now();
    let resp = client
        .get(join(base, "v1/models"))
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .header(ACCEPT, "application/json")
        .send()
        .await;

    let elapsed = start.elapsed().as_millis();
    match resp {
        Ok(resp) if resp.status().is_success() => row("Anthropic", "ok", format!("{elapsed}ms")),
        Ok(resp) => row(
            "Anthropic",
            "error",
            format!("{elapsed}ms (HTTP {})", resp.status().as_u16()),
        ),
        Err(err) => row("Anthropic", "error", error_reason(&err).into()),
    }
}

fn health_http_client() -> Result<reqwest::Client, YeoshinError> {
    static HEALTH_HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    if let Some(client) = HEALTH_HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(YeoshinError::HttpClientInit)?;

    match HEALTH_HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => HEALTH_HTTP_CLIENT
            .get()
            .cloned()
            .ok_or_else(|| YeoshinError::Api {
                api: "health".into(),
                message: "Health HTTP client initialization race".into(),
            }),
    }
}

async fn check_cache_dir() -> HealthRow {
    let start = Instant::now();
    let dir = crate::utils::paths::cache_dir();
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let scratch = dir.join(format!(".yeoshin-healthcheck-{suffix}.tmp"));

    let result = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&scratch, b"ok").await?;
        match tokio::fs::remove_file(&scratch).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
    .await;

    let label = format!("Cache dir ({})", dir.display());
    match result {
        Ok(()) => row(&label, "ok", format!("{}ms", start.elapsed().as_millis())),
        Err(err) => row(&label, "error", format!("{:?}", err.kind())),
    }
}

async fn check_font() -> HealthRow {
    let Some(path) = crate::sources::env_value(crate::render::pdf::FONT_PATH_ENV).map(PathBuf::from)
    else {
        return row(
            "Report font",
            "skipped",
            format!("{} not set", crate::render::pdf::FONT_PATH_ENV),
        );
    };
    let label = format!("Report font ({})", path.display());
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => row(&label, "ok", format!("{} bytes", meta.len())),
        Ok(_) => row(&label, "error", "not a file".into()),
        Err(err) => row(&label, "error", format!("{:?}", err.kind())),
    }
}

pub(crate) async fn check_targets(
    client: &reqwest::Client,
    targets: &Targets,
    apis_only: bool,
) -> HealthReport {
    let (site, login, anthropic) = tokio::join!(
        check_site(client, &targets.yeoshin_base),
        check_login(client, &targets.yeoshin_base, &targets.cookies),
        check_anthropic(client, &targets.anthropic_base, targets.api_key.as_deref()),
    );

    let mut rows = vec![site, login, anthropic];
    if !apis_only {
        rows.push(check_cache_dir().await);
        rows.push(check_font().await);
    }
    HealthReport::from_rows(rows)
}

/// Checks site reachability, the session login, the analysis API, and local paths.
///
/// # Errors
///
/// Returns an error when the health HTTP client cannot be created.
pub async fn check(apis_only: bool) -> Result<HealthReport, YeoshinError> {
    let client = health_http_client()?;
    Ok(check_targets(&client, &Targets::from_env(), apis_only).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const LOGGED_IN: &str = r#"<html><body><div id="ct-view"><div><div>
        <div class="sc-d64fbdbd-0 IeGIQ"><a href="/myPage/profile">홍길동님</a></div>
    </div></div></div></body></html>"#;

    #[tokio::test]
    async fn check_targets_reports_site_login_and_skips_missing_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/myPage"))
            .and(header("cookie", "_kau=k1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LOGGED_IN))
            .mount(&server)
            .await;

        let targets = Targets {
            yeoshin_base: server.uri(),
            anthropic_base: server.uri(),
            cookies: SessionCookies::from_pairs([("_kau", "k1")]),
            api_key: None,
        };
        let client = health_http_client().unwrap();
        let report = check_targets(&client, &targets, true).await;

        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[0].status, "ok");
        assert_eq!(report.rows[1].status, "ok");
        assert_eq!(report.rows[2].status, "skipped");
        assert_eq!(report.total, 2);
        assert_eq!(report.healthy, report.total);
    }

    #[tokio::test]
    async fn check_targets_flags_anthropic_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let targets = Targets {
            yeoshin_base: "http://127.0.0.1:9".into(),
            anthropic_base: server.uri(),
            cookies: SessionCookies::default(),
            api_key: Some("bad".into()),
        };
        let client = health_http_client().unwrap();
        let report = check_targets(&client, &targets, true).await;

        assert_eq!(report.rows[1].status, "skipped");
        assert_eq!(report.rows[2].status, "error");
        assert!(report.rows[2].detail.contains("HTTP 401"));
        assert_eq!(report.healthy, 0);
        assert!(report.to_markdown().contains("Status: 0/2 checks healthy"));
    }

    #[test]
    fn rows_serialize_detail_column() {
        let report = HealthReport::from_rows(vec![
            row("site", "ok", "120ms".into()),
            row("anthropic", "skipped", "CLAUDE_API_KEY not set".into()),
        ]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["rows"][0]["detail"], "120ms");
        assert!(value["rows"][0].get("latency").is_none());
        assert_eq!(report.total, 1);
        assert!(report.to_markdown().contains("| anthropic | skipped | CLAUDE_API_KEY not set |"));
    }
}
