//! Per-domain request spacing shared by the HTTP middleware and the browser source.
//!
//! A policy covers a registrable domain and every subdomain of it, on any scheme, so
//! `http://m.yeoshin.co.kr/...` and `https://www.yeoshin.co.kr/...` share one slot queue.
//! Hosts without a policy are spaced per origin with the default interval.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use http::Extensions;
use reqwest::Url;
use reqwest_middleware::{Middleware, Next};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

use crate::sources::anthropic::{ANTHROPIC_BASE, ANTHROPIC_BASE_ENV};
use crate::sources::yeoshin::{YEOSHIN_BASE, YEOSHIN_BASE_ENV};

pub(crate) const SITE_INTERVAL_ENV: &str = "YEOSHIN_MIN_INTERVAL_MS";

const SITE_INTERVAL: Duration = Duration::from_millis(1000);
const ANTHROPIC_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub(crate) struct DomainPolicy {
    pub name: &'static str,
    pub domain: String,
    pub interval: Duration,
}

impl DomainPolicy {
    fn covers(&self, host: &str) -> bool {
        host == self.domain
            || host
                .strip_suffix(self.domain.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
    }
}

/// Domain a base URL's policy should cover: its host without a leading `www.`.
fn policy_domain(base: &str) -> Option<String> {
    let host = Url::parse(base).ok()?.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

fn parse_interval_ms(raw: Option<&str>) -> Option<Duration> {
    raw?.trim().parse::<u64>().ok().map(Duration::from_millis)
}

#[derive(Debug)]
pub(crate) struct RateLimiter {
    policies: Vec<DomainPolicy>,
    default_interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub(crate) fn new(policies: Vec<DomainPolicy>, default_interval: Duration) -> Self {
        Self {
            policies,
            default_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the site and Anthropic policies. `site_interval_ms` is the raw
    /// `YEOSHIN_MIN_INTERVAL_MS` value; anything but whole milliseconds keeps 1s.
    pub(crate) fn for_bases(
        site_base: &str,
        site_interval_ms: Option<&str>,
        anthropic_base: &str,
    ) -> Self {
        let site_interval = parse_interval_ms(site_interval_ms).unwrap_or(SITE_INTERVAL);
        let policies = [
            ("yeoshin", site_base, site_interval),
            ("anthropic", anthropic_base, ANTHROPIC_INTERVAL),
        ]
        .into_iter()
        .filter_map(|(name, base, interval)| {
            policy_domain(base).map(|domain| DomainPolicy {
                name,
                domain,
                interval,
            })
        })
        .collect();
        Self::new(policies, DEFAULT_INTERVAL)
    }

    pub(crate) fn from_env() -> Self {
        Self::for_bases(
            &crate::sources::env_base(YEOSHIN_BASE, YEOSHIN_BASE_ENV),
            crate::sources::env_value(SITE_INTERVAL_ENV).as_deref(),
            &crate::sources::env_base(ANTHROPIC_BASE, ANTHROPIC_BASE_ENV),
        )
    }

    /// Slot key and spacing for `url`.
    pub(crate) fn classify(&self, url: &Url) -> (String, Duration) {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        match self.policies.iter().find(|p| p.covers(&host)) {
            Some(policy) => (policy.name.to_string(), policy.interval),
            None => (
                format!("{}://{host}", url.scheme()),
                self.default_interval,
            ),
        }
    }

    /// Reserves the next free slot for `url`'s key and sleeps until it opens.
    /// Concurrent callers queue up one interval apart.
    pub(crate) async fn acquire(&self, url: &Url) {
        let (key, interval) = self.classify(url);
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.get(&key).copied().filter(|t| *t > now).unwrap_or(now);
            next.insert(key, slot + interval);
            slot
        };
        sleep_until(slot).await;
    }
}

pub(crate) fn global_limiter() -> Arc<RateLimiter> {
    static LIMITER: OnceLock<Arc<RateLimiter>> = OnceLock::new();
    LIMITER
        .get_or_init(|| Arc::new(RateLimiter::from_env()))
        .clone()
}

#[derive(Clone, Debug)]
pub(crate) struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub(crate) fn new() -> Self {
        Self::with_limiter(global_limiter())
    }

    pub(crate) fn with_limiter(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait::async_trait]
impl Middleware for RateLimitMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        self.limiter.acquire(req.url()).await;
        next.run(req, extensions).await
    }
}
