//! Single-page HTTP fetching with retry and rotating client identity.
//!
//! The fetcher never returns an error to its caller: a page is either
//! text or absent. Transient failures (timeouts, connection errors, 5xx,
//! 429) are retried up to the configured limit; "not found" and other
//! client errors end the fetch immediately.

use std::{future::Future, time::Duration};

use reqwest::{StatusCode, header::USER_AGENT};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Client identities rotated per attempt.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Anything that can turn a URL into page text.
///
/// Implementations must not fail: `None` means "no usable page".
pub trait PageSource: Sync {
    fn fetch(&self, url: &Url) -> impl Future<Output = Option<String>> + Send;
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Total attempts per URL (at least one is always made).
    pub retry_limit: u32,
    /// Upper bound for a single attempt, connect through body.
    pub timeout: Duration,
    /// Pause between a failed attempt and the next one.
    pub retry_pause: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            timeout: DEFAULT_TIMEOUT,
            retry_pause: DEFAULT_RETRY_PAUSE,
        }
    }
}

/// Outcome of one HTTP attempt.
#[derive(Debug)]
enum Attempt {
    Body(String),
    NotFound,
    Rejected(StatusCode),
    Transient(String),
}

pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| {
                Error::Config(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client, config })
    }

    /// Fetch `url`, retrying transient failures.
    pub async fn fetch_text(&self, url: &Url) -> Option<String> {
        let limit = self.config.retry_limit.max(1);

        for attempt in 1..=limit {
            match self.attempt(url).await {
                Attempt::Body(text) => {
                    return (!text.trim().is_empty()).then_some(text);
                }
                Attempt::NotFound => {
                    debug!(%url, "page not found");
                    return None;
                }
                Attempt::Rejected(status) => {
                    warn!(%url, %status, "request rejected, not retrying");
                    return None;
                }
                Attempt::Transient(reason) => {
                    debug!(
                        %url,
                        attempt,
                        limit,
                        %reason,
                        "transient fetch failure"
                    );
                    if attempt < limit {
                        tokio::time::sleep(self.config.retry_pause).await;
                    }
                }
            }
        }

        warn!(%url, attempts = limit, "giving up after repeated failures");
        None
    }

    async fn attempt(&self, url: &Url) -> Attempt {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, pick_user_agent())
            .timeout(self.config.timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return Attempt::Transient(e.to_string()),
        };

        classify(response).await
    }
}

async fn classify(response: reqwest::Response) -> Attempt {
    let status = response.status();
    if status.is_success() {
        return match response.text().await {
            Ok(text) => Attempt::Body(text),
            Err(e) => Attempt::Transient(e.to_string()),
        };
    }

    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Attempt::NotFound,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            Attempt::Transient(format!("HTTP {status}"))
        }
        s if s.is_server_error() => Attempt::Transient(format!("HTTP {s}")),
        s => Attempt::Rejected(s),
    }
}

fn pick_user_agent() -> &'static str {
    USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]
}

impl PageSource for Fetcher {
    async fn fetch(&self, url: &Url) -> Option<String> {
        self.fetch_text(url).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{
        Router,
        extract::State,
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::get,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct Hits {
        flaky: Arc<AtomicUsize>,
        missing: Arc<AtomicUsize>,
        broken: Arc<AtomicUsize>,
        forbidden: Arc<AtomicUsize>,
    }

    async fn flaky(State(hits): State<Hits>) -> (AxumStatus, &'static str) {
        if hits.flaky.fetch_add(1, Ordering::SeqCst) < 2 {
            (AxumStatus::SERVICE_UNAVAILABLE, "busy")
        } else {
            (AxumStatus::OK, "<html>finally</html>")
        }
    }

    async fn missing(State(hits): State<Hits>) -> AxumStatus {
        hits.missing.fetch_add(1, Ordering::SeqCst);
        AxumStatus::NOT_FOUND
    }

    async fn broken(State(hits): State<Hits>) -> AxumStatus {
        hits.broken.fetch_add(1, Ordering::SeqCst);
        AxumStatus::INTERNAL_SERVER_ERROR
    }

    async fn forbidden(State(hits): State<Hits>) -> AxumStatus {
        hits.forbidden.fetch_add(1, Ordering::SeqCst);
        AxumStatus::FORBIDDEN
    }

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_secs(5)).await;
        "too late"
    }

    async fn echo_agent(headers: HeaderMap) -> String {
        headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn spawn_server(hits: Hits) -> Url {
        let app = Router::new()
            .route("/ok", get(|| async { "<html>hello</html>" }))
            .route("/blank", get(|| async { "   " }))
            .route("/flaky", get(flaky))
            .route("/missing", get(missing))
            .route("/broken", get(broken))
            .route("/forbidden", get(forbidden))
            .route("/slow", get(slow))
            .route("/agent", get(echo_agent))
            .with_state(hits);

        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn at(base: &Url, path: &str) -> Url {
        base.join(path).unwrap()
    }

    fn fast_fetcher() -> Fetcher {
        Fetcher::new(FetchConfig {
            retry_limit: 3,
            timeout: Duration::from_millis(300),
            retry_pause: Duration::from_millis(10),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn success_returns_body() {
        let base = spawn_server(Hits::default()).await;
        let body = fast_fetcher().fetch_text(&at(&base, "ok")).await;
        assert_eq!(body.as_deref(), Some("<html>hello</html>"));
    }

    #[tokio::test]
    async fn blank_body_is_empty() {
        let base = spawn_server(Hits::default()).await;
        let body = fast_fetcher().fetch_text(&at(&base, "blank")).await;
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let hits = Hits::default();
        let base = spawn_server(hits.clone()).await;

        let body = fast_fetcher().fetch_text(&at(&base, "flaky")).await;

        assert_eq!(body.as_deref(), Some("<html>finally</html>"));
        assert_eq!(hits.flaky.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_is_terminal() {
        let hits = Hits::default();
        let base = spawn_server(hits.clone()).await;

        let body = fast_fetcher().fetch_text(&at(&base, "missing")).await;

        assert!(body.is_none());
        assert_eq!(hits.missing.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Hits::default();
        let base = spawn_server(hits.clone()).await;

        let body = fast_fetcher().fetch_text(&at(&base, "forbidden")).await;

        assert!(body.is_none());
        assert_eq!(hits.forbidden.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_stop_at_limit() {
        let hits = Hits::default();
        let base = spawn_server(hits.clone()).await;

        let body = fast_fetcher().fetch_text(&at(&base, "broken")).await;

        assert!(body.is_none());
        assert_eq!(hits.broken.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn per_attempt_timeout_fires() {
        let base = spawn_server(Hits::default()).await;
        let fetcher = Fetcher::new(FetchConfig {
            retry_limit: 1,
            timeout: Duration::from_millis(100),
            retry_pause: Duration::from_millis(1),
        })
        .unwrap();

        let started = std::time::Instant::now();
        let body = fetcher.fetch_text(&at(&base, "slow")).await;

        assert!(body.is_none());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn sends_a_pooled_user_agent() {
        let base = spawn_server(Hits::default()).await;
        let agent = fast_fetcher()
            .fetch_text(&at(&base, "agent"))
            .await
            .unwrap();
        assert!(USER_AGENTS.contains(&agent.as_str()));
    }

    #[tokio::test]
    async fn connection_refused_yields_empty() {
        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/gone")).unwrap();
        assert!(fast_fetcher().fetch_text(&url).await.is_none());
    }
}
