//! Automation session lifecycle and the retry wrapper around page loads.
//!
//! One [`AutomationSession`] is owned by exactly one pipeline run. Adapters
//! borrow it to load pages; every load goes through [`retry_with_backoff`],
//! which is the only place backoff delays happen.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use leadscout_shared::{AutomationConfig, LeadScoutError, Result};

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Run `op` up to `attempts` times, sleeping `base_delay * attempt` between
/// failures. The final error is returned tagged with `label`.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        debug!(label, attempt, max_attempts = attempts, "attempt");
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(label, attempt, max_attempts = attempts, error = %e, "attempt failed, backing off");
                tokio::time::sleep(base_delay * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(label, attempt, error = %e, "all attempts failed");
                return Err(tag_error(e, label));
            }
        }
    }
}

fn tag_error(err: LeadScoutError, label: &str) -> LeadScoutError {
    match err {
        LeadScoutError::Network(m) => LeadScoutError::Network(format!("{label}: {m}")),
        LeadScoutError::Parse { message } => LeadScoutError::parse(format!("{label}: {message}")),
        LeadScoutError::Extraction { url, message } => LeadScoutError::Extraction {
            url,
            message: format!("{label}: {message}"),
        },
        other => LeadScoutError::Network(format!("{label}: {other}")),
    }
}

// ---------------------------------------------------------------------------
// Page loaders
// ---------------------------------------------------------------------------

/// The engine that turns a URL into page HTML.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &Url) -> Result<String>;

    /// Human-readable engine name for tracing.
    fn name(&self) -> &str;
}

/// Plain HTTP GET.
pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    pub fn new(config: &AutomationConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl PageLoader for HttpLoader {
    async fn load(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LeadScoutError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| LeadScoutError::Network(format!("{url}: body read failed: {e}")))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Rendered page loads through a Browserless `/content` endpoint.
pub struct BrowserlessLoader {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl BrowserlessLoader {
    pub fn new(config: &AutomationConfig, base_url: &str) -> Result<Self> {
        let endpoint = Url::parse(&format!("{}/content", base_url.trim_end_matches('/')))
            .map_err(|e| LeadScoutError::SessionInit(format!("invalid browserless url '{base_url}': {e}")))?;

        let token = std::env::var(&config.browserless_token_env)
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Self {
            client: build_client(config)?,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl PageLoader for BrowserlessLoader {
    async fn load(&self, url: &Url) -> Result<String> {
        let mut endpoint = self.endpoint.clone();
        if let Some(token) = &self.token {
            endpoint.query_pairs_mut().append_pair("token", token);
        }

        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "url": url.as_str() }))
            .send()
            .await
            .map_err(|e| LeadScoutError::Network(format!("browserless {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LeadScoutError::Network(format!(
                "browserless {url}: HTTP {status}: {message}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| LeadScoutError::Network(format!("browserless {url}: {e}")))
    }

    fn name(&self) -> &str {
        "browserless"
    }
}

fn build_client(config: &AutomationConfig) -> Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| LeadScoutError::SessionInit(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// AutomationSession
// ---------------------------------------------------------------------------

/// How the session obtains its engine on `initialize`.
enum EngineSource {
    /// Build from config: Browserless if configured, else HTTP.
    Configured,
    /// A caller-supplied engine.
    Injected(Arc<dyn PageLoader>),
}

/// Owns one automation engine for the duration of a run.
pub struct AutomationSession {
    config: AutomationConfig,
    source: EngineSource,
    engine: Option<Arc<dyn PageLoader>>,
    pages_loaded: AtomicUsize,
}

impl AutomationSession {
    pub fn new(config: AutomationConfig) -> Self {
        Self {
            config,
            source: EngineSource::Configured,
            engine: None,
            pages_loaded: AtomicUsize::new(0),
        }
    }

    /// Session whose engine is supplied by the caller.
    pub fn with_loader(config: AutomationConfig, loader: Arc<dyn PageLoader>) -> Self {
        Self {
            config,
            source: EngineSource::Injected(loader),
            engine: None,
            pages_loaded: AtomicUsize::new(0),
        }
    }

    /// Acquire the engine. A second call on a ready session is a no-op.
    pub fn initialize(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }

        let engine: Arc<dyn PageLoader> = match &self.source {
            EngineSource::Injected(loader) => loader.clone(),
            EngineSource::Configured => match self.config.browserless_url.as_deref() {
                Some(url) => Arc::new(BrowserlessLoader::new(&self.config, url)?),
                None => Arc::new(HttpLoader::new(&self.config)?),
            },
        };

        info!(engine = engine.name(), "automation session ready");
        self.engine = Some(engine);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// Number of pages successfully loaded so far.
    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded.load(Ordering::Relaxed)
    }

    /// Release the engine. Safe to call at any point, any number of times.
    pub fn cleanup(&mut self) {
        if let Some(engine) = self.engine.take() {
            info!(
                engine = engine.name(),
                pages_loaded = self.pages_loaded(),
                "automation session released"
            );
        }
    }

    /// Run `op` under this session's retry policy.
    pub async fn execute_with_retry<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_backoff(
            self.config.retry_attempts,
            Duration::from_millis(self.config.retry_base_delay_ms),
            label,
            op,
        )
        .await
    }

    /// Load one page through the engine, with retries.
    pub async fn load_page(&self, url: &Url, label: &str) -> Result<String> {
        let engine = self
            .engine
            .clone()
            .ok_or_else(|| LeadScoutError::SessionInit("session not initialized".into()))?;

        if !self.config.allow_private_hosts && is_private_target(url) {
            warn!(%url, "blocked private or non-http target");
            return Err(LeadScoutError::validation(format!(
                "refusing to load private or non-http target {url}"
            )));
        }

        let html = self
            .execute_with_retry(label, || {
                let engine = engine.clone();
                async move { engine.load(url).await }
            })
            .await?;

        self.pages_loaded.fetch_add(1, Ordering::Relaxed);
        Ok(html)
    }
}

impl Drop for AutomationSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

// ---------------------------------------------------------------------------
// Private-address guard
// ---------------------------------------------------------------------------

/// Whether a URL targets a non-HTTP scheme or a local/private host.
pub fn is_private_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    pub(crate) fn test_config() -> AutomationConfig {
        AutomationConfig {
            retry_attempts: 3,
            retry_base_delay_ms: 1,
            allow_private_hosts: true,
            ..AutomationConfig::default()
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(1), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(LeadScoutError::Network("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_tags_final_error_with_label() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(2, Duration::from_millis(1), "search roofing", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LeadScoutError::Network("HTTP 503".into())) }
        })
        .await;
        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.to_string(), "network error: search roofing: HTTP 503");
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = retry_with_backoff(0, Duration::ZERO, "once", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, LeadScoutError>(()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn initialize_is_idempotent_and_cleanup_is_safe() {
        let mut session = AutomationSession::new(test_config());
        assert!(!session.is_ready());
        session.cleanup();
        session.initialize().unwrap();
        assert!(session.is_ready());
        session.initialize().unwrap();
        assert!(session.is_ready());
        session.cleanup();
        session.cleanup();
        assert!(!session.is_ready());
    }

    struct CannedLoader;

    #[async_trait]
    impl PageLoader for CannedLoader {
        async fn load(&self, _url: &Url) -> Result<String> {
            Ok("<html>canned</html>".into())
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn injected_engine_serves_pages() {
        let mut session = AutomationSession::with_loader(test_config(), Arc::new(CannedLoader));
        assert!(!session.is_ready());
        session.initialize().unwrap();

        let url = Url::parse("https://example.com/post/1.html").unwrap();
        let html = session.load_page(&url, "detail").await.unwrap();
        assert_eq!(html, "<html>canned</html>");
        assert_eq!(session.pages_loaded(), 1);
        session.cleanup();
    }

    #[test]
    fn bad_engine_endpoint_fails_init() {
        let config = AutomationConfig {
            browserless_url: Some("not a url".into()),
            ..test_config()
        };
        let mut session = AutomationSession::new(config);
        let err = session.initialize().unwrap_err();
        assert_eq!(err.kind(), "session_init_error");
        assert!(!session.is_ready());
        session.cleanup();
    }

    #[tokio::test]
    async fn load_before_initialize_is_an_init_error() {
        let session = AutomationSession::new(test_config());
        let url = Url::parse("https://example.com/").unwrap();
        let err = session.load_page(&url, "early").await.unwrap_err();
        assert_eq!(err.kind(), "session_init_error");
    }

    #[tokio::test]
    async fn load_page_retries_against_server() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/post/1.html"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::path("/post/1.html"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let mut session = AutomationSession::new(test_config());
        session.initialize().unwrap();
        let url = Url::parse(&format!("{}/post/1.html", server.uri())).unwrap();
        let html = session.load_page(&url, "detail").await.unwrap();
        assert!(html.contains("ok"));
        assert_eq!(session.pages_loaded(), 1);
    }

    #[tokio::test]
    async fn browserless_engine_posts_target_url() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/content"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<html>rendered</html>"))
            .mount(&server)
            .await;

        let config = AutomationConfig {
            browserless_url: Some(server.uri()),
            ..test_config()
        };
        let mut session = AutomationSession::new(config);
        session.initialize().unwrap();
        let url = Url::parse("https://austin.example.org/lbg/d/roof/1.html").unwrap();
        let html = session.load_page(&url, "rendered").await.unwrap();
        assert!(html.contains("rendered"));
    }

    #[test]
    fn private_target_guard() {
        for blocked in [
            "file:///etc/passwd",
            "http://127.0.0.1:8080/",
            "http://192.168.1.1/admin",
            "http://localhost:3000/api",
        ] {
            assert!(is_private_target(&Url::parse(blocked).unwrap()), "{blocked}");
        }
        assert!(!is_private_target(&Url::parse("https://sam.gov/opp/1/view").unwrap()));
    }

    #[tokio::test]
    async fn guard_applies_unless_allowed() {
        let mut session = AutomationSession::new(AutomationConfig::default());
        session.initialize().unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = session.load_page(&url, "local").await.unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
