//! Page fetching
//!
//! This module owns the two ways a page can be retrieved:
//! - A static HTTP GET through a shared reqwest client
//! - A rendered fetch through a browser session, which also reports the
//!   network URLs the page requested while loading
//!
//! At most one browser session is alive at a time. It is created on first
//! use, replaced when it stops responding, and released by `close`.

use crate::config::{HttpConfig, Settings};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Request headers, in a stable order
pub type Headers = BTreeMap<String, String>;

/// Used only when the settings somehow carry no user agents
const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Errors from fetching a page
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection failed for {url}: {source}")]
    Connect { url: String, source: reqwest::Error },

    #[error("Request failed for {url}: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("No browser available for rendered fetches")]
    NoBrowser,

    #[error("Browser error: {0}")]
    Browser(String),
}

impl FetchError {
    fn classify(url: &str, error: reqwest::Error) -> Self {
        let url = url.to_string();
        if error.is_timeout() {
            FetchError::Timeout { url }
        } else if error.is_connect() {
            FetchError::Connect { url, source: error }
        } else {
            FetchError::Request { url, source: error }
        }
    }
}

/// A page as a browser saw it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedPage {
    pub body: String,
    /// Every URL the page requested while loading
    pub network_urls: Vec<String>,
    /// `name=value; ...` cookie string, if the session has cookies
    pub cookies: Option<String>,
}

/// Creates browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, FetchError>;
}

/// One live browser
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn render(&mut self, url: &str, headers: &Headers) -> Result<RenderedPage, FetchError>;

    /// False once the session can no longer serve requests
    async fn is_alive(&self) -> bool;

    async fn close(&mut self);
}

/// Builds the shared HTTP client
///
/// # Arguments
///
/// * `config` - Timeouts from the settings file
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

/// The fetch capability shared by one run
pub struct FetchSession {
    client: Client,
    user_agents: Vec<String>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    browser: Option<Box<dyn BrowserSession>>,
}

impl FetchSession {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let client = build_http_client(&settings.http).map_err(FetchError::Client)?;
        Ok(Self {
            client,
            user_agents: settings.user_agents.clone(),
            launcher: None,
            browser: None,
        })
    }

    /// Enables rendered fetches
    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn can_render(&self) -> bool {
        self.launcher.is_some()
    }

    /// A user agent picked at random from the pool
    pub fn user_agent(&self) -> String {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string())
    }

    /// Fetches `url` with a plain GET and returns the body
    pub async fn fetch_static(&self, url: &str, headers: &Headers) -> Result<String, FetchError> {
        debug!("Fetching {}", url);

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent")) {
            request = request.header("User-Agent", self.user_agent());
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.text().await.map_err(|e| FetchError::classify(url, e))
    }

    /// Fetches `url` through the browser
    ///
    /// A session that fails is torn down and replaced once before giving up.
    pub async fn fetch_rendered(&mut self, url: &str, headers: &Headers) -> Result<RenderedPage, FetchError> {
        let launcher = self.launcher.clone().ok_or(FetchError::NoBrowser)?;

        match self.render_once(&launcher, url, headers).await {
            Ok(page) => Ok(page),
            Err(e) => {
                warn!("Rendered fetch of {} failed ({}), relaunching browser", url, e);
                self.teardown().await;
                self.render_once(&launcher, url, headers).await
            }
        }
    }

    async fn render_once(
        &mut self,
        launcher: &Arc<dyn BrowserLauncher>,
        url: &str,
        headers: &Headers,
    ) -> Result<RenderedPage, FetchError> {
        let alive = match self.browser.as_ref() {
            Some(browser) => browser.is_alive().await,
            None => true,
        };
        if !alive {
            warn!("Browser session is no longer usable, replacing it");
            self.teardown().await;
        }

        if self.browser.is_none() {
            debug!("Launching browser session");
            self.browser = Some(launcher.launch().await?);
        }

        let browser = self.browser.as_mut().ok_or(FetchError::NoBrowser)?;
        debug!("Rendering {}", url);
        browser.render(url, headers).await
    }

    /// Fetches a page body, rendered when asked and possible
    ///
    /// A rendered fetch that fails falls back to a static one.
    pub async fn fetch_document(&mut self, url: &str, headers: &Headers, use_browser: bool) -> Result<String, FetchError> {
        if use_browser {
            if self.can_render() {
                match self.fetch_rendered(url, headers).await {
                    Ok(page) => return Ok(page.body),
                    Err(e) => warn!("Rendered fetch failed for {}: {}; retrying without browser", url, e),
                }
            } else {
                debug!("No browser configured, fetching {} statically", url);
            }
        }
        self.fetch_static(url, headers).await
    }

    async fn teardown(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            browser.close().await;
        }
    }

    /// Releases the browser session, if one is live
    pub async fn close(&mut self) {
        if self.browser.is_some() {
            debug!("Closing browser session");
        }
        self.teardown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> Settings {
        Settings::from_toml("user-agents = [\"TestAgent/1.0\"]\n[destination]\npath = \"out\"\n").unwrap()
    }

    struct FakeLauncher {
        launches: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        /// Renders that fail before the first success, across sessions
        failures: Arc<AtomicUsize>,
    }

    struct FakeSession {
        closes: Arc<AtomicUsize>,
        failures: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, FetchError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                closes: self.closes.clone(),
                failures: self.failures.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn render(&mut self, url: &str, _headers: &Headers) -> Result<RenderedPage, FetchError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(FetchError::Browser("crashed".to_string()));
            }
            Ok(RenderedPage {
                body: format!("<html><body>{}</body></html>", url),
                network_urls: vec!["https://cdn.example.com/index.m3u8".to_string()],
                cookies: None,
            })
        }

        async fn is_alive(&self) -> bool {
            true
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn launcher(failures: usize) -> (Arc<FakeLauncher>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let launches = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let launcher = Arc::new(FakeLauncher {
            launches: launches.clone(),
            closes: closes.clone(),
            failures: Arc::new(AtomicUsize::new(failures)),
        });
        (launcher, launches, closes)
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&HttpConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_static_sends_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("User-Agent", "TestAgent/1.0"))
            .and(header("Referer", "https://example.com/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let session = FetchSession::new(&settings()).unwrap();
        let mut headers = Headers::new();
        headers.insert("Referer".to_string(), "https://example.com/".to_string());

        let body = session
            .fetch_static(&format!("{}/page", server.uri()), &headers)
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_fetch_static_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let session = FetchSession::new(&settings()).unwrap();
        let result = session
            .fetch_static(&format!("{}/missing", server.uri()), &Headers::new())
            .await;
        assert!(matches!(
            result,
            Err(FetchError::Status { status, .. }) if status == StatusCode::NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn test_rendered_without_launcher() {
        let mut session = FetchSession::new(&settings()).unwrap();
        let result = session.fetch_rendered("https://example.com/", &Headers::new()).await;
        assert!(matches!(result, Err(FetchError::NoBrowser)));
    }

    #[tokio::test]
    async fn test_rendered_session_reused_and_closed() {
        let (launcher, launches, closes) = launcher(0);
        let mut session = FetchSession::new(&settings()).unwrap().with_launcher(launcher);

        session.fetch_rendered("https://example.com/a", &Headers::new()).await.unwrap();
        let page = session.fetch_rendered("https://example.com/b", &Headers::new()).await.unwrap();
        assert!(page.body.contains("/b"));
        assert_eq!(launches.load(Ordering::SeqCst), 1);

        session.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        session.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rendered_failure_relaunches_once() {
        let (launcher, launches, closes) = launcher(1);
        let mut session = FetchSession::new(&settings()).unwrap().with_launcher(launcher);

        let page = session.fetch_rendered("https://example.com/a", &Headers::new()).await.unwrap();
        assert_eq!(page.network_urls.len(), 1);
        assert_eq!(launches.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_document_falls_back_to_static() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("static body"))
            .mount(&server)
            .await;

        let (launcher, _, _) = launcher(5);
        let mut session = FetchSession::new(&settings()).unwrap().with_launcher(launcher);

        let body = session
            .fetch_document(&format!("{}/page", server.uri()), &Headers::new(), true)
            .await
            .unwrap();
        assert_eq!(body, "static body");
    }
}
