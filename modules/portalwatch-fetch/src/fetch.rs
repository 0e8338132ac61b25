use async_trait::async_trait;
use portalwatch_common::canonicalize;
use tracing::warn;

/// Result of one fetch (§4.1). Never an `Err` — transport failures are data,
/// not exceptions, so the worker pool's result channel stays infallible.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub url: String,
    pub status: i32,
    pub body: Option<String>,
    pub error: Option<String>,
}

impl FetchOutcome {
    pub fn transport_error(url: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            url: url.into(),
            status: -1,
            body: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Canonicalize the body as JSON. `None` if the fetch failed or the body
    /// is not valid JSON — callers fall back to storing it `non_json`.
    pub fn canonical_json(&self) -> Option<String> {
        self.body.as_deref().and_then(|b| canonicalize(b).ok())
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, cookies: Option<&str>) -> FetchOutcome;
}

/// `reqwest`-backed fetcher. §6 requires a non-empty `User-Agent` on every
/// request.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        if user_agent.trim().is_empty() {
            anyhow::bail!("user agent must not be empty");
        }
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, cookies: Option<&str>) -> FetchOutcome {
        let mut req = self.client.get(url);
        if let Some(cookie_header) = cookies {
            req = req.header(reqwest::header::COOKIE, cookie_header);
        }

        let response = match req.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "transport error");
                return FetchOutcome::transport_error(url, e);
            }
        };

        let status = response.status().as_u16() as i32;
        match response.text().await {
            Ok(body) => FetchOutcome { url: url.to_string(), status, body: Some(body), error: None },
            Err(e) => {
                warn!(url, error = %e, "error reading response body");
                FetchOutcome::transport_error(url, e)
            }
        }
    }
}
