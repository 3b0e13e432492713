//! Authenticated HTTP collaborator
//!
//! The executor only needs `GET(url) -> {status, body}`; everything reqwest
//! specific stays behind [`ApiClient`] so tests can script responses.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::{FetchError, Result};

/// Status line, body and throttling hint of one response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header (delta-seconds form only)
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    /// The request could not even be built, e.g. a malformed URL
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn is_retriable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Issues authenticated GET requests
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, TransportError>;
}

/// reqwest-backed [`ApiClient`] sending a bearer token with every request
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    bearer_token: Option<String>,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("authenticated", &self.bearer_token.is_some())
            .finish()
    }
}

impl RestClient {
    pub fn builder() -> RestClientBuilder {
        RestClientBuilder::default()
    }
}

#[async_trait]
impl ApiClient for RestClient {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, TransportError> {
        let mut request = self.client.get(url).header(ACCEPT, "application/json");
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        debug!(%url, status, "received HTTP response");

        let body = response.text().await?;
        Ok(HttpResponse {
            status,
            body,
            retry_after,
        })
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Builder for [`RestClient`]
#[derive(Debug)]
pub struct RestClientBuilder {
    timeout: Duration,
    bearer_token: Option<String>,
    user_agent: String,
}

impl Default for RestClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            bearer_token: None,
            user_agent: format!("bcfetch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl RestClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn build(self) -> Result<RestClient> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .build()
            .map_err(|err| FetchError::HttpClient(err.to_string()))?;

        Ok(RestClient {
            client,
            bearer_token: self.bearer_token,
        })
    }
}

type Scripted = std::result::Result<HttpResponse, TransportError>;

struct Route {
    pattern: String,
    replies: Vec<Scripted>,
    served: usize,
}

/// In-memory [`ApiClient`] replaying canned replies
///
/// The first route whose pattern occurs in the URL answers. Its replies are
/// served in order and the last one repeats. Unmatched URLs get a 404.
#[derive(Default)]
pub struct ScriptedClient {
    routes: std::sync::Mutex<Vec<Route>>,
    requests: std::sync::Mutex<Vec<String>>,
    latency: Duration,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, pattern: impl Into<String>, replies: Vec<Scripted>) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Route {
                pattern: pattern.into(),
                replies,
                served: 0,
            });
        self
    }

    /// Shorthand for a route that always returns `{"value": records}`
    pub fn records(self, pattern: impl Into<String>, records: Vec<serde_json::Value>) -> Self {
        let body = serde_json::json!({ "value": records }).to_string();
        self.route(pattern, vec![Ok(HttpResponse::new(200, body))])
    }

    /// Simulated time each request takes
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// URLs requested so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self, pattern: &str) -> usize {
        self.requests()
            .iter()
            .filter(|url| url.contains(pattern))
            .count()
    }

    fn reply(&self, url: &str) -> Scripted {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let Some(route) = routes.iter_mut().find(|r| url.contains(&r.pattern)) else {
            return Ok(HttpResponse::new(404, "no scripted route"));
        };
        let index = route.served.min(route.replies.len().saturating_sub(1));
        route.served += 1;
        route
            .replies
            .get(index)
            .cloned()
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "no scripted reply")))
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.reply(url)
    }
}
