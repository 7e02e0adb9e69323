//! HTTP transport for the YATCO API
//!
//! The fetcher talks to the network only through [`HttpClient`], so tests
//! can substitute a scripted transport and production uses
//! [`ReqwestHttpClient`].

use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Default request timeout when none is given
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("yatco-sync/", env!("CARGO_PKG_VERSION"));

/// A GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub connect_timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Value of the first header named `name` (case-insensitive)
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Transport capability.
///
/// Implementations return `Err` only for transport failures (DNS, connect,
/// timeout); any HTTP status is a successful [`HttpResponse`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        (**self).get(request).await
    }
}

/// [`HttpClient`] over reqwest.
///
/// reqwest only configures connect timeouts per client, so one client is
/// built lazily for each distinct connect timeout and reused afterwards.
#[derive(Default)]
pub struct ReqwestHttpClient {
    clients: Mutex<HashMap<Option<Duration>, Client>>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, connect_timeout: Option<Duration>) -> Result<Client, FetchError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| FetchError::Transport("HTTP client pool poisoned".to_string()))?;

        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to build HTTP client: {e}")))?;

        clients.insert(connect_timeout, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let client = self.client_for(request.connect_timeout)?;

        let mut builder = client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(url = %request.url, timeout_secs = request.timeout.as_secs(), "GET");
        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(format!("Failed to read response body: {e}")))?;

        Ok(HttpResponse { status, body })
    }
}
