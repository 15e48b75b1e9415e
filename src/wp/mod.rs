use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::config::Config;

pub mod model;

/// Query string pairs, in request order.
pub type Params = Vec<(String, String)>;

/// What the sync engine needs from a GET: the success flag, the status for
/// logging, and the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub ok: bool,
    pub status: u16,
    pub text: String,
}

impl ApiResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            status: 200,
            text: text.into(),
        }
    }

    pub fn error(status: u16, text: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            text: text.into(),
        }
    }

    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.text)
    }

    pub fn has_body(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Read-only access to the remote REST API. `Err` means the request never
/// produced a response (DNS, TLS, connection reset, ...).
#[async_trait]
pub trait WpTransport: Send + Sync {
    async fn get(&self, path: &str, params: &[(String, String)]) -> Result<ApiResponse>;
}

#[derive(Clone)]
pub struct WpClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for WpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WpClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl WpClient {
    pub fn new(base_url: Url, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("wp-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = cfg.api_base_url()?;
        Self::new(base_url, cfg.auth_token())
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn build_request(&self, path: &str, params: &[(String, String)]) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .with_context(|| format!("invalid API path: {path}"))?;
        let mut builder = self.http.get(endpoint).query(params);
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.build().context("failed to build API request")
    }
}

#[async_trait]
impl WpTransport for WpClient {
    async fn get(&self, path: &str, params: &[(String, String)]) -> Result<ApiResponse> {
        let request = self.build_request(path, params)?;
        debug!(url = %request.url(), "GET");
        let res = self
            .http
            .execute(request)
            .await
            .with_context(|| format!("failed to reach API for {path}"))?;
        let status = res.status();
        let text = res.text().await.context("failed to read API response")?;
        Ok(ApiResponse {
            ok: status.is_success(),
            status: status.as_u16(),
            text,
        })
    }
}

/// Wraps a transport and emits the "public APIs only" warning once per
/// instance, on the first unauthenticated request.
pub struct Api<T> {
    transport: T,
    authenticated: bool,
    warned: AtomicBool,
}

impl<T: WpTransport> Api<T> {
    pub fn new(transport: T, authenticated: bool) -> Self {
        Self {
            transport,
            authenticated,
            warned: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the unauthenticated warning has been emitted.
    pub fn warned_public_only(&self) -> bool {
        self.warned.load(Ordering::Relaxed)
    }
}

impl Api<WpClient> {
    pub fn from_client(client: WpClient) -> Self {
        let authenticated = client.is_authenticated();
        Self::new(client, authenticated)
    }
}

#[async_trait]
impl<T: WpTransport> WpTransport for Api<T> {
    async fn get(&self, path: &str, params: &[(String, String)]) -> Result<ApiResponse> {
        if !self.authenticated && !self.warned.swap(true, Ordering::Relaxed) {
            warn!("no API auth token configured; only public content is available");
        }
        self.transport.get(path, params).await
    }
}
