//! Client configuration: endpoints, credentials and HTTP client tuning.

use crate::protocol::request::ServiceRequest;
use crate::{Error, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

pub const DEFAULT_HTTP_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
pub const DEFAULT_WEBSOCKET_BASE_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference";
pub const DEFAULT_REALTIME_BASE_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/realtime";

pub const ENV_API_KEY: &str = "DASHSCOPE_API_KEY";
pub const ENV_HTTP_BASE_URL: &str = "DASHSCOPE_HTTP_BASE_URL";
pub const ENV_WEBSOCKET_BASE_URL: &str = "DASHSCOPE_WEBSOCKET_BASE_URL";
pub const ENV_REALTIME_BASE_URL: &str = "DASHSCOPE_REALTIME_BASE_URL";
pub const ENV_WORKSPACE: &str = "DASHSCOPE_WORKSPACE";

pub(crate) const HEADER_WORKSPACE: &str = "x-dashscope-workspace";
pub(crate) const HEADER_ASYNC: &str = "x-dashscope-async";
pub(crate) const HEADER_SSE: &str = "x-dashscope-sse";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    pub http_base_url: String,
    pub websocket_base_url: String,
    pub realtime_base_url: String,
    pub workspace: Option<String>,
    pub timeout: Duration,
    pub pool_idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            http_base_url: DEFAULT_HTTP_BASE_URL.to_string(),
            websocket_base_url: DEFAULT_WEBSOCKET_BASE_URL.to_string(),
            realtime_base_url: DEFAULT_REALTIME_BASE_URL.to_string(),
            workspace: None,
            timeout: DEFAULT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Empty values are
    /// treated as unset.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();
        Self {
            api_key: get(ENV_API_KEY),
            http_base_url: get(ENV_HTTP_BASE_URL).unwrap_or(defaults.http_base_url),
            websocket_base_url: get(ENV_WEBSOCKET_BASE_URL).unwrap_or(defaults.websocket_base_url),
            realtime_base_url: get(ENV_REALTIME_BASE_URL).unwrap_or(defaults.realtime_base_url),
            workspace: get(ENV_WORKSPACE),
            ..defaults
        }
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn http_base_url(mut self, url: impl Into<String>) -> Self {
        self.http_base_url = url.into();
        self
    }

    #[must_use]
    pub fn websocket_base_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_base_url = url.into();
        self
    }

    #[must_use]
    pub fn realtime_base_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_base_url = url.into();
        self
    }

    #[must_use]
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the key for a request: request-level first, then configured.
    ///
    /// # Errors
    /// Returns `NoApiKey` when neither is present.
    #[allow(clippy::result_large_err)]
    pub fn resolve_api_key<'a>(&'a self, request: &'a ServiceRequest) -> Result<&'a str> {
        self.resolve_key(request.api_key.as_deref())
    }

    #[allow(clippy::result_large_err)]
    fn resolve_key<'a>(&'a self, preferred: Option<&'a str>) -> Result<&'a str> {
        preferred
            .filter(|key| !key.is_empty())
            .or_else(|| self.api_key.as_deref().filter(|key| !key.is_empty()))
            .ok_or(Error::NoApiKey)
    }

    /// Authorization and workspace headers. Set fields of `credentials` win
    /// over the configured ones.
    ///
    /// # Errors
    /// Returns an error if no key is available or a header is malformed.
    #[allow(clippy::result_large_err)]
    pub fn auth_headers(&self, credentials: &Credentials) -> Result<HeaderMap> {
        let api_key = self.resolve_key(credentials.api_key.as_deref())?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {api_key}"))?);
        if let Some(workspace) = credentials.workspace.as_deref().or(self.workspace.as_deref()) {
            headers.insert(HEADER_WORKSPACE, HeaderValue::from_str(workspace)?);
        }
        Ok(headers)
    }

    /// Authorization, workspace and request-specific headers.
    ///
    /// # Errors
    /// Returns an error if no key is available or a header is malformed.
    #[allow(clippy::result_large_err)]
    pub fn headers_for(&self, request: &ServiceRequest) -> Result<HeaderMap> {
        let mut headers = self.auth_headers(&Credentials::from_request(request))?;
        for (name, value) in &request.headers {
            headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
        }
        Ok(headers)
    }
}

/// Per-call overrides of the configured API key and workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub workspace: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn from_request(request: &ServiceRequest) -> Self {
        Self {
            api_key: request.api_key.clone(),
            workspace: request.workspace.clone(),
        }
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Field-wise fallback: unset fields are taken from `other`.
    #[must_use]
    pub fn or(self, other: &Self) -> Self {
        Self {
            api_key: self.api_key.or_else(|| other.api_key.clone()),
            workspace: self.workspace.or_else(|| other.workspace.clone()),
        }
    }
}
