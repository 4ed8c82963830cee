use crate::config::ClientConfig;
use crate::protocol::ServiceRequest;
use crate::session::{DuplexProtocol, DuplexSession, SessionEvents};
use crate::transport::{Connector, RestClient, WsConnector};
use crate::Result;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{AsyncTasks, Conversation, HalfDuplex, Recognition, SpeechSynthesizer};

/// Entry point: one configuration, one HTTP client and one WebSocket
/// connector shared by every call and session it hands out.
#[derive(Clone)]
pub struct DashScope {
    config: Arc<ClientConfig>,
    rest: RestClient,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for DashScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashScope").field("config", &self.config).finish_non_exhaustive()
    }
}

impl DashScope {
    /// A builder seeded from the `DASHSCOPE_*` environment variables.
    #[must_use]
    pub fn builder() -> DashScopeBuilder {
        DashScopeBuilder::new()
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Use a custom duplex transport, e.g. an in-memory one in tests.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let config = Arc::new(config);
        let rest = RestClient::new(Arc::clone(&config))?;
        Ok(Self {
            config,
            rest,
            connector,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn half_duplex(&self) -> HalfDuplex {
        HalfDuplex::new(self.rest.clone(), Arc::clone(&self.connector))
    }

    #[must_use]
    pub fn tasks(&self) -> AsyncTasks<RestClient> {
        AsyncTasks::new(self.rest.clone())
    }

    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn recognition(&self, request: ServiceRequest) -> Result<Recognition> {
        Recognition::new(Arc::clone(&self.connector), &self.config, request)
    }

    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn synthesizer(&self, request: ServiceRequest) -> Result<SpeechSynthesizer> {
        SpeechSynthesizer::new(self.half_duplex(), request)
    }

    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn conversation(
        &self,
        model: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Result<Conversation> {
        Conversation::new(Arc::clone(&self.connector), &self.config, model, parameters)
    }

    /// A bare duplex session for any protocol shape.
    ///
    /// # Errors
    /// Returns `InputRequired` or `NoApiKey` before any I/O.
    #[allow(clippy::result_large_err)]
    pub fn duplex<P: DuplexProtocol>(
        &self,
        protocol: P,
        request: ServiceRequest,
    ) -> Result<(DuplexSession<P>, SessionEvents)> {
        DuplexSession::new(Arc::clone(&self.connector), &self.config, protocol, request)
    }
}

pub struct DashScopeBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
}

impl DashScopeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ClientConfig::from_env(),
            connector: None,
        }
    }

    /// Start from an explicit configuration instead of the environment.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config = self.config.api_key(key);
        self
    }

    #[must_use]
    pub fn workspace(mut self, workspace: impl Into<String>) -> Self {
        self.config = self.config.workspace(workspace);
        self
    }

    #[must_use]
    pub fn http_base_url(mut self, url: impl Into<String>) -> Self {
        self.config = self.config.http_base_url(url);
        self
    }

    #[must_use]
    pub fn websocket_base_url(mut self, url: impl Into<String>) -> Self {
        self.config = self.config.websocket_base_url(url);
        self
    }

    #[must_use]
    pub fn realtime_base_url(mut self, url: impl Into<String>) -> Self {
        self.config = self.config.realtime_base_url(url);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<DashScope> {
        let connector = self.connector.unwrap_or_else(|| Arc::new(WsConnector));
        DashScope::with_connector(self.config, connector)
    }
}

impl Default for DashScopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
