//! Health probes for proxied STDIO servers.

use std::time::Duration;

use {
    composer_config::{HealthCheckMethod, StdioProxiedServerConfig},
    serde_json::json,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use composer_metrics::{counter, health as health_metrics, labels};

use crate::{
    error::{Error, Result},
    rpc::RpcEndpoint,
    types::error_codes,
};

/// One server's probe settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub server: String,
    pub method: HealthCheckMethod,
    pub tool: Option<String>,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthProbe {
    /// `None` when checks are disabled for the server.
    pub fn from_config(cfg: &StdioProxiedServerConfig) -> Option<Self> {
        cfg.health_check_enabled.then(|| Self {
            server: cfg.name.clone(),
            method: cfg.health_check_method,
            tool: cfg.health_check_tool.clone(),
            interval: Duration::from_secs(cfg.health_check_interval.max(1)),
            timeout: Duration::from_secs(cfg.health_check_timeout.max(1)),
        })
    }

    /// Send one probe. Any transport failure, timeout or error reply fails it,
    /// except `-32601` to a `ping`: the server answered, it just has no ping.
    pub async fn check(&self, endpoint: &dyn RpcEndpoint) -> Result<()> {
        #[cfg(feature = "metrics")]
        counter!(health_metrics::CHECKS_TOTAL, labels::SERVER => self.server.clone()).increment(1);

        let result = self.probe(endpoint).await;
        match &result {
            Ok(()) => debug!(server = %self.server, "health check passed"),
            Err(e) => {
                warn!(server = %self.server, error = %e, "health check failed");
                #[cfg(feature = "metrics")]
                counter!(health_metrics::CHECK_FAILURES_TOTAL, labels::SERVER => self.server.clone())
                    .increment(1);
            },
        }
        result
    }

    async fn probe(&self, endpoint: &dyn RpcEndpoint) -> Result<()> {
        if !endpoint.is_alive().await {
            return Err(Error::message(format!("server '{}' is unreachable", self.server)));
        }
        let (method, params) = match (self.method, self.tool.as_deref()) {
            (HealthCheckMethod::Tool, Some(tool)) => {
                ("tools/call", Some(json!({ "name": tool, "arguments": {} })))
            },
            (HealthCheckMethod::Tool, None) | (HealthCheckMethod::Ping, _) => ("ping", None),
            (HealthCheckMethod::Custom, _) => ("tools/list", Some(json!({}))),
        };
        let response = endpoint.request(method, params, self.timeout).await?;
        match response.error {
            Some(error) if method == "ping" && error.code == error_codes::METHOD_NOT_FOUND => {
                Ok(())
            },
            Some(error) => Err(Error::message(format!(
                "{method} answered with error {}: {}",
                error.code, error.message
            ))),
            None => Ok(()),
        }
    }
}
