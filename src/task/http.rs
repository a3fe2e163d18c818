//! HTTP check-in executor
//!
//! Each execution builds a client bound to the identity's egress, optionally
//! probes the egress IP, fetches the account status and then sends a ping.
//! A shared governor limiter caps the request rate across all identities.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, Proxy, Response};
use serde::Serialize;
use std::num::NonZeroU32;
use tracing::{debug, info, warn};
use url::Url;

use super::headers::{build_checkin_headers, random_user_agent};
use super::{classify_status, classify_transport_error, TaskError, TaskExecutor};
use crate::config::TaskConfig;
use crate::models::{Identity, ProxyEndpoint, TaskOutcome};

#[derive(Debug, Serialize)]
struct PingPayload<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    extension_id: Option<&'a str>,
    timestamp: String,
}

/// Check-in executor speaking HTTP to the configured service
pub struct HttpCheckinExecutor {
    config: TaskConfig,

    /// Parsed `config.base_url`
    base_url: Url,

    /// Rate limiter shared by every identity
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpCheckinExecutor {
    /// Create an executor from task configuration
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Url` if the base URL does not parse
    pub fn new(config: TaskConfig) -> Result<Self, TaskError> {
        let base_url = Url::parse(&config.base_url)?;
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            config,
            base_url,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    /// Task configuration in use
    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// URL of the status request for `user_id`
    pub fn status_url(&self, user_id: &str) -> Result<Url, TaskError> {
        let mut url = self.base_url.join(&self.config.status_path)?;
        url.query_pairs_mut().append_pair("user_id", user_id);
        Ok(url)
    }

    /// URL of the ping request
    pub fn ping_url(&self) -> Result<Url, TaskError> {
        Ok(self.base_url.join(&self.config.ping_path)?)
    }

    fn build_client(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, TaskError> {
        let builder = Client::builder()
            .timeout(self.config.request_timeout())
            .gzip(true)
            .cookie_store(true);

        let builder = match proxy {
            Some(proxy) => {
                let route = Proxy::all(proxy.url()).map_err(|e| TaskError::InvalidProxy {
                    proxy: proxy.url().to_string(),
                    reason: e.to_string(),
                })?;
                builder.proxy(route)
            }
            None => builder.no_proxy(),
        };

        Ok(builder.build()?)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, TaskOutcome> {
        self.rate_limiter.until_ready().await;
        request
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))
    }

    /// Log the egress IP; a dead proxy aborts the task here
    async fn probe_egress(&self, client: &Client, identity: &Identity) -> Result<(), TaskOutcome> {
        let Some(ref probe_url) = self.config.ip_probe_url else {
            return Ok(());
        };

        match self.send(client.get(probe_url)).await {
            Ok(response) => {
                let ip = response
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|body| body.get("ip").and_then(|ip| ip.as_str()).map(str::to_string));
                info!(
                    identity = %identity.key,
                    ip = ip.as_deref().unwrap_or("unknown"),
                    "Egress IP"
                );
                Ok(())
            }
            Err(outcome @ TaskOutcome::ProxyFailure(_)) => Err(outcome),
            Err(other) => {
                warn!(identity = %identity.key, error = %other, "Egress IP probe failed");
                Ok(())
            }
        }
    }

    async fn run(&self, identity: &Identity, proxy: Option<&ProxyEndpoint>) -> Result<(), TaskOutcome> {
        let client = self.build_client(proxy).map_err(TaskError::into_outcome)?;
        let headers = build_checkin_headers(
            &identity.credentials.session_token,
            random_user_agent(),
            self.config.origin.as_deref(),
        )
        .map_err(TaskError::into_outcome)?;

        if proxy.is_some() {
            self.probe_egress(&client, identity).await?;
        }

        let status_url = self
            .status_url(&identity.credentials.user_id)
            .map_err(TaskError::into_outcome)?;
        let response = self
            .send(client.get(status_url).headers(headers.clone()))
            .await?;
        if let Some(outcome) = classify_status("status", response.status()) {
            return Err(outcome);
        }
        debug!(identity = %identity.key, status = %response.status(), "Account status fetched");

        let step_delay = self.config.step_delay();
        if !step_delay.is_zero() {
            tokio::time::sleep(step_delay).await;
        }

        let payload = PingPayload {
            user_id: &identity.credentials.user_id,
            extension_id: self.config.extension_id.as_deref(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let ping_url = self.ping_url().map_err(TaskError::into_outcome)?;
        let response = self
            .send(client.post(ping_url).headers(headers).json(&payload))
            .await?;
        if let Some(outcome) = classify_status("ping", response.status()) {
            return Err(outcome);
        }

        debug!(identity = %identity.key, status = %response.status(), "Ping accepted");
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for HttpCheckinExecutor {
    async fn execute(&self, identity: &Identity, proxy: Option<&ProxyEndpoint>) -> TaskOutcome {
        match self.run(identity, proxy).await {
            Ok(()) => TaskOutcome::Success,
            Err(outcome) => outcome,
        }
    }
}
