use log::{debug, warn};
use reqwest::header::HeaderMap;
use reqwest::{Client, Proxy, StatusCode};
use serde_json::Value;
use std::time::Duration;

use crate::error::{TrackerError, TrackerResult};

/// Transport settings. Passed in explicitly; the gateway never reads
/// process-wide proxy settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub proxy_url: Option<String>,
    pub verify_tls: bool,
    /// Zero disables the timeout.
    pub timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            verify_tls: true,
            timeout_seconds: 30,
        }
    }
}

/// Request payload encodings the tracker endpoints accept.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Form(Vec<(String, String)>),
    Json(Value),
}

/// Thin wrapper over a reqwest client that turns every non-200 answer into
/// [`TrackerError::Transport`].
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> TrackerResult<Self> {
        let mut builder = Client::builder();

        if config.timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_seconds));
        }

        builder = match &config.proxy_url {
            Some(proxy_url) => {
                debug!("Routing tracker traffic through proxy {}", proxy_url);
                builder.proxy(Proxy::all(proxy_url)?)
            }
            None => builder.no_proxy(),
        };

        if !config.verify_tls {
            warn!("TLS certificate verification is disabled; use only for local interception");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    pub async fn get(
        &self,
        url: &str,
        headers: HeaderMap,
        params: &[(&str, String)],
    ) -> TrackerResult<Value> {
        debug!("GET {} {:?}", url, params);
        let response = self
            .client
            .get(url)
            .headers(headers)
            .query(params)
            .send()
            .await?;
        Self::decode(url, response).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: &RequestBody,
        headers: HeaderMap,
    ) -> TrackerResult<Value> {
        debug!("POST {}", url);
        let request = self.client.post(url).headers(headers);
        let request = match body {
            RequestBody::Form(pairs) => request.form(pairs),
            RequestBody::Json(value) => request.json(value),
        };
        let response = request.send().await?;
        Self::decode(url, response).await
    }

    async fn decode(url: &str, response: reqwest::Response) -> TrackerResult<Value> {
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response.json::<Value>().await?);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!("Request to {} failed: {} {}", url, status, body);
        Err(TrackerError::Transport {
            url: url.to_string(),
            status,
            body,
        })
    }
}
