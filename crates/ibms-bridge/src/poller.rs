//! HTTP telemetry polling
//!
//! Fetches one JSON snapshot per call. A response body that is not JSON is
//! returned as a JSON string so the caller still sees what came back.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::{HttpMethod, PollConfig};

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error from {url}: {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Source of telemetry snapshots
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn fetch(&self) -> Result<Value, PollError>;
}

pub struct HttpPoller {
    client: Client,
    config: PollConfig,
    headers: HeaderMap,
    query: Vec<(String, String)>,
}

impl HttpPoller {
    pub fn new(config: PollConfig) -> Result<Self, PollError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(PollError::Client)?;
        let headers = build_headers(&config)?;
        let query = query_pairs(&config.params);

        Ok(Self {
            client,
            config,
            headers,
            query,
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl TelemetrySource for HttpPoller {
    async fn fetch(&self) -> Result<Value, PollError> {
        let url = &self.config.url;
        info!("Sending {:?} request to {}", self.config.method, url);

        let mut request = match self.config.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        request = request.headers(self.headers.clone()).query(&self.query);

        if let Some(auth) = &self.config.basic_auth {
            request = request.basic_auth(&auth.username, auth.password.as_ref());
        }
        if let Some(body) = &self.config.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| {
            if source.is_timeout() {
                PollError::Timeout { url: url.clone() }
            } else {
                PollError::Request {
                    url: url.clone(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status {
                url: url.clone(),
                status: status.as_u16(),
            });
        }

        let text = response.text().await.map_err(PollError::Body)?;
        debug!(bytes = text.len(), "Received response");

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

fn build_headers(config: &PollConfig) -> Result<HeaderMap, PollError> {
    let mut headers = HeaderMap::new();

    let invalid = |name: &str, reason: String| PollError::InvalidHeader {
        name: name.to_string(),
        reason,
    };

    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(name, e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(name, e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    if let Some(token) = &config.bearer_token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| invalid("Authorization", e.to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    if let Some(key) = &config.api_key {
        let mut value = HeaderValue::from_str(key).map_err(|e| invalid("X-API-Key", e.to_string()))?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static("x-api-key"), value);
    }

    Ok(headers)
}

/// Flatten query parameters; arrays become repeated keys, nulls are dropped
fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            other => Some(other.to_string()),
        }
    }

    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                pairs.extend(items.iter().filter_map(scalar).map(|v| (key.clone(), v)));
            }
            other => {
                if let Some(v) = scalar(other) {
                    pairs.push((key.clone(), v));
                }
            }
        }
    }
    pairs
}
