//! HTTP health probe

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::errors::DeployError;
use crate::health::{HealthProbe, HealthVerdict};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes `GET {base}{endpoint}` and reads `GET {base}/version`
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    health_url: Url,
    version_url: Url,
}

impl HttpProbe {
    /// Create a probe. `endpoint` is appended to `base_url` verbatim.
    pub fn new(base_url: &str, endpoint: &str, timeout: Duration) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(timeout).build()?;

        let base = base_url.trim_end_matches('/');
        let endpoint = if endpoint.starts_with('/') {
            endpoint.to_string()
        } else {
            format!("/{}", endpoint)
        };

        let parse = |raw: String| {
            Url::parse(&raw)
                .map_err(|e| DeployError::ConfigError(format!("Invalid health URL {}: {}", raw, e)))
        };

        Ok(Self {
            client,
            health_url: parse(format!("{}{}", base, endpoint))?,
            version_url: parse(format!("{}/version", base))?,
        })
    }

    pub fn health_url(&self) -> &Url {
        &self.health_url
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> HealthVerdict {
        let started = Instant::now();
        match self.client.get(self.health_url.clone()).send().await {
            Ok(response) => {
                let verdict =
                    HealthVerdict::from_status(response.status().as_u16(), started.elapsed());
                debug!("GET {} -> {}", self.health_url, verdict.describe());
                verdict
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    "timeout".to_string()
                } else if e.is_connect() {
                    "connection failed".to_string()
                } else {
                    e.to_string()
                };
                debug!("GET {} failed: {}", self.health_url, reason);
                HealthVerdict::unreachable(reason, started.elapsed())
            }
        }
    }

    async fn version(&self) -> Option<String> {
        let response = self.client.get(self.version_url.clone()).send().await.ok()?;
        if !response.status().is_success() {
            debug!("GET {} -> {}", self.version_url, response.status());
            return None;
        }
        let body = response.text().await.ok()?;
        parse_version_body(&body)
    }

    fn target(&self) -> String {
        self.health_url.to_string()
    }
}

/// Accepts `{"version": "..."}` or a plain-text body
fn parse_version_body(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => map
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        Ok(serde_json::Value::String(version)) => Some(version),
        _ => Some(body.to_string()),
    }
}
