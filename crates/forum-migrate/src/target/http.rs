//! HTTP import API client.
//!
//! Every kind is created with `POST {base_url}/{collection}` and a JSON body
//! holding the request attributes plus `import_key`. The API answers with
//! `{"id": <internal id>}`.
//!
//! Status handling:
//! - 2xx: created
//! - 408, 429, 5xx and transport errors: retried with linear backoff, then
//!   the target counts as unavailable
//! - any other 4xx: this object was rejected; the run goes on

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TargetConfig;
use crate::core::{EntityKind, InternalId, TargetCreator};
use crate::error::{CreateError, MigrateError, Result};
use crate::mapper::MappedRequest;

/// Response bodies are cut to this many characters in error messages.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: i64,
}

pub struct HttpTarget {
    client: Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpTarget {
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MigrateError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    fn url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.endpoint())
    }

    /// One POST. `Ok(Err(..))` is a retryable failure.
    async fn attempt(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<std::result::Result<InternalId, String>, CreateError> {
        let mut request = self.client.post(url).json(body);
        if !self.api_key.is_empty() {
            request = request.header("Api-Key", &self.api_key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(Err(format!("request failed: {}", e))),
        };

        let status = response.status();
        if status.is_success() {
            let created: CreatedResponse = response.json().await.map_err(|e| {
                CreateError::Unavailable(format!("unexpected response from {}: {}", url, e))
            })?;
            return Ok(Ok(InternalId(created.id)));
        }

        let text = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), truncate(&text));
        if is_retryable(status) {
            Ok(Err(message))
        } else {
            Err(CreateError::Rejected(message))
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
    cut.push_str("...");
    cut
}

fn request_body(request: &MappedRequest) -> serde_json::Value {
    let mut body = request.attributes.clone();
    if let Some(key) = &request.import_key {
        body.insert("import_key".to_string(), key.clone().into());
    }
    serde_json::Value::Object(body)
}

#[async_trait]
impl TargetCreator for HttpTarget {
    async fn create(
        &self,
        kind: EntityKind,
        request: &MappedRequest,
    ) -> std::result::Result<InternalId, CreateError> {
        let url = self.url(kind);
        let body = request_body(request);

        let mut retries = 0;
        loop {
            match self.attempt(&url, &body).await? {
                Ok(id) => {
                    debug!("created {} {}", kind, id);
                    return Ok(id);
                }
                Err(message) if retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        "{} create failed ({}), retry {}/{}",
                        kind, message, retries, self.max_retries
                    );
                    tokio::time::sleep(self.retry_delay * retries).await;
                }
                Err(message) => {
                    return Err(CreateError::Unavailable(format!(
                        "{} after {} attempts: {}",
                        url,
                        retries + 1,
                        message
                    )));
                }
            }
        }
    }

    fn target_type(&self) -> &'static str {
        "http"
    }
}
