//! HTTP client for the remote drafting service.
//!
//! Wire format:
//!
//! ```text
//! POST <endpoint>
//! Authorization: Bearer <api_key>        (when configured)
//! {"message": "...", "instruction": "..."}
//!
//! 200 {"reply": "...", "citations": [{"url": "...", "title": "..."}]}
//! ```

use async_trait::async_trait;
use draftpane_core::config::ServiceConfig;
use draftpane_core::draft::{Citation, DraftRequest, DraftResponse, DraftingService};
use draftpane_core::error::{DraftError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instruction: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    reply: String,
    #[serde(default)]
    citations: Vec<WireCitation>,
}

#[derive(Debug, Deserialize)]
struct WireCitation {
    url: String,
    #[serde(default)]
    title: String,
}

impl From<WireResponse> for DraftResponse {
    fn from(wire: WireResponse) -> Self {
        Self {
            reply: wire.reply,
            citations: wire
                .citations
                .into_iter()
                .map(|c| Citation {
                    url: c.url,
                    title: c.title,
                })
                .collect(),
        }
    }
}

/// [`DraftingService`] backed by a JSON-over-HTTP endpoint.
#[derive(Clone)]
pub struct HttpDraftingService {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpDraftingService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DraftError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, request: &DraftRequest) -> Result<DraftResponse> {
        let body = WireRequest {
            message: &request.message_body,
            instruction: request.instruction.as_deref(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(map_http_error(status, &text));
        }

        parse_reply(&text)
    }
}

#[async_trait]
impl DraftingService for HttpDraftingService {
    async fn draft(
        &self,
        request: DraftRequest,
        cancel: CancellationToken,
    ) -> Result<DraftResponse> {
        tracing::debug!(
            "[HttpDraftingService] POST {} (instruction: {})",
            self.endpoint,
            request.instruction.is_some()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("[HttpDraftingService] Request abandoned after cancel");
                Err(DraftError::Cancelled)
            }
            result = self.send(&request) => result,
        }
    }
}

fn parse_reply(body: &str) -> Result<DraftResponse> {
    let wire: WireResponse = serde_json::from_str(body)
        .map_err(|e| DraftError::malformed(format!("unexpected drafting response: {e}")))?;
    Ok(wire.into())
}

fn map_http_error(status: StatusCode, body: &str) -> DraftError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|err| err.get("message").or(Some(err)))
                .and_then(|msg| msg.as_str())
                .map(|msg| msg.to_string())
        })
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("no body").to_string()
            } else {
                body.to_string()
            }
        });

    DraftError::Service {
        status_code: Some(status.as_u16()),
        message,
        is_retryable: is_retryable_status(status),
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}
