//! Drafting service contract.
//!
//! The remote drafting service is an external collaborator. This module only
//! fixes the shape of what goes in and what comes back, plus the executor type
//! the operation registry runs.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A source the drafting service cited in its reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

/// A generated reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DraftResponse {
    pub reply: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl DraftResponse {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            citations: Vec::new(),
        }
    }

    pub fn with_citation(mut self, url: impl Into<String>, title: impl Into<String>) -> Self {
        self.citations.push(Citation {
            url: url.into(),
            title: title.into(),
        });
        self
    }
}

/// Inputs captured at send time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftRequest {
    /// Body of the message being replied to.
    pub message_body: String,
    /// Optional user instruction ("decline politely", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

impl DraftRequest {
    pub fn new(message_body: impl Into<String>, instruction: Option<String>) -> Self {
        Self {
            message_body: message_body.into(),
            instruction: instruction.filter(|text| !text.trim().is_empty()),
        }
    }
}

/// The remote drafting service.
///
/// Implementations should observe `cancel` where the transport allows it.
/// Ignoring it is legal: cancellation is cooperative and the caller abandons
/// the result locally either way.
#[async_trait]
pub trait DraftingService: Send + Sync {
    async fn draft(&self, request: DraftRequest, cancel: CancellationToken)
    -> Result<DraftResponse>;
}

/// Zero-argument (apart from the cancellation signal) callable producing a
/// draft. Owned by exactly one registry record.
pub type Executor =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<DraftResponse>> + Send + Sync>;

/// Binds a request to a service, producing an [`Executor`].
pub fn executor_for(service: Arc<dyn DraftingService>, request: DraftRequest) -> Executor {
    Arc::new(move |cancel: CancellationToken| {
        let service = Arc::clone(&service);
        let request = request.clone();
        async move { service.draft(request, cancel).await }.boxed()
    })
}
