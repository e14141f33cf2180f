//! Task pane snapshot DTOs.
//!
//! Stored layout, one entry per conversation:
//!
//! ```json
//! {"version":1,"snapshot":{"statusMessage":"done","pipelineResponse":{...},
//!  "optionalPrompt":"","isOptionalPromptVisible":false,"isSending":false,
//!  "activeRequestId":null,"activeRequestPrompt":null,"lastUpdatedUtc":"..."}}
//! ```
//!
//! There is no migration chain: an entry whose `version` differs from
//! [`SNAPSHOT_VERSION`], or whose `snapshot` does not decode, is discarded
//! wholesale.

use draftpane_core::draft::{Citation, DraftResponse};
use draftpane_core::pane::TaskPaneSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current schema version of the persisted envelope.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Citation DTO for V1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CitationV1 {
    pub url: String,
    pub title: String,
}

/// Draft response DTO for V1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftResponseV1 {
    pub reply: String,
    #[serde(default)]
    pub citations: Vec<CitationV1>,
}

/// Task pane snapshot V1.
///
/// All fields except `lastUpdatedUtc` are required; a partial object is
/// treated as malformed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPaneSnapshotV1 {
    pub status_message: String,
    pub pipeline_response: Option<DraftResponseV1>,
    pub optional_prompt: String,
    pub is_optional_prompt_visible: bool,
    pub is_sending: bool,
    pub active_request_id: Option<String>,
    pub active_request_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_utc: Option<String>,
}

/// Versioned envelope as written to storage.
#[derive(Debug, Clone, Serialize)]
pub struct PersistedSnapshot {
    pub version: u32,
    pub snapshot: TaskPaneSnapshotV1,
}

/// Loosely-typed envelope used for reading, so the version can be checked
/// before the payload is trusted.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    version: Value,
    snapshot: Value,
}

/// Why a stored value was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotDecodeError {
    /// Not JSON, or not an object with `version` and `snapshot`.
    InvalidEnvelope(String),
    /// Envelope written by a different schema version.
    VersionMismatch { found: String },
    /// `snapshot` does not match the V1 shape.
    MalformedSnapshot(String),
}

impl std::fmt::Display for SnapshotDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEnvelope(e) => write!(f, "invalid envelope: {e}"),
            Self::VersionMismatch { found } => {
                write!(f, "version mismatch: expected {SNAPSHOT_VERSION}, found {found}")
            }
            Self::MalformedSnapshot(e) => write!(f, "malformed snapshot: {e}"),
        }
    }
}

impl std::error::Error for SnapshotDecodeError {}

// ============================================================================
// Domain model conversions
// ============================================================================

impl From<Citation> for CitationV1 {
    fn from(citation: Citation) -> Self {
        Self {
            url: citation.url,
            title: citation.title,
        }
    }
}

impl From<CitationV1> for Citation {
    fn from(dto: CitationV1) -> Self {
        Self {
            url: dto.url,
            title: dto.title,
        }
    }
}

impl From<DraftResponse> for DraftResponseV1 {
    fn from(response: DraftResponse) -> Self {
        Self {
            reply: response.reply,
            citations: response.citations.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<DraftResponseV1> for DraftResponse {
    fn from(dto: DraftResponseV1) -> Self {
        Self {
            reply: dto.reply,
            citations: dto.citations.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<TaskPaneSnapshot> for TaskPaneSnapshotV1 {
    fn from(snapshot: TaskPaneSnapshot) -> Self {
        Self {
            status_message: snapshot.status_message,
            pipeline_response: snapshot.pipeline_response.map(Into::into),
            optional_prompt: snapshot.optional_prompt,
            is_optional_prompt_visible: snapshot.is_optional_prompt_visible,
            is_sending: snapshot.is_sending,
            active_request_id: snapshot.active_request_id,
            active_request_prompt: snapshot.active_request_prompt,
            last_updated_utc: snapshot.last_updated_utc,
        }
    }
}

impl From<TaskPaneSnapshotV1> for TaskPaneSnapshot {
    fn from(dto: TaskPaneSnapshotV1) -> Self {
        Self {
            status_message: dto.status_message,
            pipeline_response: dto.pipeline_response.map(Into::into),
            optional_prompt: dto.optional_prompt,
            is_optional_prompt_visible: dto.is_optional_prompt_visible,
            is_sending: dto.is_sending,
            active_request_id: dto.active_request_id,
            active_request_prompt: dto.active_request_prompt,
            last_updated_utc: dto.last_updated_utc,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Serializes a snapshot into the versioned envelope.
pub fn encode_snapshot(snapshot: &TaskPaneSnapshot) -> serde_json::Result<String> {
    serde_json::to_string(&PersistedSnapshot {
        version: SNAPSHOT_VERSION,
        snapshot: snapshot.clone().into(),
    })
}

/// Parses a stored value. Never partially trusts a mismatched envelope.
pub fn decode_snapshot(raw: &str) -> Result<TaskPaneSnapshot, SnapshotDecodeError> {
    let envelope: RawEnvelope = serde_json::from_str(raw)
        .map_err(|e| SnapshotDecodeError::InvalidEnvelope(e.to_string()))?;

    if envelope.version.as_u64() != Some(u64::from(SNAPSHOT_VERSION)) {
        return Err(SnapshotDecodeError::VersionMismatch {
            found: envelope.version.to_string(),
        });
    }

    let dto: TaskPaneSnapshotV1 = serde_json::from_value(envelope.snapshot)
        .map_err(|e| SnapshotDecodeError::MalformedSnapshot(e.to_string()))?;

    Ok(dto.into())
}
