//! Task pane domain models.
//!
//! A [`TaskPaneSnapshot`] is everything the reply pane needs to restore itself
//! for one conversation: the last draft, the instruction being typed, and
//! whether a request is still in flight (with enough inputs to resume it).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::draft::DraftResponse;

/// Status line shown after a draft arrives.
pub const STATUS_DONE: &str = "done";
/// Status line shown while a request is in flight.
pub const STATUS_SENDING: &str = "Drafting reply…";
/// Status line shown after the user cancels.
pub const STATUS_CANCELLED: &str = "Request cancelled.";

/// Durable per-conversation UI state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskPaneSnapshot {
    /// Human-readable status line.
    #[serde(default)]
    pub status_message: String,

    /// Last successful draft.
    #[serde(default)]
    pub pipeline_response: Option<DraftResponse>,

    /// Instruction text in the prompt box.
    #[serde(default)]
    pub optional_prompt: String,

    #[serde(default)]
    pub is_optional_prompt_visible: bool,

    // ============================================================================
    // Resumable-operation pointer
    // ============================================================================
    /// True while a request is outstanding. Mirrors `active_request_id`.
    #[serde(default)]
    pub is_sending: bool,

    /// Registry identity of the outstanding request.
    #[serde(default)]
    pub active_request_id: Option<String>,

    /// Instruction the outstanding request was sent with.
    #[serde(default)]
    pub active_request_prompt: Option<String>,

    /// RFC 3339 timestamp of the last mutation. Not part of emptiness checks.
    #[serde(default)]
    pub last_updated_utc: Option<String>,
}

impl TaskPaneSnapshot {
    /// Creates the empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this snapshot carries nothing worth persisting.
    ///
    /// Structural comparison against the default, ignoring the timestamp.
    /// Cannot tell "never touched" from "reset to defaults".
    pub fn is_empty(&self) -> bool {
        let mut bare = self.clone();
        bare.last_updated_utc = None;
        bare == Self::default()
    }

    /// Stamps `last_updated_utc` with the current time.
    pub fn touch(mut self) -> Self {
        self.last_updated_utc = Some(Utc::now().to_rfc3339());
        self
    }

    /// Repairs the `is_sending` / `active_request_id` invariant.
    ///
    /// Returns the repaired snapshot and whether anything changed.
    pub fn sanitized(mut self) -> (Self, bool) {
        let mut repaired = false;

        if self
            .active_request_id
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            self.active_request_id = None;
            repaired = true;
        }

        match (self.is_sending, self.active_request_id.is_some()) {
            (true, false) => {
                self.is_sending = false;
                self.active_request_prompt = None;
                repaired = true;
            }
            (false, true) => {
                self.active_request_id = None;
                self.active_request_prompt = None;
                repaired = true;
            }
            (false, false) if self.active_request_prompt.is_some() => {
                self.active_request_prompt = None;
                repaired = true;
            }
            _ => {}
        }

        (self, repaired)
    }

    /// Marks a request as outstanding.
    pub fn begin_request(&mut self, request_id: impl Into<String>, prompt: Option<String>) {
        self.is_sending = true;
        self.active_request_id = Some(request_id.into());
        self.active_request_prompt = prompt;
        self.status_message = STATUS_SENDING.to_string();
    }

    /// Clears the resumable-operation pointer and sets the status line.
    pub fn end_request(&mut self, status_message: impl Into<String>) {
        self.is_sending = false;
        self.active_request_id = None;
        self.active_request_prompt = None;
        self.status_message = status_message.into();
    }

    /// Whether `request_id` is the request this snapshot is waiting on.
    pub fn is_waiting_on(&self, request_id: &str) -> bool {
        self.is_sending && self.active_request_id.as_deref() == Some(request_id)
    }
}

/// Where a conversation's pane is in the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PanePhase {
    #[default]
    Idle,
    Sending,
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    Completed,
    Failed,
    Cancelled,
}

impl PanePhase {
    /// Sending or waiting for a retry.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Sending | Self::RetryScheduled { .. })
    }
}

impl fmt::Display for PanePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Sending => write!(f, "sending"),
            Self::RetryScheduled { attempt, .. } => write!(f, "retry-scheduled (attempt {attempt})"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status line shown while waiting for an automatic retry.
pub fn retry_countdown_message(attempt: u32, max_attempts: u32, delay_ms: u64) -> String {
    let seconds = delay_ms.div_ceil(1_000);
    format!("Connection problem. Retrying in {seconds}s (attempt {attempt} of {max_attempts})…")
}
