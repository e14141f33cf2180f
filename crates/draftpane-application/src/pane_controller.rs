//! Reply pane lifecycle controller.
//!
//! Connects user intent (send, cancel, reset, typing) to the operation
//! registry and the snapshot store. Per conversation:
//!
//! ```text
//! Idle ──start──▶ Sending ──▶ Completed | Failed | Cancelled
//!                  ▲    │
//!                  └────┘ RetryScheduled
//! ```
//!
//! Registry notifications arrive on an event queue drained by one background
//! task, so settlements for a controller are applied in delivery order. Every
//! settlement is applied only if the stored snapshot is still waiting on the
//! settling request id.

use crate::operation_registry::{
    ObserverId, OperationFailure, OperationObserver, OperationRegistry, ScheduledRetry,
};
use draftpane_core::draft::{DraftRequest, DraftResponse, DraftingService, executor_for};
use draftpane_core::error::{DraftError, FailureKind, Result};
use draftpane_core::pane::identity::ConversationIdentity;
use draftpane_core::pane::model::{
    STATUS_CANCELLED, STATUS_DONE, STATUS_SENDING, retry_countdown_message,
};
use draftpane_core::pane::{ConversationKey, PanePhase, TaskPaneSnapshot};
use draftpane_infrastructure::SnapshotStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use uuid::Uuid;

/// Something the registry reported about a request.
#[derive(Debug, Clone, PartialEq)]
pub enum PaneEvent {
    Succeeded(DraftResponse),
    RetryScheduled(ScheduledRetry),
    Resending { attempt: u32 },
    Failed(DraftError),
    Cancelled,
}

impl PaneEvent {
    fn from_failure(failure: &OperationFailure) -> Self {
        match (failure.kind, failure.retry) {
            (FailureKind::Cancelled, _) => Self::Cancelled,
            (_, Some(retry)) => Self::RetryScheduled(retry),
            _ => Self::Failed(failure.error.clone()),
        }
    }

    /// Ends the request; the controller stops listening afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_) | Self::Cancelled)
    }

    fn phase(&self) -> PanePhase {
        match self {
            Self::Succeeded(_) => PanePhase::Completed,
            Self::RetryScheduled(retry) => PanePhase::RetryScheduled {
                attempt: retry.attempt,
                delay_ms: u64::try_from(retry.delay.as_millis()).unwrap_or(u64::MAX),
            },
            Self::Resending { .. } => PanePhase::Sending,
            Self::Failed(_) => PanePhase::Failed,
            Self::Cancelled => PanePhase::Cancelled,
        }
    }
}

/// Applies `event` for `request_id` to `snapshot`.
///
/// Returns `None` when the snapshot is no longer waiting on `request_id`,
/// i.e. the pane has moved on and the event is stale.
pub fn settle_snapshot(
    snapshot: &TaskPaneSnapshot,
    request_id: &str,
    event: &PaneEvent,
    max_attempts: u32,
) -> Option<TaskPaneSnapshot> {
    if !snapshot.is_waiting_on(request_id) {
        return None;
    }

    let mut next = snapshot.clone();
    match event {
        PaneEvent::Succeeded(response) => {
            next.end_request(STATUS_DONE);
            next.pipeline_response = Some(response.clone());
        }
        PaneEvent::RetryScheduled(retry) => {
            let delay_ms = u64::try_from(retry.delay.as_millis()).unwrap_or(u64::MAX);
            next.status_message = retry_countdown_message(retry.attempt, max_attempts, delay_ms);
        }
        PaneEvent::Resending { .. } => {
            next.status_message = STATUS_SENDING.to_string();
        }
        PaneEvent::Failed(error) => next.end_request(error.status_text()),
        PaneEvent::Cancelled => next.end_request(STATUS_CANCELLED),
    }
    Some(next.touch())
}

/// Whether a provisional conversation's snapshot should replace the stable
/// key's when the two are merged.
fn carries_over(provisional: &TaskPaneSnapshot, stable: &TaskPaneSnapshot) -> bool {
    if provisional.is_empty() {
        return false;
    }
    stable.is_empty() || (provisional.is_sending && !stable.is_sending)
}

type QueuedEvent = (String, PaneEvent);

/// Registry observer for one request. Forwards to the controller's queue.
struct PaneObserver {
    request_id: String,
    events: mpsc::UnboundedSender<QueuedEvent>,
}

impl PaneObserver {
    fn forward(&self, event: PaneEvent) {
        if self.events.send((self.request_id.clone(), event)).is_err() {
            tracing::debug!(
                "[PaneController] Dropping event for {} after shutdown",
                self.request_id
            );
        }
    }
}

impl OperationObserver for PaneObserver {
    fn on_success(&self, response: &DraftResponse) {
        self.forward(PaneEvent::Succeeded(response.clone()));
    }

    fn on_failure(&self, failure: &OperationFailure) {
        self.forward(PaneEvent::from_failure(failure));
    }

    fn on_retry_started(&self, attempt: u32) {
        self.forward(PaneEvent::Resending { attempt });
    }
}

struct Subscription {
    item_key: String,
    observer_id: ObserverId,
}

#[derive(Default)]
struct ControllerState {
    current: Option<ConversationKey>,
    /// Registry subscriptions this controller owns, by request id.
    subscriptions: HashMap<String, Subscription>,
    phases: HashMap<String, PanePhase>,
}

struct ControllerInner {
    registry: OperationRegistry,
    store: SnapshotStore,
    service: Arc<dyn DraftingService>,
    max_attempts: u32,
    snapshot_tx: watch::Sender<TaskPaneSnapshot>,
    events: mpsc::UnboundedSender<QueuedEvent>,
    /// Held while a queued event is applied, and while a conversation moves
    /// to another key.
    settle_gate: AsyncMutex<()>,
    state: Mutex<ControllerState>,
}

impl ControllerInner {
    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, item_key: &str, phase: PanePhase) {
        self.state().phases.insert(item_key.to_string(), phase);
    }

    fn is_current(&self, item_key: &str) -> bool {
        self.state()
            .current
            .as_ref()
            .is_some_and(|key| key.item_key() == item_key)
    }

    fn publish_if_current(&self, item_key: &str, snapshot: TaskPaneSnapshot) {
        if self.is_current(item_key) {
            self.snapshot_tx.send_replace(snapshot);
        }
    }

    /// Drops the subscription for `request_id` and detaches from the registry.
    fn release(&self, request_id: &str) {
        let subscription = self.state().subscriptions.remove(request_id);
        if let Some(subscription) = subscription {
            self.registry.detach(request_id, subscription.observer_id);
        }
    }

    /// Releases every subscription for `item_key`. Returns their request ids.
    fn release_item(&self, item_key: &str) -> Vec<String> {
        let released: Vec<(String, ObserverId)> = {
            let mut state = self.state();
            let ids: Vec<String> = state
                .subscriptions
                .iter()
                .filter(|(_, sub)| sub.item_key == item_key)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    state
                        .subscriptions
                        .remove(&id)
                        .map(|sub| (id, sub.observer_id))
                })
                .collect()
        };

        released
            .into_iter()
            .map(|(request_id, observer_id)| {
                self.registry.detach(&request_id, observer_id);
                request_id
            })
            .collect()
    }

    fn release_all(&self) {
        let released: Vec<(String, Subscription)> = self.state().subscriptions.drain().collect();
        for (request_id, subscription) in released {
            self.registry.detach(&request_id, subscription.observer_id);
        }
    }

    /// Handles a queued registry event.
    async fn on_event(&self, request_id: &str, event: PaneEvent) {
        let item_key = {
            let state = self.state();
            match state.subscriptions.get(request_id) {
                Some(subscription) => subscription.item_key.clone(),
                None => {
                    tracing::debug!(
                        "[PaneController] Ignoring event for released request {}",
                        request_id
                    );
                    return;
                }
            }
        };

        if let Err(e) = self.apply_event(&item_key, request_id, event).await {
            tracing::warn!(
                "[PaneController] Failed to persist outcome of {} for {}: {}",
                request_id,
                item_key,
                e
            );
        }
    }

    /// Applies `event` to the stored snapshot of `item_key` under the
    /// stale-settle guard. Returns whether the snapshot changed.
    async fn apply_event(&self, item_key: &str, request_id: &str, event: PaneEvent) -> Result<bool> {
        let mut applied = false;
        let result = self
            .store
            .apply_for(item_key, |snapshot| {
                match settle_snapshot(&snapshot, request_id, &event, self.max_attempts) {
                    Some(next) => {
                        applied = true;
                        next
                    }
                    None => snapshot,
                }
            })
            .await;

        if event.is_terminal() {
            self.release(request_id);
        }

        let updated = result?;
        if applied {
            tracing::info!(
                "[PaneController] {} for {}: {}",
                request_id,
                item_key,
                event.phase()
            );
            self.set_phase(item_key, event.phase());
            self.publish_if_current(item_key, updated);
        } else {
            tracing::debug!(
                "[PaneController] Stale event for {} on {}, snapshot has moved on",
                request_id,
                item_key
            );
        }
        Ok(applied)
    }
}

async fn drain_events(inner: Weak<ControllerInner>, mut events: mpsc::UnboundedReceiver<QueuedEvent>) {
    while let Some((request_id, event)) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let _gate = inner.settle_gate.lock().await;
        inner.on_event(&request_id, event).await;
    }
}

/// Drives one reply pane.
///
/// Operations act on the conversation selected with
/// [`switch_to`](Self::switch_to). Requests keep running in the registry when
/// the pane moves elsewhere; their outcome is written to the conversation
/// they were started for.
pub struct PaneController {
    inner: Arc<ControllerInner>,
}

impl PaneController {
    /// Must be called from within a tokio runtime.
    pub fn new(
        registry: OperationRegistry,
        store: SnapshotStore,
        service: Arc<dyn DraftingService>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(TaskPaneSnapshot::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let max_attempts = registry.policy().max_attempts;

        let inner = Arc::new(ControllerInner {
            registry,
            store,
            service,
            max_attempts,
            snapshot_tx,
            events: events_tx,
            settle_gate: AsyncMutex::new(()),
            state: Mutex::new(ControllerState::default()),
        });
        tokio::spawn(drain_events(Arc::downgrade(&inner), events_rx));

        Self { inner }
    }

    /// Observes the snapshot of the displayed conversation.
    pub fn subscribe(&self) -> watch::Receiver<TaskPaneSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Snapshot of the displayed conversation.
    pub fn snapshot(&self) -> TaskPaneSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn current_key(&self) -> Option<ConversationKey> {
        self.inner.state().current.clone()
    }

    pub fn phase(&self, item_key: &str) -> PanePhase {
        self.inner
            .state()
            .phases
            .get(item_key)
            .copied()
            .unwrap_or_default()
    }

    fn require_current(&self) -> Result<String> {
        self.inner
            .state()
            .current
            .as_ref()
            .map(ConversationKey::item_key)
            .ok_or(DraftError::NoActiveConversation)
    }

    // ============================================================================
    // Navigation
    // ============================================================================

    /// Displays `key`, flushing pending writes of the conversation being left.
    pub async fn switch_to(&self, key: Option<ConversationKey>) {
        let previous = {
            let mut state = self.inner.state();
            if state.current == key {
                return;
            }
            std::mem::replace(&mut state.current, key.clone())
        };

        if let Some(previous) = previous {
            let previous_key = previous.item_key();
            if let Err(e) = self.inner.store.flush(&previous_key).await {
                tracing::warn!("[PaneController] Flush of {} failed: {}", previous_key, e);
            }
        }

        match key {
            Some(key) => {
                let item_key = key.item_key();
                let snapshot = self.inner.store.read(&item_key).await;
                tracing::debug!(
                    "[PaneController] Showing {} (sending: {})",
                    item_key,
                    snapshot.is_sending
                );
                self.inner.publish_if_current(&item_key, snapshot);
            }
            None => {
                if self.inner.state().current.is_none() {
                    self.inner.snapshot_tx.send_replace(TaskPaneSnapshot::default());
                }
            }
        }
    }

    /// Moves the displayed provisional conversation onto its stable key.
    ///
    /// The provisional snapshot replaces the stable one when the stable key
    /// is empty, or when only the provisional conversation has a request in
    /// flight. In-flight requests that are carried over keep running; any
    /// left behind are cancelled.
    pub async fn adopt_stable_key(&self, stable: ConversationKey) -> Result<()> {
        let provisional = match self.current_key() {
            Some(key @ ConversationKey::Provisional(_)) => key,
            _ => {
                self.switch_to(Some(stable)).await;
                return Ok(());
            }
        };
        let provisional_key = provisional.item_key();
        let stable_key = stable.item_key();

        // Queued settlements wait here, then resolve against the stable key.
        let _gate = self.inner.settle_gate.lock().await;
        let moved = self.remap(&provisional_key, &stable_key, Some(stable));

        let carried = self.inner.store.read(&provisional_key).await;
        let mut took_over = false;
        let adopted = self
            .inner
            .store
            .apply_for(&stable_key, |existing| {
                if carries_over(&carried, &existing) {
                    took_over = true;
                    carried.clone()
                } else {
                    existing
                }
            })
            .await;
        let adopted = match adopted {
            Ok(adopted) => adopted,
            Err(e) => {
                self.remap(&stable_key, &provisional_key, Some(provisional));
                return Err(e);
            }
        };
        self.inner
            .store
            .write(&provisional_key, TaskPaneSnapshot::default())
            .await?;

        {
            let mut state = self.inner.state();
            let phase = state.phases.remove(&provisional_key);
            if let Some(phase) = phase.filter(|_| took_over) {
                state.phases.insert(stable_key.clone(), phase);
            }
        }

        for request_id in moved {
            if adopted.is_waiting_on(&request_id) {
                continue;
            }
            tracing::info!(
                "[PaneController] Cancelling {}, {} already has state",
                request_id,
                stable_key
            );
            self.inner.registry.cancel(&request_id);
            self.inner.release(&request_id);
        }

        tracing::info!(
            "[PaneController] Adopted stable key {} for {}",
            stable_key,
            provisional_key
        );
        self.inner.publish_if_current(&stable_key, adopted);
        Ok(())
    }

    /// Points the subscriptions of `from` at `to` and displays `current`.
    /// Returns the moved request ids.
    fn remap(&self, from: &str, to: &str, current: Option<ConversationKey>) -> Vec<String> {
        let mut state = self.inner.state();
        state.current = current;
        state
            .subscriptions
            .iter_mut()
            .filter(|(_, subscription)| subscription.item_key == from)
            .map(|(request_id, subscription)| {
                subscription.item_key = to.to_string();
                request_id.clone()
            })
            .collect()
    }

    /// Follows the host's active conversation until the provider goes away.
    pub async fn follow_identity(&self, identity: &dyn ConversationIdentity) {
        let mut changes = identity.subscribe();
        // The current value is handled here, not as a change.
        let _ = changes.borrow_and_update();
        self.switch_to(identity.current()).await;

        while changes.changed().await.is_ok() {
            let key = changes.borrow_and_update().clone();
            self.switch_to(key).await;
        }
        tracing::debug!("[PaneController] Identity provider closed");
    }

    // ============================================================================
    // Requests
    // ============================================================================

    /// Starts drafting a reply to `message_body` for the displayed
    /// conversation, using the typed instruction if there is one.
    ///
    /// Returns the new request id, or `None` if a request is already in
    /// flight for this conversation.
    pub async fn start(&self, message_body: &str) -> Result<Option<String>> {
        let item_key = self.require_current()?;
        let previous_phase = {
            let mut state = self.inner.state();
            let phase = state.phases.entry(item_key.clone()).or_default();
            if phase.is_in_flight() {
                tracing::debug!("[PaneController] {} is already sending", item_key);
                return Ok(None);
            }
            std::mem::replace(phase, PanePhase::Sending)
        };

        let request_id = Uuid::new_v4().to_string();
        let mut already_sending = false;
        let mut prompt = None;
        let written = self
            .inner
            .store
            .apply_for(&item_key, |snapshot| {
                if snapshot.is_sending {
                    already_sending = true;
                    return snapshot;
                }
                prompt = Some(snapshot.optional_prompt.clone()).filter(|p| !p.trim().is_empty());
                let mut next = snapshot;
                next.begin_request(request_id.clone(), prompt.clone());
                next.touch()
            })
            .await;

        let snapshot = match written {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.inner.set_phase(&item_key, PanePhase::Failed);
                return Err(e);
            }
        };
        self.inner.publish_if_current(&item_key, snapshot);

        if already_sending {
            self.inner.set_phase(&item_key, previous_phase);
            tracing::debug!(
                "[PaneController] {} has a persisted request, resume it instead",
                item_key
            );
            return Ok(None);
        }

        tracing::info!("[PaneController] Drafting {} for {}", request_id, item_key);
        self.attach(&item_key, &request_id, DraftRequest::new(message_body, prompt));
        Ok(Some(request_id))
    }

    /// Re-attaches to the request the displayed conversation was waiting on
    /// when the pane was last torn down.
    ///
    /// Never issues a second call for a request that is still running, and
    /// delivers an outcome that arrived in the meantime right away. Returns
    /// whether there was a request to resume.
    pub async fn resume(&self, message_body: &str) -> Result<bool> {
        let item_key = self.require_current()?;
        let snapshot = self.inner.store.read(&item_key).await;
        self.inner.publish_if_current(&item_key, snapshot.clone());

        let Some(request_id) = snapshot
            .active_request_id
            .clone()
            .filter(|_| snapshot.is_sending)
        else {
            return Ok(false);
        };

        if self.inner.state().subscriptions.contains_key(&request_id) {
            return Ok(true);
        }

        tracing::info!("[PaneController] Resuming {} for {}", request_id, item_key);
        self.inner.set_phase(&item_key, PanePhase::Sending);
        self.attach(
            &item_key,
            &request_id,
            DraftRequest::new(message_body, snapshot.active_request_prompt.clone()),
        );
        Ok(true)
    }

    fn attach(&self, item_key: &str, request_id: &str, request: DraftRequest) {
        let observer = Arc::new(PaneObserver {
            request_id: request_id.to_string(),
            events: self.inner.events.clone(),
        });
        let executor = executor_for(Arc::clone(&self.inner.service), request);

        // Held across attach so a replayed outcome cannot be handled before
        // the subscription exists.
        let mut state = self.inner.state();
        let observer_id = self.inner.registry.attach(request_id, executor, observer);
        state.subscriptions.insert(
            request_id.to_string(),
            Subscription {
                item_key: item_key.to_string(),
                observer_id,
            },
        );
    }

    /// Cancels the displayed conversation's request.
    ///
    /// The pane settles as cancelled whether or not the transport stops.
    pub async fn cancel(&self) -> Result<()> {
        let item_key = self.require_current()?;
        let snapshot = self.inner.store.read(&item_key).await;
        let Some(request_id) = snapshot
            .active_request_id
            .clone()
            .filter(|_| snapshot.is_sending)
        else {
            return Ok(());
        };

        tracing::info!("[PaneController] Cancelling {} for {}", request_id, item_key);
        self.inner.registry.cancel(&request_id);
        self.inner
            .apply_event(&item_key, &request_id, PaneEvent::Cancelled)
            .await?;
        Ok(())
    }

    /// Cancels anything running for the displayed conversation and restores
    /// the empty snapshot.
    pub async fn reset(&self) -> Result<()> {
        let item_key = self.require_current()?;
        let snapshot = self.inner.store.read(&item_key).await;

        if let Some(request_id) = snapshot.active_request_id.as_deref() {
            self.inner.registry.cancel(request_id);
        }
        let owned: Vec<String> = {
            let state = self.inner.state();
            state
                .subscriptions
                .iter()
                .filter(|(_, sub)| sub.item_key == item_key)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for request_id in &owned {
            self.inner.registry.cancel(request_id);
        }
        self.inner.release_item(&item_key);

        self.inner.set_phase(&item_key, PanePhase::Idle);
        self.inner
            .store
            .write(&item_key, TaskPaneSnapshot::default())
            .await?;
        self.inner
            .publish_if_current(&item_key, TaskPaneSnapshot::default());
        tracing::info!("[PaneController] Reset {}", item_key);
        Ok(())
    }

    // ============================================================================
    // Editing
    // ============================================================================

    /// Updates the instruction text. Persisted after the debounce window.
    pub async fn set_prompt(&self, text: &str) -> Result<()> {
        let item_key = self.require_current()?;
        let snapshot = self
            .inner
            .store
            .schedule_update(&item_key, |mut snapshot| {
                snapshot.optional_prompt = text.to_string();
                snapshot.touch()
            })
            .await;
        self.inner.publish_if_current(&item_key, snapshot);
        Ok(())
    }

    pub async fn set_prompt_visible(&self, visible: bool) -> Result<()> {
        let item_key = self.require_current()?;
        let snapshot = self
            .inner
            .store
            .apply_for(&item_key, |mut snapshot| {
                snapshot.is_optional_prompt_visible = visible;
                snapshot.touch()
            })
            .await?;
        self.inner.publish_if_current(&item_key, snapshot);
        Ok(())
    }

    /// Unmount: detaches from every request (they keep running) and flushes
    /// pending writes.
    pub async fn teardown(&self) -> Result<()> {
        self.inner.release_all();
        self.inner.store.flush_all().await
    }
}

impl Drop for PaneController {
    fn drop(&mut self) {
        self.inner.release_all();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.inner.store.clone();
            handle.spawn(async move {
                if let Err(e) = store.flush_all().await {
                    tracing::warn!("[PaneController] Flush on drop failed: {}", e);
                }
            });
        }
    }
}
