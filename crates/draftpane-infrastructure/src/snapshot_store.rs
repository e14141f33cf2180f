//! Per-item snapshot synchronizer.
//!
//! Maps a conversation item key to its durable [`TaskPaneSnapshot`].
//!
//! - Writes can be debounced per key; a newer schedule replaces the pending one.
//! - Every not-yet-persisted snapshot sits in a per-key pending slot until a
//!   writer claims it. Whoever claims the slot writes it, so the latest
//!   snapshot always wins and nothing is written twice.
//! - Storage I/O for one key is serialized by a per-key async lock. Unrelated
//!   keys never wait on each other.
//! - Provisional (session-scoped) item keys are kept in memory only.

use crate::dto::{decode_snapshot, encode_snapshot};
use crate::kv_store::MemoryKeyValueStore;
use draftpane_core::error::Result;
use draftpane_core::pane::TaskPaneSnapshot;
use draftpane_core::pane::identity::is_provisional_item_key;
use draftpane_core::storage::KeyValueStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Storage key prefix for pane snapshots.
pub const SNAPSHOT_KEY_PREFIX: &str = "draftpane.pane.";

/// Quiet window for debounced writes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Storage key for an item key.
pub fn storage_key(item_key: &str) -> String {
    format!("{SNAPSHOT_KEY_PREFIX}{item_key}")
}

/// A snapshot that has been handed to the store but not yet persisted.
struct PendingWrite {
    seq: u64,
    snapshot: TaskPaneSnapshot,
    /// Debounce timer, if this write was scheduled rather than immediate.
    timer: Option<JoinHandle<()>>,
}

impl PendingWrite {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct SyncState {
    next_seq: u64,
    pending: HashMap<String, PendingWrite>,
    locks: HashMap<String, Arc<AsyncMutex<()>>>,
}

impl SyncState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Installs a new pending write, cancelling whatever it replaces.
    fn replace_pending(&mut self, item_key: &str, write: PendingWrite) {
        if let Some(mut old) = self.pending.insert(item_key.to_string(), write) {
            old.cancel_timer();
        }
    }

    /// Claims the pending write for `item_key` if it still carries `seq`.
    fn claim(&mut self, item_key: &str, seq: u64) -> Option<TaskPaneSnapshot> {
        match self.pending.get(item_key) {
            Some(pending) if pending.seq == seq => self
                .pending
                .remove(item_key)
                .map(|pending| pending.snapshot),
            _ => None,
        }
    }

    /// Claims whatever is pending for `item_key`, cancelling its timer.
    fn take_any(&mut self, item_key: &str) -> Option<(u64, TaskPaneSnapshot)> {
        self.pending.remove(item_key).map(|mut pending| {
            pending.cancel_timer();
            (pending.seq, pending.snapshot)
        })
    }

    /// Puts back a claimed snapshot whose write failed, without a timer.
    ///
    /// Anything scheduled since the claim is newer and stays.
    fn restore(&mut self, item_key: &str, seq: u64, snapshot: TaskPaneSnapshot) {
        self.pending
            .entry(item_key.to_string())
            .or_insert(PendingWrite {
                seq,
                snapshot,
                timer: None,
            });
    }

    /// Drops the lock for `item_key` once nobody holds or awaits it and no
    /// write is pending.
    fn prune_lock(&mut self, item_key: &str) {
        let idle = self
            .locks
            .get(item_key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle && !self.pending.contains_key(item_key) {
            self.locks.remove(item_key);
        }
    }
}

/// Held while doing storage I/O for one key.
struct KeyGuard<'a> {
    store: &'a SnapshotStore,
    item_key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.store.state().prune_lock(&self.item_key);
    }
}

struct StoreInner {
    durable: Arc<dyn KeyValueStore>,
    session: MemoryKeyValueStore,
    debounce: Duration,
    state: Mutex<SyncState>,
}

/// Per-item snapshot synchronizer.
///
/// Cheap to clone; clones share pending writes and locks.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<StoreInner>,
}

impl SnapshotStore {
    pub fn new(durable: Arc<dyn KeyValueStore>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                durable,
                session: MemoryKeyValueStore::new(),
                debounce,
                state: Mutex::new(SyncState::default()),
            }),
        }
    }

    pub fn with_default_debounce(durable: Arc<dyn KeyValueStore>) -> Self {
        Self::new(durable, DEFAULT_DEBOUNCE)
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn surface(&self, item_key: &str) -> &dyn KeyValueStore {
        if is_provisional_item_key(item_key) {
            &self.inner.session
        } else {
            self.inner.durable.as_ref()
        }
    }

    /// Serializes storage I/O for `item_key`.
    async fn lock_key(&self, item_key: &str) -> KeyGuard<'_> {
        let lock = {
            let mut state = self.state();
            Arc::clone(
                state
                    .locks
                    .entry(item_key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let mut key_guard = KeyGuard {
            store: self,
            item_key: item_key.to_string(),
            guard: None,
        };
        key_guard.guard = Some(lock.lock_owned().await);
        key_guard
    }

    /// Whether snapshots for stable keys survive a restart.
    pub fn is_durable(&self) -> bool {
        self.inner.durable.is_durable()
    }

    // ============================================================================
    // Reads
    // ============================================================================

    /// Loads the snapshot for `item_key`.
    ///
    /// A snapshot still waiting to be persisted is returned as-is. Missing,
    /// corrupt, or version-mismatched stored data yields the empty snapshot;
    /// invalid entries are deleted best-effort. Never fails.
    pub async fn read(&self, item_key: &str) -> TaskPaneSnapshot {
        if let Some(pending) = self.pending_snapshot(item_key) {
            return pending;
        }
        let _guard = self.lock_key(item_key).await;
        if let Some(pending) = self.pending_snapshot(item_key) {
            return pending;
        }
        self.read_stored(item_key).await
    }

    /// The not-yet-persisted snapshot for `item_key`, if any.
    pub fn pending_snapshot(&self, item_key: &str) -> Option<TaskPaneSnapshot> {
        self.state()
            .pending
            .get(item_key)
            .map(|pending| pending.snapshot.clone())
    }

    pub fn has_pending(&self, item_key: &str) -> bool {
        self.state().pending.contains_key(item_key)
    }

    async fn read_stored(&self, item_key: &str) -> TaskPaneSnapshot {
        let surface = self.surface(item_key);
        let key = storage_key(item_key);

        let raw = match surface.get_item(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return TaskPaneSnapshot::default(),
            Err(e) => {
                tracing::warn!("[SnapshotStore] Failed to read {}: {}", key, e);
                return TaskPaneSnapshot::default();
            }
        };

        match decode_snapshot(&raw) {
            Ok(snapshot) => {
                let (snapshot, repaired) = snapshot.sanitized();
                if repaired {
                    tracing::debug!("[SnapshotStore] Repaired inconsistent snapshot {}", key);
                }
                snapshot
            }
            Err(e) => {
                tracing::warn!("[SnapshotStore] Discarding stored snapshot {}: {}", key, e);
                if let Err(e) = surface.remove_item(&key).await {
                    tracing::warn!("[SnapshotStore] Failed to delete {}: {}", key, e);
                }
                TaskPaneSnapshot::default()
            }
        }
    }

    // ============================================================================
    // Writes
    // ============================================================================

    /// Persists `snapshot` now. The empty snapshot deletes the entry instead.
    ///
    /// Supersedes any pending debounced write for the same key.
    pub async fn write(&self, item_key: &str, snapshot: TaskPaneSnapshot) -> Result<()> {
        let seq = {
            let mut state = self.state();
            let seq = state.next_seq();
            state.replace_pending(
                item_key,
                PendingWrite {
                    seq,
                    snapshot,
                    timer: None,
                },
            );
            seq
        };

        let _guard = self.lock_key(item_key).await;
        let claimed = self.state().claim(item_key, seq);
        match claimed {
            Some(snapshot) => self.persist_or_restore(item_key, seq, snapshot).await,
            // A newer write replaced ours, or a background update folded it in.
            None => Ok(()),
        }
    }

    /// Debounces a write: only the latest snapshot scheduled within the quiet
    /// window is persisted.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule_write(&self, item_key: &str, snapshot: TaskPaneSnapshot) {
        let mut state = self.state();
        let seq = state.next_seq();

        let store = self.clone();
        let key = item_key.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(store.inner.debounce).await;
            store.fire_scheduled(&key, seq).await;
        });

        state.replace_pending(
            item_key,
            PendingWrite {
                seq,
                snapshot,
                timer: Some(timer),
            },
        );
    }

    async fn fire_scheduled(&self, item_key: &str, seq: u64) {
        let _guard = self.lock_key(item_key).await;
        let claimed = self.state().claim(item_key, seq);
        if let Some(snapshot) = claimed {
            if let Err(e) = self.persist_or_restore(item_key, seq, snapshot).await {
                tracing::warn!(
                    "[SnapshotStore] Debounced write for {} failed: {}",
                    item_key,
                    e
                );
            }
        }
    }

    /// Debounced read-modify-write: `updater` sees the latest snapshot
    /// (pending or stored) and its result is scheduled like
    /// [`schedule_write`](Self::schedule_write).
    pub async fn schedule_update<F>(&self, item_key: &str, updater: F) -> TaskPaneSnapshot
    where
        F: FnOnce(TaskPaneSnapshot) -> TaskPaneSnapshot,
    {
        let _guard = self.lock_key(item_key).await;

        let current = match self.pending_snapshot(item_key) {
            Some(snapshot) => snapshot,
            None => self.read_stored(item_key).await,
        };
        let updated = updater(current);
        self.schedule_write(item_key, updated.clone());
        updated
    }

    /// Persists any pending write for `item_key` immediately.
    ///
    /// Also waits for an in-flight write on the key, so on return the store
    /// reflects the latest snapshot handed to it.
    pub async fn flush(&self, item_key: &str) -> Result<()> {
        let _guard = self.lock_key(item_key).await;
        let taken = self.state().take_any(item_key);
        match taken {
            Some((seq, snapshot)) => {
                tracing::debug!("[SnapshotStore] Flushing pending write for {}", item_key);
                self.persist_or_restore(item_key, seq, snapshot).await
            }
            None => Ok(()),
        }
    }

    /// Flushes every key with a pending write. Returns the first error after
    /// attempting all keys.
    pub async fn flush_all(&self) -> Result<()> {
        let keys: Vec<String> = self.state().pending.keys().cloned().collect();
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.flush(&key).await {
                tracing::warn!("[SnapshotStore] Flush of {} failed: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Background update: loads the current snapshot (pending or stored),
    /// applies `updater`, and writes the result back immediately.
    ///
    /// Used when a conversation other than the displayed one changes, e.g. a
    /// draft finishing while the user reads another message.
    pub async fn apply_for<F>(&self, item_key: &str, updater: F) -> Result<TaskPaneSnapshot>
    where
        F: FnOnce(TaskPaneSnapshot) -> TaskPaneSnapshot,
    {
        let _guard = self.lock_key(item_key).await;

        let pending = self.state().take_any(item_key);
        let current = match &pending {
            Some((_, snapshot)) => snapshot.clone(),
            None => self.read_stored(item_key).await,
        };

        let updated = updater(current);
        if let Err(e) = self.persist_locked(item_key, &updated).await {
            // The update is lost, but what was pending before it is kept.
            if let Some((seq, snapshot)) = pending {
                self.state().restore(item_key, seq, snapshot);
            }
            return Err(e);
        }
        Ok(updated)
    }

    /// Persists a claimed snapshot, putting it back as pending on failure so
    /// a later flush retries it. Caller holds the key lock.
    async fn persist_or_restore(
        &self,
        item_key: &str,
        seq: u64,
        snapshot: TaskPaneSnapshot,
    ) -> Result<()> {
        match self.persist_locked(item_key, &snapshot).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state().restore(item_key, seq, snapshot);
                Err(e)
            }
        }
    }

    /// Writes to the surface. Caller holds the key lock.
    async fn persist_locked(&self, item_key: &str, snapshot: &TaskPaneSnapshot) -> Result<()> {
        let surface = self.surface(item_key);
        let key = storage_key(item_key);

        if snapshot.is_empty() {
            tracing::debug!("[SnapshotStore] Removing empty snapshot {}", key);
            return surface.remove_item(&key).await;
        }

        let encoded = encode_snapshot(snapshot)?;
        surface.set_item(&key, &encoded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use draftpane_core::draft::DraftResponse;
    use draftpane_core::pane::ConversationKey;
    use draftpane_core::error::DraftError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Memory store that counts mutating calls.
    #[derive(Default, Clone)]
    struct CountingStore {
        inner: MemoryKeyValueStore,
        sets: Arc<AtomicUsize>,
        removes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get_item(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_item(key).await
        }

        async fn set_item(&self, key: &str, value: &str) -> Result<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set_item(key, value).await
        }

        async fn remove_item(&self, key: &str) -> Result<()> {
            self.removes.fetch_add(1, Ordering::SeqCst);
            self.inner.remove_item(key).await
        }
    }

    /// Memory store whose writes fail while `offline` is set.
    #[derive(Default, Clone)]
    struct FlakyStore {
        inner: MemoryKeyValueStore,
        offline: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(DraftError::Storage("disk unavailable".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get_item(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_item(key).await
        }

        async fn set_item(&self, key: &str, value: &str) -> Result<()> {
            self.check()?;
            self.inner.set_item(key, value).await
        }

        async fn remove_item(&self, key: &str) -> Result<()> {
            self.check()?;
            self.inner.remove_item(key).await
        }
    }

    fn flaky_store() -> (SnapshotStore, FlakyStore) {
        let backing = FlakyStore::default();
        let store = SnapshotStore::with_default_debounce(Arc::new(backing.clone()));
        (store, backing)
    }

    fn store_with_backing() -> (SnapshotStore, CountingStore) {
        let backing = CountingStore::default();
        let store = SnapshotStore::with_default_debounce(Arc::new(backing.clone()));
        (store, backing)
    }

    fn with_prompt(prompt: &str) -> TaskPaneSnapshot {
        TaskPaneSnapshot {
            optional_prompt: prompt.to_string(),
            is_optional_prompt_visible: true,
            ..Default::default()
        }
    }

    fn completed(reply: &str) -> TaskPaneSnapshot {
        TaskPaneSnapshot {
            status_message: "done".into(),
            pipeline_response: Some(DraftResponse::new(reply)),
            ..Default::default()
        }
        .touch()
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (store, _) = store_with_backing();
        let snapshot = completed("Sounds good.");

        store.write("m1", snapshot.clone()).await.unwrap();
        assert_eq!(store.read("m1").await, snapshot);
    }

    #[tokio::test]
    async fn test_pending_request_survives_roundtrip() {
        let (store, _) = store_with_backing();
        let mut snapshot = with_prompt("decline");
        snapshot.begin_request("req-42", Some("decline".into()));

        store.write("m1", snapshot.clone()).await.unwrap();
        let loaded = store.read("m1").await;
        assert_eq!(loaded, snapshot);
        assert!(loaded.is_waiting_on("req-42"));
    }

    #[tokio::test]
    async fn test_empty_snapshot_leaves_no_entry() {
        let (store, backing) = store_with_backing();

        store.write("m1", completed("hi")).await.unwrap();
        assert_eq!(backing.inner.len(), 1);

        store.write("m1", TaskPaneSnapshot::default()).await.unwrap();
        assert!(backing.inner.is_empty());
        assert_eq!(store.read("m1").await, TaskPaneSnapshot::default());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_discarded() {
        let (store, backing) = store_with_backing();
        backing
            .inner
            .set_item(&storage_key("m1"), "{ definitely not json")
            .await
            .unwrap();

        assert_eq!(store.read("m1").await, TaskPaneSnapshot::default());
        assert_eq!(backing.inner.get_item(&storage_key("m1")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_discarded() {
        let (store, backing) = store_with_backing();
        let raw = encode_snapshot(&completed("old"))
            .unwrap()
            .replacen(r#""version":1"#, r#""version":0"#, 1);
        backing.inner.set_item(&storage_key("m1"), &raw).await.unwrap();

        assert_eq!(store.read("m1").await, TaskPaneSnapshot::default());
        assert!(backing.inner.is_empty());
    }

    #[tokio::test]
    async fn test_inconsistent_entry_is_repaired_on_read() {
        let (store, backing) = store_with_backing();
        let broken = TaskPaneSnapshot {
            is_sending: true,
            active_request_id: None,
            status_message: "Drafting reply…".into(),
            ..Default::default()
        };
        backing
            .inner
            .set_item(&storage_key("m1"), &encode_snapshot(&broken).unwrap())
            .await
            .unwrap();

        let loaded = store.read("m1").await;
        assert!(!loaded.is_sending);
        assert!(loaded.active_request_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_to_one_write() {
        let (store, backing) = store_with_backing();

        store.schedule_write("m1", with_prompt("d"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.schedule_write("m1", with_prompt("de"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.schedule_write("m1", with_prompt("dec"));

        assert_eq!(backing.sets.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(backing.sets.load(Ordering::SeqCst), 1);
        assert!(!store.has_pending("m1"));
        let stored = backing.inner.get_item(&storage_key("m1")).await.unwrap().unwrap();
        assert_eq!(decode_snapshot(&stored).unwrap(), with_prompt("dec"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_restarts_on_each_schedule() {
        let (store, backing) = store_with_backing();

        store.schedule_write("m1", with_prompt("a"));
        tokio::time::sleep(Duration::from_millis(250)).await;
        store.schedule_write("m1", with_prompt("ab"));
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(backing.sets.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backing.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_sees_pending_snapshot() {
        let (store, backing) = store_with_backing();
        store.schedule_write("m1", with_prompt("typing"));

        assert_eq!(store.read("m1").await, with_prompt("typing"));
        assert!(backing.inner.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_persists_pending_immediately() {
        let (store, backing) = store_with_backing();
        store.schedule_write("m1", with_prompt("urgent"));

        store.flush("m1").await.unwrap();
        assert_eq!(backing.sets.load(Ordering::SeqCst), 1);
        assert!(!store.has_pending("m1"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backing.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_covers_every_key() {
        let (store, backing) = store_with_backing();
        store.schedule_write("m1", with_prompt("one"));
        store.schedule_write("m2", with_prompt("two"));

        store.flush_all().await.unwrap();
        assert_eq!(backing.inner.len(), 2);
        assert_eq!(store.read("m2").await, with_prompt("two"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_write_supersedes_pending() {
        let (store, backing) = store_with_backing();
        store.schedule_write("m1", with_prompt("stale"));
        store.write("m1", completed("fresh")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backing.sets.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.read("m1").await.pipeline_response,
            Some(DraftResponse::new("fresh"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_for_folds_in_pending() {
        let (store, _) = store_with_backing();
        let mut sending = with_prompt("shorter");
        sending.begin_request("req-1", Some("shorter".into()));
        store.schedule_write("m1", sending);

        let updated = store
            .apply_for("m1", |mut snapshot| {
                snapshot.end_request("done");
                snapshot.pipeline_response = Some(DraftResponse::new("ok"));
                snapshot
            })
            .await
            .unwrap();

        assert_eq!(updated.optional_prompt, "shorter");
        assert!(!updated.is_sending);
        assert!(!store.has_pending("m1"));
        assert_eq!(store.read("m1").await, updated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_update_builds_on_pending() {
        let (store, backing) = store_with_backing();
        store.write("m1", completed("draft")).await.unwrap();

        store
            .schedule_update("m1", |mut snapshot| {
                snapshot.optional_prompt = "warmer".into();
                snapshot
            })
            .await;
        let updated = store
            .schedule_update("m1", |mut snapshot| {
                snapshot.is_optional_prompt_visible = true;
                snapshot
            })
            .await;

        assert_eq!(updated.optional_prompt, "warmer");
        assert_eq!(backing.sets.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(backing.sets.load(Ordering::SeqCst), 2);
        assert_eq!(store.read("m1").await, updated);
    }

    #[tokio::test]
    async fn test_apply_for_starts_from_default() {
        let (store, _) = store_with_backing();
        let updated = store
            .apply_for("never-seen", |mut snapshot| {
                snapshot.status_message = "hello".into();
                snapshot
            })
            .await
            .unwrap();
        assert_eq!(updated.status_message, "hello");
        assert_eq!(store.read("never-seen").await.status_message, "hello");
    }

    #[tokio::test]
    async fn test_provisional_keys_stay_in_memory() {
        let (store, backing) = store_with_backing();
        let key = ConversationKey::provisional().item_key();

        store.write(&key, completed("temp")).await.unwrap();
        assert!(backing.inner.is_empty());
        assert_eq!(
            store.read(&key).await.pipeline_response,
            Some(DraftResponse::new("temp"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_pending_snapshot() {
        let (store, backing) = flaky_store();
        store.schedule_write("m1", with_prompt("typed"));

        backing.set_offline(true);
        assert!(store.flush("m1").await.is_err());
        assert!(store.has_pending("m1"));
        assert_eq!(store.read("m1").await.optional_prompt, "typed");

        backing.set_offline(false);
        store.flush_all().await.unwrap();
        assert!(!store.has_pending("m1"));
        let stored = backing.inner.get_item(&storage_key("m1")).await.unwrap().unwrap();
        assert_eq!(decode_snapshot(&stored).unwrap().optional_prompt, "typed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_debounced_write_is_retried_by_flush() {
        let (store, backing) = flaky_store();
        backing.set_offline(true);
        store.schedule_write("m1", with_prompt("draft"));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(store.has_pending("m1"));
        assert!(backing.inner.is_empty());

        backing.set_offline(false);
        store.flush("m1").await.unwrap();
        assert_eq!(backing.inner.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_apply_for_keeps_prior_pending() {
        let (store, backing) = flaky_store();
        store.schedule_write("m1", with_prompt("shorter"));

        backing.set_offline(true);
        let result = store
            .apply_for("m1", |mut snapshot| {
                snapshot.begin_request("req-1", Some("shorter".into()));
                snapshot
            })
            .await;
        assert!(result.is_err());

        let kept = store.read("m1").await;
        assert_eq!(kept.optional_prompt, "shorter");
        assert!(!kept.is_sending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_schedule_wins_over_restored_write() {
        let (store, backing) = flaky_store();
        store.schedule_write("m1", with_prompt("old"));
        backing.set_offline(true);
        assert!(store.flush("m1").await.is_err());

        store.schedule_write("m1", with_prompt("new"));
        backing.set_offline(false);
        store.flush("m1").await.unwrap();
        assert_eq!(store.read("m1").await.optional_prompt, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_locks_are_released_when_idle() {
        let (store, _) = store_with_backing();
        store.write("m1", completed("a")).await.unwrap();
        store.read("m2").await;
        store.schedule_write("m3", with_prompt("x"));
        assert_eq!(store.state().locks.len(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        store.flush_all().await.unwrap();
        assert!(store.state().locks.is_empty());
    }

    #[tokio::test]
    async fn test_durability_follows_surface() {
        let (store, _) = store_with_backing();
        assert!(store.is_durable());

        let session_only = SnapshotStore::with_default_debounce(Arc::new(MemoryKeyValueStore::new()));
        assert!(!session_only.is_durable());
    }
}
