//! Process-wide registry of in-flight drafting operations.
//!
//! Each operation is keyed by a request id and owns exactly one run at a time.
//! Observers come and go independently of the run: a pane can detach on
//! unmount, the run keeps going, and a later attach gets the stored outcome
//! replayed instead of a second call.
//!
//! Transient failures are retried here, up to the [`RetryPolicy`] budget.
//! Callers never retry on their own.

use draftpane_core::config::RetryPolicy;
use draftpane_core::draft::{DraftResponse, Executor};
use draftpane_core::error::{DraftError, FailureKind, Result};
use futures::FutureExt;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

static GLOBAL: OnceCell<OperationRegistry> = OnceCell::new();

/// Handle returned by [`OperationRegistry::attach`], used to detach.
pub type ObserverId = u64;

/// Lifecycle of a registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

/// A retry the registry has armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// 1-based retry number.
    pub attempt: u32,
    pub delay: Duration,
}

/// A failed (or cancelled) run, as delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFailure {
    pub error: DraftError,
    pub kind: FailureKind,
    /// Set when the registry has already scheduled another attempt.
    pub retry: Option<ScheduledRetry>,
}

/// Stored outcome of the latest settled run.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Success(DraftResponse),
    Failure(OperationFailure),
}

/// Receives outcomes for one request id.
///
/// Callbacks run synchronously on the settling task, outside the registry
/// lock. They must not block. A panicking observer is logged and skipped.
pub trait OperationObserver: Send + Sync {
    fn on_success(&self, response: &DraftResponse);

    fn on_failure(&self, failure: &OperationFailure);

    /// A scheduled retry has started running.
    fn on_retry_started(&self, _attempt: u32) {}
}

/// Read-only view of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationState {
    pub status: OperationStatus,
    pub retry_count: u32,
    pub retry_pending: bool,
    pub observer_count: usize,
    pub outcome: Option<OperationOutcome>,
}

type Observers = Vec<(ObserverId, Arc<dyn OperationObserver>)>;

struct OperationRecord {
    executor: Executor,
    status: OperationStatus,
    outcome: Option<OperationOutcome>,
    observers: Observers,
    retry_count: u32,
    retry_timer: Option<JoinHandle<()>>,
    /// Identifies the current run; settlements from older runs are dropped.
    run_id: u64,
    cancel: CancellationToken,
}

impl OperationRecord {
    fn new(executor: Executor, run_id: u64) -> Self {
        Self {
            executor,
            status: OperationStatus::Pending,
            outcome: None,
            observers: Vec::new(),
            retry_count: 0,
            retry_timer: None,
            run_id,
            cancel: CancellationToken::new(),
        }
    }

    /// Settled with nothing left to do.
    fn is_terminal(&self) -> bool {
        self.status != OperationStatus::Pending && self.retry_timer.is_none()
    }

    fn state(&self) -> OperationState {
        OperationState {
            status: self.status,
            retry_count: self.retry_count,
            retry_pending: self.retry_timer.is_some(),
            observer_count: self.observers.len(),
            outcome: self.outcome.clone(),
        }
    }

    fn launch(&self) -> Launch {
        Launch {
            run_id: self.run_id,
            executor: Arc::clone(&self.executor),
            cancel: self.cancel.clone(),
        }
    }
}

/// Everything needed to spawn a run once the table lock is released.
struct Launch {
    run_id: u64,
    executor: Executor,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryTable {
    records: HashMap<String, OperationRecord>,
    next_run_id: u64,
    next_observer_id: ObserverId,
}

impl RegistryTable {
    fn next_run_id(&mut self) -> u64 {
        self.next_run_id += 1;
        self.next_run_id
    }

    fn next_observer_id(&mut self) -> ObserverId {
        self.next_observer_id += 1;
        self.next_observer_id
    }

    /// Creates the record if missing, else swaps in the new executor.
    /// Returns a launch when a new run must be spawned.
    fn ensure(&mut self, request_id: &str, executor: Executor) -> Option<Launch> {
        if let Some(record) = self.records.get_mut(request_id) {
            record.executor = executor;
            return None;
        }
        let run_id = self.next_run_id();
        let record = OperationRecord::new(executor, run_id);
        let launch = record.launch();
        self.records.insert(request_id.to_string(), record);
        Some(launch)
    }
}

struct RegistryInner {
    policy: RetryPolicy,
    table: Mutex<RegistryTable>,
}

/// Tracks in-flight and recently settled drafting operations.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct OperationRegistry {
    inner: Arc<RegistryInner>,
}

impl OperationRegistry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                policy,
                table: Mutex::new(RegistryTable::default()),
            }),
        }
    }

    /// The process-wide registry, created with the default policy on first use.
    pub fn global() -> Self {
        GLOBAL
            .get_or_init(|| OperationRegistry::new(RetryPolicy::default()))
            .clone()
    }

    /// Installs the process-wide registry with `policy`.
    ///
    /// Returns `false` if a global registry already exists.
    pub fn install_global(policy: RetryPolicy) -> bool {
        GLOBAL.set(OperationRegistry::new(policy)).is_ok()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    fn table(&self) -> MutexGuard<'_, RegistryTable> {
        self.inner.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ============================================================================
    // Public operations
    // ============================================================================

    /// Starts `executor` under `request_id` unless a record already exists,
    /// in which case only the stored executor is replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure(&self, request_id: &str, executor: Executor) -> OperationState {
        let (launch, state) = {
            let mut table = self.table();
            let launch = table.ensure(request_id, executor);
            let state = table
                .records
                .get(request_id)
                .map(OperationRecord::state);
            (launch, state)
        };

        if let Some(launch) = launch {
            tracing::debug!("[OperationRegistry] Started {}", request_id);
            self.spawn_run(request_id, launch);
        }

        state.unwrap_or(OperationState {
            status: OperationStatus::Pending,
            retry_count: 0,
            retry_pending: false,
            observer_count: 0,
            outcome: None,
        })
    }

    /// Ensures the operation and adds `observer`.
    ///
    /// If the record has already settled, the stored outcome is delivered to
    /// `observer` before this returns.
    pub fn attach(
        &self,
        request_id: &str,
        executor: Executor,
        observer: Arc<dyn OperationObserver>,
    ) -> ObserverId {
        let (observer_id, launch, replay) = {
            let mut table = self.table();
            let launch = table.ensure(request_id, executor);
            let observer_id = table.next_observer_id();
            let replay = match table.records.get_mut(request_id) {
                Some(record) => {
                    record.observers.push((observer_id, Arc::clone(&observer)));
                    if record.status == OperationStatus::Pending {
                        None
                    } else {
                        record.outcome.clone()
                    }
                }
                None => None,
            };
            (observer_id, launch, replay)
        };

        if let Some(launch) = launch {
            tracing::debug!("[OperationRegistry] Started {} on attach", request_id);
            self.spawn_run(request_id, launch);
        }

        if let Some(outcome) = replay {
            tracing::debug!("[OperationRegistry] Replaying settled outcome for {}", request_id);
            notify(request_id, &[(observer_id, observer)], &outcome);
        }

        observer_id
    }

    /// Removes an observer. Evicts the record if it is terminal and has no
    /// observers left.
    pub fn detach(&self, request_id: &str, observer_id: ObserverId) -> bool {
        let mut table = self.table();
        let Some(record) = table.records.get_mut(request_id) else {
            return false;
        };

        let before = record.observers.len();
        record.observers.retain(|(id, _)| *id != observer_id);
        let removed = record.observers.len() != before;

        if record.is_terminal() && record.observers.is_empty() {
            table.records.remove(request_id);
            tracing::debug!("[OperationRegistry] Evicted {}", request_id);
        }
        removed
    }

    /// Schedules another run of a failed record after the policy delay.
    ///
    /// Returns `false` for records that are not failed, already have a retry
    /// pending, or have spent their attempt budget.
    pub fn schedule_retry(&self, request_id: &str) -> bool {
        let mut table = self.table();
        let Some(record) = table.records.get_mut(request_id) else {
            return false;
        };
        if record.status != OperationStatus::Failed || record.retry_timer.is_some() {
            return false;
        }
        self.arm_retry(request_id, record).is_some()
    }

    /// Signals cancellation to the current run and drops any pending retry.
    ///
    /// The record settles as cancelled right away and observers are told.
    /// Whatever the run eventually returns is discarded.
    pub fn cancel(&self, request_id: &str) -> bool {
        let (observers, outcome) = {
            let mut table = self.table();
            let Some(record) = table.records.get_mut(request_id) else {
                return false;
            };

            record.cancel.cancel();
            let had_retry = match record.retry_timer.take() {
                Some(timer) => {
                    timer.abort();
                    true
                }
                None => false,
            };

            let live = record.status == OperationStatus::Pending
                || (record.status == OperationStatus::Failed && had_retry);
            if !live {
                return true;
            }

            let outcome = OperationOutcome::Failure(OperationFailure {
                error: DraftError::Cancelled,
                kind: FailureKind::Cancelled,
                retry: None,
            });
            record.status = OperationStatus::Cancelled;
            record.outcome = Some(outcome.clone());
            (record.observers.clone(), outcome)
        };

        tracing::info!("[OperationRegistry] Cancelled {}", request_id);
        notify(request_id, &observers, &outcome);
        true
    }

    pub fn state(&self, request_id: &str) -> Option<OperationState> {
        self.table()
            .records
            .get(request_id)
            .map(OperationRecord::state)
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.table().records.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.table().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ============================================================================
    // Runs and retries
    // ============================================================================

    fn spawn_run(&self, request_id: &str, launch: Launch) {
        let registry = self.clone();
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            let Launch {
                run_id,
                executor,
                cancel,
            } = launch;
            let result = AssertUnwindSafe(executor(cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(DraftError::internal("drafting executor panicked")));
            registry.settle(&request_id, run_id, result);
        });
    }

    fn settle(&self, request_id: &str, run_id: u64, result: Result<DraftResponse>) {
        let (observers, outcome) = {
            let mut table = self.table();
            let Some(record) = table.records.get_mut(request_id) else {
                tracing::debug!("[OperationRegistry] {} settled after eviction", request_id);
                return;
            };
            if record.run_id != run_id || record.status != OperationStatus::Pending {
                tracing::debug!("[OperationRegistry] Dropping stale settlement for {}", request_id);
                return;
            }

            let outcome = match result {
                Ok(response) => {
                    record.status = OperationStatus::Succeeded;
                    OperationOutcome::Success(response)
                }
                Err(error) => {
                    let kind = if record.cancel.is_cancelled() {
                        FailureKind::Cancelled
                    } else {
                        error.failure_kind()
                    };
                    record.status = match kind {
                        FailureKind::Cancelled => OperationStatus::Cancelled,
                        _ => OperationStatus::Failed,
                    };
                    let retry = match kind {
                        FailureKind::Transient => self.arm_retry(request_id, record),
                        _ => None,
                    };
                    if retry.is_none() && kind != FailureKind::Cancelled {
                        tracing::warn!("[OperationRegistry] {} failed: {}", request_id, error);
                    }
                    OperationOutcome::Failure(OperationFailure { error, kind, retry })
                }
            };

            record.outcome = Some(outcome.clone());
            (record.observers.clone(), outcome)
        };

        notify(request_id, &observers, &outcome);
    }

    /// Arms a retry timer on a failed record. Caller holds the table lock.
    fn arm_retry(&self, request_id: &str, record: &mut OperationRecord) -> Option<ScheduledRetry> {
        let attempt = record.retry_count + 1;
        let Some(delay) = self.inner.policy.delay_for(attempt) else {
            tracing::debug!(
                "[OperationRegistry] Retry budget exhausted for {} after {} attempts",
                request_id,
                record.retry_count
            );
            return None;
        };

        record.retry_count = attempt;
        let registry = self.clone();
        let key = request_id.to_string();
        record.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.rerun(&key);
        }));

        tracing::info!(
            "[OperationRegistry] Retry {} for {} in {}ms",
            attempt,
            request_id,
            delay.as_millis()
        );
        Some(ScheduledRetry { attempt, delay })
    }

    fn rerun(&self, request_id: &str) {
        let (launch, attempt, observers) = {
            let mut table = self.table();
            let run_id = table.next_run_id();
            let Some(record) = table.records.get_mut(request_id) else {
                return;
            };
            if record.status != OperationStatus::Failed || record.retry_timer.take().is_none() {
                return;
            }
            record.status = OperationStatus::Pending;
            record.outcome = None;
            record.run_id = run_id;
            (record.launch(), record.retry_count, record.observers.clone())
        };

        tracing::debug!("[OperationRegistry] Running retry {} for {}", attempt, request_id);
        for (observer_id, observer) in &observers {
            let delivered =
                std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_retry_started(attempt)));
            if delivered.is_err() {
                tracing::error!(
                    "[OperationRegistry] Observer {} for {} panicked",
                    observer_id,
                    request_id
                );
            }
        }
        self.spawn_run(request_id, launch);
    }
}

fn notify(
    request_id: &str,
    observers: &[(ObserverId, Arc<dyn OperationObserver>)],
    outcome: &OperationOutcome,
) {
    for (observer_id, observer) in observers {
        let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| match outcome {
            OperationOutcome::Success(response) => observer.on_success(response),
            OperationOutcome::Failure(failure) => observer.on_failure(failure),
        }));
        if delivered.is_err() {
            tracing::error!(
                "[OperationRegistry] Observer {} for {} panicked",
                observer_id,
                request_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scripted(steps: Vec<Result<DraftResponse>>) -> (Executor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(Mutex::new(VecDeque::from(steps)));
        let counter = Arc::clone(&calls);
        let executor: Executor = Arc::new(move |_cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            let step = script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DraftError::internal("script exhausted")));
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                step
            }
            .boxed()
        });
        (executor, calls)
    }

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<OperationOutcome>>,
    }

    impl Recorder {
        fn outcomes(&self) -> Vec<OperationOutcome> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    impl OperationObserver for Recorder {
        fn on_success(&self, response: &DraftResponse) {
            self.outcomes
                .lock()
                .unwrap()
                .push(OperationOutcome::Success(response.clone()));
        }

        fn on_failure(&self, failure: &OperationFailure) {
            self.outcomes
                .lock()
                .unwrap()
                .push(OperationOutcome::Failure(failure.clone()));
        }
    }

    struct Panicker;

    impl OperationObserver for Panicker {
        fn on_success(&self, _response: &DraftResponse) {
            panic!("observer blew up");
        }

        fn on_failure(&self, _failure: &OperationFailure) {
            panic!("observer blew up");
        }
    }

    fn registry() -> OperationRegistry {
        OperationRegistry::new(RetryPolicy::default())
    }

    fn transient() -> DraftError {
        DraftError::network("TypeError", "Failed to fetch")
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_duplicate_dispatch() {
        let registry = registry();
        let (executor, calls) = scripted(vec![Ok(DraftResponse::new("ok"))]);

        for _ in 0..5 {
            registry.ensure("req-1", Arc::clone(&executor));
        }
        let observer = Arc::new(Recorder::default());
        registry.attach("req-1", Arc::clone(&executor), observer.clone());
        registry.attach("req-1", executor, observer.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observer.outcomes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_attach_replays_synchronously() {
        let registry = registry();
        let (executor, calls) = scripted(vec![Ok(DraftResponse::new("ok"))]);
        registry.ensure("req-1", Arc::clone(&executor));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let late = Arc::new(Recorder::default());
        registry.attach("req-1", executor, late.clone());

        assert_eq!(
            late.outcomes(),
            vec![OperationOutcome::Success(DraftResponse::new("ok"))]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_waits_for_last_observer() {
        let registry = registry();
        let (executor, _) = scripted(vec![Ok(DraftResponse::new("ok"))]);
        let first = registry.attach("req-1", Arc::clone(&executor), Arc::new(Recorder::default()));
        let second = registry.attach("req-1", executor, Arc::new(Recorder::default()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(registry.detach("req-1", first));
        assert!(registry.contains("req-1"));
        assert!(registry.detach("req-1", second));
        assert!(!registry.contains("req-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_while_pending_keeps_record() {
        let registry = registry();
        let (executor, calls) = scripted(vec![Ok(DraftResponse::new("later"))]);
        let id = registry.attach("req-1", Arc::clone(&executor), Arc::new(Recorder::default()));
        registry.detach("req-1", id);
        assert!(registry.contains("req-1"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let returning = Arc::new(Recorder::default());
        registry.attach("req-1", executor, returning.clone());

        assert_eq!(
            returning.outcomes(),
            vec![OperationOutcome::Success(DraftResponse::new("later"))]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let registry = registry();
        let terminal = || Err(DraftError::internal("nope"));
        let (executor, calls) = scripted(vec![terminal(), terminal(), terminal(), terminal()]);
        registry.ensure("req-1", executor);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.state("req-1").unwrap().status, OperationStatus::Failed);

        for (attempt, delay_ms) in [(1u32, 1_500u64), (2, 3_000), (3, 4_500)] {
            assert!(registry.schedule_retry("req-1"), "attempt {attempt}");
            assert!(!registry.schedule_retry("req-1"));

            let before = calls.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay_ms - 100)).await;
            assert_eq!(calls.load(Ordering::SeqCst), before);
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(calls.load(Ordering::SeqCst), before + 1);
            assert_eq!(registry.state("req-1").unwrap().retry_count, attempt);
        }

        assert!(!registry.schedule_retry("req-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_automatically() {
        let registry = registry();
        let (executor, calls) = scripted(vec![Err(transient()), Ok(DraftResponse::new("ok"))]);
        let observer = Arc::new(Recorder::default());
        registry.attach("req-1", executor, observer.clone());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let outcomes = observer.outcomes();
        assert_eq!(outcomes.len(), 2);
        match &outcomes[0] {
            OperationOutcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::Transient);
                assert_eq!(
                    failure.retry,
                    Some(ScheduledRetry {
                        attempt: 1,
                        delay: Duration::from_millis(1_500)
                    })
                );
            }
            other => panic!("expected retry notice, got {other:?}"),
        }
        assert_eq!(outcomes[1], OperationOutcome::Success(DraftResponse::new("ok")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_stop_at_budget() {
        let registry = registry();
        let (executor, calls) = scripted((0..6).map(|_| Err(transient())).collect());
        let observer = Arc::new(Recorder::default());
        registry.attach("req-1", executor, observer.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let state = registry.state("req-1").unwrap();
        assert_eq!(state.status, OperationStatus::Failed);
        assert!(!state.retry_pending);
        match observer.outcomes().last() {
            Some(OperationOutcome::Failure(failure)) => assert!(failure.retry.is_none()),
            other => panic!("expected final failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_retry() {
        let registry = registry();
        let (executor, calls) = scripted(vec![Err(transient()), Ok(DraftResponse::new("ok"))]);
        let observer = Arc::new(Recorder::default());
        let id = registry.attach("req-1", executor, observer.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.state("req-1").unwrap().retry_pending);

        assert!(registry.cancel("req-1"));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match observer.outcomes().last() {
            Some(OperationOutcome::Failure(failure)) => {
                assert_eq!(failure.kind, FailureKind::Cancelled)
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        registry.detach("req-1", id);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_late_success() {
        let registry = registry();
        let (executor, _) = scripted(vec![Ok(DraftResponse::new("too late"))]);
        let observer = Arc::new(Recorder::default());
        registry.attach("req-1", executor, observer.clone());
        registry.cancel("req-1");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(observer.outcomes().len(), 1);
        assert_eq!(
            registry.state("req-1").unwrap().status,
            OperationStatus::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_observer_is_isolated() {
        let registry = registry();
        let (executor, _) = scripted(vec![Ok(DraftResponse::new("ok"))]);
        registry.attach("req-1", Arc::clone(&executor), Arc::new(Panicker));
        let healthy = Arc::new(Recorder::default());
        let healthy_id = registry.attach("req-1", executor, healthy.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(healthy.outcomes().len(), 1);

        let state = registry.state("req-1").unwrap();
        assert_eq!(state.status, OperationStatus::Succeeded);
        assert_eq!(state.observer_count, 2);
        assert!(registry.detach("req-1", healthy_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_request_ids() {
        let registry = registry();
        let (first, first_calls) = scripted(vec![Ok(DraftResponse::new("a"))]);
        let (second, second_calls) = scripted(vec![Err(DraftError::internal("b"))]);
        registry.ensure("req-a", first);
        registry.ensure("req-b", second);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.state("req-a").unwrap().status, OperationStatus::Succeeded);
        assert_eq!(registry.state("req-b").unwrap().status, OperationStatus::Failed);
    }
}
