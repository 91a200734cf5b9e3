//! Single background worker with cancel-and-replace scheduling.
//!
//! The worker runs one [`WorkUnit`] at a time on a dedicated thread. Scheduling
//! a new unit cancels whatever is running, replaces whatever is pending, and
//! wakes the thread. Before each unit starts, the worker gives closures posted
//! through the UI bridge by the previous (cancelled) unit a bounded amount of
//! time to retire, so a stale closure cannot mutate UI state after the next
//! unit has begun.

use crate::bridge::{panic_message, BridgeError, UiBridge};
use crate::cancel::{CancellationToken, Cancelled};
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Outcome of a unit that did not complete normally
#[derive(Debug, Error)]
pub enum WorkError {
    /// The unit observed cancellation; never surfaced to the user
    #[error("work cancelled")]
    Cancelled,

    /// The unit failed
    #[error(transparent)]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl WorkError {
    /// Wrap any error as a unit failure
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WorkError::Failed(Box::new(error))
    }

    /// Whether this is the cancellation outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkError::Cancelled)
    }
}

impl From<Cancelled> for WorkError {
    fn from(_: Cancelled) -> Self {
        WorkError::Cancelled
    }
}

impl From<BridgeError> for WorkError {
    fn from(error: BridgeError) -> Self {
        match error {
            // A vanished UI loop means the viewer is being torn down.
            BridgeError::Cancelled | BridgeError::Disconnected => WorkError::Cancelled,
            BridgeError::Panicked(_) | BridgeError::OnUiThread => WorkError::failed(error),
        }
    }
}

type UnitFn<S> = Box<dyn FnOnce(&WorkContext<S>) -> Result<(), WorkError> + Send>;

/// One schedulable, cancellable job
pub struct WorkUnit<S> {
    name: String,
    run: UnitFn<S>,
}

impl<S> WorkUnit<S> {
    /// Create a unit from a closure
    ///
    /// The closure receives a [`WorkContext`] carrying the token it must poll.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&WorkContext<S>) -> Result<(), WorkError> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    /// Name used in logs and failure reports
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S> fmt::Debug for WorkUnit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit").field("name", &self.name).finish()
    }
}

/// What a running unit can see of the worker
pub struct WorkContext<S> {
    token: CancellationToken,
    ocr_token: CancellationToken,
    bridge: UiBridge<S>,
}

impl<S: 'static> WorkContext<S> {
    /// Build a context by hand (tests, or hosts that run a unit inline)
    pub fn new(token: CancellationToken, ocr_token: CancellationToken, bridge: UiBridge<S>) -> Self {
        Self {
            token,
            ocr_token,
            bridge,
        }
    }

    /// Token of this unit; cancelled when another unit is scheduled
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Token for OCR started by this unit; only cancelled on teardown
    pub fn ocr_token(&self) -> &CancellationToken {
        &self.ocr_token
    }

    /// Bridge to the UI thread
    pub fn bridge(&self) -> &UiBridge<S> {
        &self.bridge
    }

    /// `Err(Cancelled)` once this unit has been superseded
    pub fn check(&self) -> Result<(), Cancelled> {
        self.token.check()
    }

    /// Run `f` on the UI thread under this unit's token
    pub fn run_on_ui<R, F>(&self, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.bridge.run_on_ui_and_wait(&self.token, f)
    }
}

/// Options for [`Worker::schedule_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Also cancel OCR started by the running unit
    pub cancel_ocr: bool,
}

/// A unit failure as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFailure {
    /// Name of the failed unit
    pub unit: String,

    /// Display text of the error or panic payload
    pub message: String,
}

/// Called on the UI thread, once per failed unit
pub type FailureHandler<S> = Arc<dyn Fn(&mut S, &WorkFailure) + Send + Sync>;

/// Configuration for the background worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long a new unit waits for stale UI closures to retire.
    /// Default: 1s.
    pub retire_timeout: Duration,

    /// Sleep between checks while waiting for stale UI closures.
    /// Default: 10ms.
    pub retire_poll: Duration,

    /// Name given to the worker thread
    pub thread_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retire_timeout: Duration::from_secs(1),
            retire_poll: Duration::from_millis(10),
            thread_name: "zonefit-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stale-closure retire timeout
    pub fn with_retire_timeout(mut self, timeout: Duration) -> Self {
        self.retire_timeout = timeout;
        self
    }

    /// Set the stale-closure poll interval
    pub fn with_retire_poll(mut self, poll: Duration) -> Self {
        self.retire_poll = poll;
        self
    }

    /// Set the worker thread name
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Worker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Units passed to `schedule`
    pub scheduled: u64,

    /// Units that returned `Ok`
    pub completed: u64,

    /// Units that ended in cancellation, or were dropped before starting
    pub cancelled: u64,

    /// Units that failed or panicked
    pub failed: u64,
}

struct WorkerState<S> {
    pending: Option<WorkUnit<S>>,
    token: CancellationToken,
    ocr_token: CancellationToken,
    busy: bool,
    stop_requested: bool,
    restart: bool,
    thread_alive: bool,
    stats: WorkerStats,
}

impl<S> WorkerState<S> {
    fn is_idle(&self) -> bool {
        !self.busy && self.pending.is_none()
    }
}

struct Inner<S> {
    state: Mutex<WorkerState<S>>,
    wake: Condvar,
    idle: Condvar,
    bridge: UiBridge<S>,
    config: WorkerConfig,
    on_failure: Mutex<Option<FailureHandler<S>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The single background worker
///
/// # Example
///
/// ```
/// use zonefit_scheduler::{ui_channel, WorkContext, WorkUnit, Worker, WorkerConfig};
/// use std::time::Duration;
///
/// let (bridge, mut ui_loop) = ui_channel(0u32);
/// let worker = Worker::new(bridge, WorkerConfig::default());
///
/// worker
///     .schedule(WorkUnit::new("count", |ctx: &WorkContext<u32>| {
///         ctx.check()?;
///         Ok(())
///     }))
///     .unwrap();
///
/// assert!(worker.wait_idle(Duration::from_secs(5)));
/// ui_loop.pump();
/// worker.shutdown();
/// ```
pub struct Worker<S: Send + 'static> {
    inner: Arc<Inner<S>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> Worker<S> {
    /// Create a worker; its thread starts with the first scheduled unit
    pub fn new(bridge: UiBridge<S>, config: WorkerConfig) -> Self {
        let state = WorkerState {
            pending: None,
            token: CancellationToken::new(),
            ocr_token: CancellationToken::new(),
            busy: false,
            stop_requested: false,
            restart: false,
            thread_alive: false,
            stats: WorkerStats::default(),
        };

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                wake: Condvar::new(),
                idle: Condvar::new(),
                bridge,
                config,
                on_failure: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Install the handler that displays unit failures on the UI thread
    pub fn set_failure_handler(&self, handler: FailureHandler<S>) {
        *lock(&self.inner.on_failure) = Some(handler);
    }

    /// Bridge the worker's units use
    pub fn bridge(&self) -> &UiBridge<S> {
        &self.inner.bridge
    }

    /// Cancel the running unit and make `unit` the next one to run
    ///
    /// OCR started by the running unit is left alone.
    pub fn schedule(&self, unit: WorkUnit<S>) -> io::Result<()> {
        self.schedule_with(unit, ScheduleOptions::default())
    }

    /// Cancel the running unit and make `unit` the next one to run
    pub fn schedule_with(&self, unit: WorkUnit<S>, options: ScheduleOptions) -> io::Result<()> {
        let spawn = {
            let mut state = lock(&self.inner.state);
            state.token.cancel();
            if options.cancel_ocr {
                state.ocr_token.cancel();
                state.ocr_token = CancellationToken::new();
            }

            tracing::debug!(unit = unit.name(), "scheduling work unit");
            if let Some(replaced) = state.pending.replace(unit) {
                tracing::debug!(unit = replaced.name(), "pending unit replaced before it started");
                state.stats.cancelled += 1;
            }
            state.stats.scheduled += 1;

            if state.stop_requested {
                state.restart = true;
            }

            let spawn = !state.thread_alive;
            state.thread_alive = true;
            spawn
        };
        self.inner.wake.notify_all();

        if spawn {
            self.spawn_thread()?;
        }
        Ok(())
    }

    /// Cancel the running unit and drop the pending one
    pub fn cancel(&self, options: ScheduleOptions) {
        let mut state = lock(&self.inner.state);
        state.token.cancel();
        if options.cancel_ocr {
            state.ocr_token.cancel();
            state.ocr_token = CancellationToken::new();
        }
        if state.pending.take().is_some() {
            state.stats.cancelled += 1;
        }
        if state.is_idle() {
            self.inner.idle.notify_all();
        }
    }

    /// Ask the worker thread to exit after the running unit observes cancellation
    ///
    /// Units scheduled after this call restart the worker instead of being dropped.
    pub fn stop(&self) {
        let mut state = lock(&self.inner.state);
        state.stop_requested = true;
        state.restart = false;
        state.token.cancel();
        state.ocr_token.cancel();
        state.ocr_token = CancellationToken::new();
        if state.pending.take().is_some() {
            state.stats.cancelled += 1;
        }
        drop(state);
        self.inner.wake.notify_all();
    }

    /// Stop the worker and wait for its thread to exit
    pub fn shutdown(&self) {
        self.stop();
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked outside a work unit");
            }
        }
    }

    /// Whether no unit is running or pending
    pub fn is_idle(&self) -> bool {
        lock(&self.inner.state).is_idle()
    }

    /// Block until the worker is idle; `false` if `timeout` expired first
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);
        while !state.is_idle() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Token of the running (or most recently run) unit
    pub fn current_token(&self) -> CancellationToken {
        lock(&self.inner.state).token.clone()
    }

    /// Token handed to OCR started by units
    pub fn ocr_token(&self) -> CancellationToken {
        lock(&self.inner.state).ocr_token.clone()
    }

    /// Get worker statistics
    pub fn stats(&self) -> WorkerStats {
        lock(&self.inner.state).stats.clone()
    }

    fn spawn_thread(&self) -> io::Result<()> {
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(self.inner.config.thread_name.clone())
            .spawn(move || run_loop(inner));

        match spawned {
            Ok(handle) => {
                // The previous thread, if any, has already exited.
                *lock(&self.handle) = Some(handle);
                Ok(())
            }
            Err(error) => {
                tracing::error!(%error, "failed to spawn worker thread");
                let mut state = lock(&self.inner.state);
                state.thread_alive = false;
                Err(error)
            }
        }
    }
}

impl<S: Send + 'static> Drop for Worker<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<S: Send + 'static>(inner: Arc<Inner<S>>) {
    tracing::debug!("worker thread started");
    while wait_for_work(&inner) {
        if !inner
            .bridge
            .wait_retired(inner.config.retire_timeout, inner.config.retire_poll)
        {
            tracing::trace!(
                outstanding = inner.bridge.outstanding(),
                "stale UI calls did not retire in time; starting next unit anyway"
            );
        }

        let Some((unit, context)) = begin_unit(&inner) else {
            continue;
        };

        let name = unit.name;
        let run = unit.run;
        tracing::debug!(unit = %name, "work unit started");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(&context)));
        finish_unit(&inner, &name, &context, outcome);
    }
    tracing::debug!("worker thread exited");
}

/// Block until a unit is pending. Returns `false` when the thread should exit.
fn wait_for_work<S>(inner: &Inner<S>) -> bool {
    let mut state = lock(&inner.state);
    loop {
        if state.stop_requested {
            if state.restart {
                tracing::debug!("worker restarting for work scheduled during shutdown");
                state.stop_requested = false;
                state.restart = false;
                continue;
            }
            state.busy = false;
            state.thread_alive = false;
            inner.idle.notify_all();
            return false;
        }

        if state.pending.is_some() {
            return true;
        }

        state.busy = false;
        inner.idle.notify_all();
        state = inner
            .wake
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

fn begin_unit<S: 'static>(inner: &Inner<S>) -> Option<(WorkUnit<S>, WorkContext<S>)> {
    let mut state = lock(&inner.state);
    if state.stop_requested {
        return None;
    }
    let unit = state.pending.take()?;

    let token = CancellationToken::new();
    state.token = token.clone();
    state.busy = true;

    let context = WorkContext::new(token, state.ocr_token.clone(), inner.bridge.clone());
    Some((unit, context))
}

fn finish_unit<S: 'static>(
    inner: &Inner<S>,
    name: &str,
    context: &WorkContext<S>,
    outcome: Result<Result<(), WorkError>, Box<dyn Any + Send>>,
) {
    let failure = match outcome {
        Ok(Ok(())) => {
            tracing::debug!(unit = name, "work unit completed");
            lock(&inner.state).stats.completed += 1;
            None
        }
        Ok(Err(WorkError::Cancelled)) => {
            tracing::debug!(unit = name, "work unit cancelled");
            lock(&inner.state).stats.cancelled += 1;
            None
        }
        Ok(Err(error)) if context.token().is_cancelled() => {
            // Torn-down state under a pending cancellation; not the user's problem.
            tracing::debug!(unit = name, %error, "failure during cancellation ignored");
            lock(&inner.state).stats.cancelled += 1;
            None
        }
        Ok(Err(error)) => Some(error.to_string()),
        Err(payload) => Some(panic_message(payload.as_ref())),
    };

    if let Some(message) = failure {
        tracing::error!(unit = name, %message, "work unit failed");
        lock(&inner.state).stats.failed += 1;
        report_failure(inner, name, message);
    }

    let mut state = lock(&inner.state);
    state.busy = false;
    if state.pending.is_none() {
        inner.idle.notify_all();
    }
}

fn report_failure<S: 'static>(inner: &Inner<S>, name: &str, message: String) {
    let handler = lock(&inner.on_failure).clone();
    let Some(handler) = handler else {
        return;
    };

    let failure = WorkFailure {
        unit: name.to_string(),
        message,
    };
    if inner
        .bridge
        .post(move |state| handler(state, &failure))
        .is_err()
    {
        tracing::debug!("UI loop gone; failure not displayed");
    }
}
