//! UI-thread marshaling
//!
//! State owned by the UI thread (the live highlight layer, the current page,
//! the gesture in progress) is only ever touched by closures that run on the
//! UI thread. The worker posts those closures through a [`UiBridge`] and the
//! host drains them from its event loop through the matching [`UiLoop`].
//!
//! A waiting call returns as soon as either the closure completes or the
//! caller's token is cancelled. A cancelled call is not revoked: the closure
//! stays queued and re-checks the token it captured when it was posted, so it
//! becomes a no-op once the UI thread reaches it. The number of such calls
//! still in flight is tracked so the worker can let them retire before it
//! starts the next unit.

use crate::cancel::{CancellationToken, Cancelled};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

type UiTask<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Errors returned by [`UiBridge::run_on_ui_and_wait`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The caller's token was cancelled before the closure completed
    #[error("UI call cancelled")]
    Cancelled,

    /// The UI loop was dropped before running the closure
    #[error("UI loop did not complete the call")]
    Disconnected,

    /// The closure panicked on the UI thread
    #[error("UI call {0}")]
    Panicked(String),

    /// A waiting call was made from the UI thread itself
    #[error("cannot wait on the UI thread from the UI thread")]
    OnUiThread,
}

impl From<Cancelled> for BridgeError {
    fn from(_: Cancelled) -> Self {
        BridgeError::Cancelled
    }
}

struct Shared {
    outstanding: AtomicUsize,
    ui_thread: Mutex<Option<ThreadId>>,
}

/// Decrements the outstanding-call count when the posted closure finishes,
/// or when it is dropped without ever running.
struct OutstandingGuard {
    shared: Arc<Shared>,
}

impl OutstandingGuard {
    fn new(shared: &Arc<Shared>) -> Self {
        shared.outstanding.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(shared),
        }
    }
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Create a connected bridge/loop pair around the UI-owned state `S`
///
/// # Example
///
/// ```
/// use zonefit_scheduler::{ui_channel, CancellationToken};
/// use std::thread;
///
/// let (bridge, ui_loop) = ui_channel(Vec::<u32>::new());
/// let ui = thread::spawn(move || ui_loop.run());
///
/// let token = CancellationToken::new();
/// let len = bridge
///     .run_on_ui_and_wait(&token, |items| {
///         items.push(7);
///         items.len()
///     })
///     .unwrap();
/// assert_eq!(len, 1);
///
/// drop(bridge);
/// assert_eq!(ui.join().unwrap(), vec![7]);
/// ```
pub fn ui_channel<S>(state: S) -> (UiBridge<S>, UiLoop<S>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let shared = Arc::new(Shared {
        outstanding: AtomicUsize::new(0),
        ui_thread: Mutex::new(None),
    });

    let bridge = UiBridge {
        tx,
        shared: Arc::clone(&shared),
        poll_interval: Duration::from_millis(5),
    };
    let ui_loop = UiLoop { rx, state, shared };

    (bridge, ui_loop)
}

/// Worker-side handle for running closures on the UI thread
pub struct UiBridge<S> {
    tx: Sender<UiTask<S>>,
    shared: Arc<Shared>,
    poll_interval: Duration,
}

impl<S> Clone for UiBridge<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
            poll_interval: self.poll_interval,
        }
    }
}

impl<S: 'static> UiBridge<S> {
    /// Set how often a waiting call re-checks its cancellation token
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run `f` on the UI thread and block until it completes or `token` is cancelled
    ///
    /// The closure is always queued, never run inline. If cancellation wins the
    /// race this returns `Err(BridgeError::Cancelled)` immediately; the queued
    /// closure later sees the same token cancelled and does nothing.
    pub fn run_on_ui_and_wait<R, F>(&self, token: &CancellationToken, f: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_ui_thread() {
            return Err(BridgeError::OnUiThread);
        }
        token.check()?;

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let captured = token.clone();
        let guard = OutstandingGuard::new(&self.shared);

        let task: UiTask<S> = Box::new(move |state| {
            let _guard = guard;
            if captured.is_cancelled() {
                return;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(move || f(state)))
                .map_err(|payload| panic_message(payload.as_ref()));
            if let Err(message) = &result {
                tracing::error!(%message, "UI closure panicked");
            }
            let _ = done_tx.send(result);
        });

        if self.tx.send(task).is_err() {
            return Err(BridgeError::Disconnected);
        }

        loop {
            match done_rx.recv_timeout(self.poll_interval) {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(message)) => return Err(BridgeError::Panicked(message)),
                Err(RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        return Err(BridgeError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(if token.is_cancelled() {
                        BridgeError::Cancelled
                    } else {
                        BridgeError::Disconnected
                    });
                }
            }
        }
    }

    /// Queue `f` on the UI thread without waiting for it
    ///
    /// Posted closures are not counted as outstanding calls.
    pub fn post<F>(&self, f: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx
            .send(Box::new(f))
            .map_err(|_| BridgeError::Disconnected)
    }

    /// Number of waiting calls whose closures have not yet run or been dropped
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Poll until every outstanding call has retired, giving up after `timeout`
    ///
    /// Returns `false` if calls were still outstanding when the timeout expired.
    pub fn wait_retired(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.outstanding() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(poll);
        }
    }

    /// Whether the current thread is the one that last pumped the UI loop
    pub fn is_ui_thread(&self) -> bool {
        let ui_thread = self
            .shared
            .ui_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *ui_thread == Some(thread::current().id())
    }
}

/// UI-side end of the bridge; owns the UI state
pub struct UiLoop<S> {
    rx: Receiver<UiTask<S>>,
    state: S,
    shared: Arc<Shared>,
}

impl<S> UiLoop<S> {
    /// Run every closure that is queued right now, without blocking
    ///
    /// Returns the number of closures processed. Hosts call this from their
    /// event loop (idle handler, frame tick, posted wake-up).
    pub fn pump(&mut self) -> usize {
        self.mark_ui_thread();
        let mut processed = 0;
        loop {
            match self.rx.try_recv() {
                Ok(task) => {
                    self.execute(task);
                    processed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        processed
    }

    /// Wait up to `timeout` for work, then drain the queue
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        self.mark_ui_thread();
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                self.execute(task);
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    /// Process closures until every bridge has been dropped, then hand back the state
    pub fn run(mut self) -> S {
        self.mark_ui_thread();
        while let Ok(task) = self.rx.recv() {
            self.execute(task);
        }
        self.state
    }

    /// Borrow the UI state
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Mutably borrow the UI state (UI thread only)
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    fn execute(&mut self, task: UiTask<S>) {
        let state = &mut self.state;
        if panic::catch_unwind(AssertUnwindSafe(move || task(state))).is_err() {
            tracing::error!("UI closure panicked");
        }
    }

    fn mark_ui_thread(&self) {
        let mut ui_thread = self
            .shared
            .ui_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *ui_thread = Some(thread::current().id());
    }
}

/// Display text for a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
