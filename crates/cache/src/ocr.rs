//! Per-page OCR cache with single-producer coordination
//!
//! Each page is in one of three states: absent (no entry), in flight (a
//! producer is recognizing it) or ready. The first caller to find a page
//! absent becomes its producer: it marks the entry in flight, releases the
//! lock, and calls the recognizer outside it. Everyone else who wants that
//! page waits for the shared completion signal and reuses the producer's
//! result instead of starting a duplicate recognition.
//!
//! A producer that is cancelled or fails always rolls its entry back to
//! absent and wakes the waiters, so no page can be stuck in flight.

use crate::store::{PageKeyedStore, PageNumber, PageStore};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use zonefit_scheduler::{CancellationToken, Cancelled};

/// Recognizes a single page
///
/// The cache calls this outside its lock. Implementations should poll `token`
/// and may return `Ok(None)` when cancelled or when the page has no text.
pub trait PageRecognizer: Send + Sync {
    /// Recognized payload for one page
    type Output: Send + Sync + 'static;

    /// Recognize `page`
    fn recognize_page(
        &self,
        page: PageNumber,
        token: &CancellationToken,
    ) -> Result<Option<Self::Output>, RecognizeError>;
}

/// Recognizer failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognizeError {
    /// Recognition stopped because its token was cancelled
    #[error("recognition cancelled")]
    Cancelled,

    /// Recognition failed
    #[error("recognition failed: {0}")]
    Failed(String),
}

/// Stored cache entry; an absent page has no entry at all
#[derive(Debug)]
pub enum OcrEntry<T> {
    /// A producer is recognizing the page
    InFlight,

    /// Recognized payload
    Ready(Arc<T>),
}

/// Observable state of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrState {
    Absent,
    InFlight,
    Ready,
}

/// Configuration for the OCR cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrCacheConfig {
    /// Recognitions one call may start for a page that keeps coming back empty.
    /// Default: 3.
    pub max_attempts: u32,

    /// How often a waiter re-checks its cancellation token.
    /// Default: 10ms.
    pub wait_poll: Duration,
}

impl Default for OcrCacheConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            wait_poll: Duration::from_millis(10),
        }
    }
}

impl OcrCacheConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry bound for empty results
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the waiter poll interval
    pub fn with_wait_poll(mut self, poll: Duration) -> Self {
        self.wait_poll = poll;
        self
    }
}

/// OCR cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrCacheStats {
    /// Pages with a ready payload
    pub ready: usize,

    /// Pages currently being recognized
    pub in_flight: usize,

    /// Total recognizer invocations
    pub recognitions: u64,

    /// Producers that rolled their entry back to absent
    pub rollbacks: u64,
}

struct CacheState<St> {
    store: St,
    generation: u64,
    recognitions: u64,
    rollbacks: u64,
}

/// Per-page OCR cache
///
/// # Example
///
/// ```
/// use zonefit_cache::{OcrCache, OcrCacheConfig, PageRecognizer, RecognizeError};
/// use zonefit_scheduler::CancellationToken;
///
/// struct Echo;
///
/// impl PageRecognizer for Echo {
///     type Output = String;
///
///     fn recognize_page(
///         &self,
///         page: u32,
///         _token: &CancellationToken,
///     ) -> Result<Option<String>, RecognizeError> {
///         Ok(Some(format!("page {}", page)))
///     }
/// }
///
/// let cache = OcrCache::new(Echo, OcrCacheConfig::default());
/// let token = CancellationToken::new();
/// let text = cache.get_or_load(2, &token, &token).unwrap().unwrap();
/// assert_eq!(text.as_str(), "page 2");
/// assert!(cache.get(2).is_some());
/// ```
pub struct OcrCache<R: PageRecognizer, St = PageStore<OcrEntry<<R as PageRecognizer>::Output>>> {
    recognizer: R,
    state: Mutex<CacheState<St>>,
    completed: Condvar,
    config: OcrCacheConfig,
}

impl<R: PageRecognizer> OcrCache<R> {
    /// Create a cache backed by an in-memory [`PageStore`]
    pub fn new(recognizer: R, config: OcrCacheConfig) -> Self {
        Self::with_store(recognizer, PageStore::new(), config)
    }
}

impl<R, St> OcrCache<R, St>
where
    R: PageRecognizer,
    St: PageKeyedStore<OcrEntry<R::Output>>,
{
    /// Create a cache over an injected store
    pub fn with_store(recognizer: R, store: St, config: OcrCacheConfig) -> Self {
        Self {
            recognizer,
            state: Mutex::new(CacheState {
                store,
                generation: 0,
                recognitions: 0,
                rollbacks: 0,
            }),
            completed: Condvar::new(),
            config,
        }
    }

    /// The recognizer this cache drives
    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    /// Return the page's OCR, recognizing it if no one else is
    ///
    /// `token` is the calling unit's token; cancelling it makes this call
    /// return `Err(Cancelled)` at its next wait or before it starts a
    /// recognition, without disturbing a recognition already running.
    /// `ocr_token` is handed to the recognizer; cancelling it stops the
    /// recognition itself.
    ///
    /// Returns `Ok(None)` when the page has no OCR: the recognizer failed, or
    /// it kept returning nothing for `max_attempts` tries.
    pub fn get_or_load(
        &self,
        page: PageNumber,
        token: &CancellationToken,
        ocr_token: &CancellationToken,
    ) -> Result<Option<Arc<R::Output>>, Cancelled> {
        let mut attempts = 0u32;
        let mut state = self.lock();

        loop {
            token.check()?;

            match state.store.get(page) {
                Some(OcrEntry::Ready(payload)) => return Ok(Some(Arc::clone(payload))),
                Some(OcrEntry::InFlight) => {
                    state = self
                        .completed
                        .wait_timeout(state, self.config.wait_poll)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                    continue;
                }
                None => {}
            }

            // Absent. A rollback caused by cancelling the shared OCR token must
            // not turn every waiter into a new producer.
            ocr_token.check()?;
            if attempts >= self.config.max_attempts {
                tracing::debug!(page, attempts, "no OCR result after retries");
                return Ok(None);
            }

            attempts += 1;
            state.store.insert(page, OcrEntry::InFlight);
            state.recognitions += 1;
            let generation = state.generation;
            drop(state);

            tracing::debug!(page, attempt = attempts, "recognizing page");
            let result = self.recognize_outside_lock(page, generation, ocr_token);

            state = self.lock();
            if state.generation != generation {
                // Cache was cleared while we were recognizing; the result
                // belongs to a document that is gone.
                self.roll_back(&mut state, page);
                return Err(Cancelled);
            }

            match result {
                Ok(Some(payload)) => {
                    let payload = Arc::new(payload);
                    state
                        .store
                        .insert(page, OcrEntry::Ready(Arc::clone(&payload)));
                    self.completed.notify_all();
                    return Ok(Some(payload));
                }
                Ok(None) => {
                    self.roll_back(&mut state, page);
                    if ocr_token.is_cancelled() {
                        return Err(Cancelled);
                    }
                    tracing::debug!(page, attempt = attempts, "empty OCR result; retrying");
                }
                Err(RecognizeError::Cancelled) => {
                    self.roll_back(&mut state, page);
                    return Err(Cancelled);
                }
                Err(RecognizeError::Failed(message)) => {
                    self.roll_back(&mut state, page);
                    tracing::warn!(page, %message, "page recognition failed");
                    return Ok(None);
                }
            }
        }
    }

    /// Ready payload for `page`, never starting a recognition
    pub fn get(&self, page: PageNumber) -> Option<Arc<R::Output>> {
        match self.lock().store.get(page) {
            Some(OcrEntry::Ready(payload)) => Some(Arc::clone(payload)),
            _ => None,
        }
    }

    /// Current state of `page`
    pub fn state(&self, page: PageNumber) -> OcrState {
        match self.lock().store.get(page) {
            None => OcrState::Absent,
            Some(OcrEntry::InFlight) => OcrState::InFlight,
            Some(OcrEntry::Ready(_)) => OcrState::Ready,
        }
    }

    /// Store externally supplied OCR for `page` and wake its waiters
    pub fn insert_ready(&self, page: PageNumber, payload: R::Output) -> Arc<R::Output> {
        let payload = Arc::new(payload);
        let mut state = self.lock();
        state
            .store
            .insert(page, OcrEntry::Ready(Arc::clone(&payload)));
        self.completed.notify_all();
        payload
    }

    /// Forget the ready payload for `page`
    ///
    /// Returns `false` if the page was absent or is being recognized.
    pub fn remove(&self, page: PageNumber) -> bool {
        let mut state = self.lock();
        match state.store.get(page) {
            Some(OcrEntry::Ready(_)) => {
                state.store.remove(page);
                true
            }
            _ => false,
        }
    }

    /// Forget every ready payload
    ///
    /// Recognitions still in flight finish as cancelled and do not publish.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.generation += 1;
        for page in state.store.pages() {
            if matches!(state.store.get(page), Some(OcrEntry::Ready(_))) {
                state.store.remove(page);
            }
        }
    }

    /// Pages with a ready payload, ascending
    pub fn ready_pages(&self) -> Vec<PageNumber> {
        self.ready_entries().into_iter().map(|(page, _)| page).collect()
    }

    /// Ready payloads in page order
    pub fn ready_entries(&self) -> Vec<(PageNumber, Arc<R::Output>)> {
        let state = self.lock();
        state
            .store
            .pages()
            .into_iter()
            .filter_map(|page| match state.store.get(page) {
                Some(OcrEntry::Ready(payload)) => Some((page, Arc::clone(payload))),
                _ => None,
            })
            .collect()
    }

    /// Get cache statistics
    pub fn stats(&self) -> OcrCacheStats {
        let state = self.lock();
        let mut stats = OcrCacheStats {
            recognitions: state.recognitions,
            rollbacks: state.rollbacks,
            ..OcrCacheStats::default()
        };
        for page in state.store.pages() {
            match state.store.get(page) {
                Some(OcrEntry::Ready(_)) => stats.ready += 1,
                Some(OcrEntry::InFlight) => stats.in_flight += 1,
                None => {}
            }
        }
        stats
    }

    fn recognize_outside_lock(
        &self,
        page: PageNumber,
        generation: u64,
        ocr_token: &CancellationToken,
    ) -> Result<Option<R::Output>, RecognizeError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.recognizer.recognize_page(page, ocr_token)
        }));
        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(page, generation, "recognizer panicked");
                Err(RecognizeError::Failed("recognizer panicked".to_string()))
            }
        }
    }

    fn roll_back(&self, state: &mut CacheState<St>, page: PageNumber) {
        if matches!(state.store.get(page), Some(OcrEntry::InFlight)) {
            state.store.remove(page);
            state.rollbacks += 1;
        }
        self.completed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<St>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    /// Counts invocations and answers after a delay
    struct SlowRecognizer {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl SlowRecognizer {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl PageRecognizer for SlowRecognizer {
        type Output = String;

        fn recognize_page(
            &self,
            page: PageNumber,
            _token: &CancellationToken,
        ) -> Result<Option<String>, RecognizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(Some(format!("text of page {}", page)))
        }
    }

    /// First call blocks until its token is cancelled; later calls succeed
    struct CancelFirstRecognizer {
        calls: AtomicUsize,
    }

    impl PageRecognizer for CancelFirstRecognizer {
        type Output = String;

        fn recognize_page(
            &self,
            page: PageNumber,
            token: &CancellationToken,
        ) -> Result<Option<String>, RecognizeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                return Ok(None);
            }
            Ok(Some(format!("page {}", page)))
        }
    }

    struct EmptyRecognizer {
        calls: AtomicUsize,
    }

    impl PageRecognizer for EmptyRecognizer {
        type Output = String;

        fn recognize_page(
            &self,
            _page: PageNumber,
            _token: &CancellationToken,
        ) -> Result<Option<String>, RecognizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct FailingRecognizer;

    impl PageRecognizer for FailingRecognizer {
        type Output = String;

        fn recognize_page(
            &self,
            _page: PageNumber,
            _token: &CancellationToken,
        ) -> Result<Option<String>, RecognizeError> {
            Err(RecognizeError::Failed("engine crashed".to_string()))
        }
    }

    fn config() -> OcrCacheConfig {
        OcrCacheConfig::new().with_wait_poll(Duration::from_millis(2))
    }

    #[test]
    fn test_config_builder() {
        let config = OcrCacheConfig::new()
            .with_max_attempts(0)
            .with_wait_poll(Duration::from_millis(3));
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.wait_poll, Duration::from_millis(3));
        assert_eq!(OcrCacheConfig::default().max_attempts, 3);
    }

    #[test]
    fn test_concurrent_callers_share_one_recognition() {
        let cache = Arc::new(OcrCache::new(
            SlowRecognizer::new(Duration::from_millis(50)),
            config(),
        ));
        let callers = 8;
        let barrier = Arc::new(Barrier::new(callers));

        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let token = CancellationToken::new();
                    barrier.wait();
                    cache.get_or_load(4, &token, &token).unwrap().unwrap()
                })
            })
            .collect();

        let results: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(cache.recognizer().calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
        assert_eq!(results[0].as_str(), "text of page 4");
        assert_eq!(cache.state(4), OcrState::Ready);
    }

    #[test]
    fn test_cancelled_ocr_cancels_waiters_then_single_retry() {
        let cache = Arc::new(OcrCache::new(
            CancelFirstRecognizer {
                calls: AtomicUsize::new(0),
            },
            config(),
        ));
        let ocr_token = CancellationToken::new();

        let producer = {
            let cache = Arc::clone(&cache);
            let ocr_token = ocr_token.clone();
            thread::spawn(move || cache.get_or_load(5, &CancellationToken::new(), &ocr_token))
        };
        while cache.state(5) != OcrState::InFlight {
            thread::sleep(Duration::from_millis(1));
        }
        let waiter = {
            let cache = Arc::clone(&cache);
            let ocr_token = ocr_token.clone();
            thread::spawn(move || cache.get_or_load(5, &CancellationToken::new(), &ocr_token))
        };
        thread::sleep(Duration::from_millis(20));

        ocr_token.cancel();
        assert_eq!(producer.join().unwrap(), Err(Cancelled));
        assert_eq!(waiter.join().unwrap(), Err(Cancelled));
        assert_eq!(cache.state(5), OcrState::Absent);
        assert_eq!(cache.recognizer().calls.load(Ordering::SeqCst), 1);

        let fresh = CancellationToken::new();
        let text = cache.get_or_load(5, &fresh, &fresh).unwrap().unwrap();
        assert_eq!(text.as_str(), "page 5");
        assert_eq!(cache.recognizer().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_waiter_unit_cancel_leaves_producer_running() {
        let cache = Arc::new(OcrCache::new(
            SlowRecognizer::new(Duration::from_millis(80)),
            config(),
        ));

        let producer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let token = CancellationToken::new();
                cache.get_or_load(1, &token, &token)
            })
        };
        while cache.state(1) != OcrState::InFlight {
            thread::sleep(Duration::from_millis(1));
        }

        let unit_token = CancellationToken::new();
        let waiter = {
            let cache = Arc::clone(&cache);
            let unit_token = unit_token.clone();
            thread::spawn(move || cache.get_or_load(1, &unit_token, &CancellationToken::new()))
        };
        unit_token.cancel();

        assert_eq!(waiter.join().unwrap(), Err(Cancelled));
        assert!(producer.join().unwrap().unwrap().is_some());
        assert_eq!(cache.state(1), OcrState::Ready);
        assert_eq!(cache.stats().recognitions, 1);
    }

    #[test]
    fn test_empty_results_retry_is_bounded() {
        let cache = OcrCache::new(
            EmptyRecognizer {
                calls: AtomicUsize::new(0),
            },
            config().with_max_attempts(3),
        );
        let token = CancellationToken::new();

        assert_eq!(cache.get_or_load(2, &token, &token), Ok(None));
        assert_eq!(cache.recognizer().calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.state(2), OcrState::Absent);
        assert_eq!(cache.stats().rollbacks, 3);
    }

    #[test]
    fn test_failure_reverts_to_absent() {
        let cache = OcrCache::new(FailingRecognizer, config());
        let token = CancellationToken::new();

        assert_eq!(cache.get_or_load(7, &token, &token), Ok(None));
        assert_eq!(cache.state(7), OcrState::Absent);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[test]
    fn test_cancelled_unit_never_starts_recognition() {
        let cache = OcrCache::new(SlowRecognizer::new(Duration::ZERO), config());
        let cancelled = CancellationToken::cancelled();

        assert_eq!(
            cache.get_or_load(1, &cancelled, &CancellationToken::new()),
            Err(Cancelled)
        );
        assert_eq!(cache.recognizer().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_insert_ready_and_get() {
        let cache = OcrCache::new(SlowRecognizer::new(Duration::ZERO), config());
        assert!(cache.get(3).is_none());

        cache.insert_ready(3, "supplied".to_string());
        assert_eq!(cache.get(3).unwrap().as_str(), "supplied");

        let token = CancellationToken::new();
        let loaded = cache.get_or_load(3, &token, &token).unwrap().unwrap();
        assert_eq!(loaded.as_str(), "supplied");
        assert_eq!(cache.recognizer().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_discards_in_flight_result() {
        let cache = Arc::new(OcrCache::new(
            SlowRecognizer::new(Duration::from_millis(50)),
            config(),
        ));
        cache.insert_ready(1, "old".to_string());

        let producer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let token = CancellationToken::new();
                cache.get_or_load(2, &token, &token)
            })
        };
        while cache.state(2) != OcrState::InFlight {
            thread::sleep(Duration::from_millis(1));
        }

        cache.clear();
        assert_eq!(cache.state(1), OcrState::Absent);
        assert_eq!(producer.join().unwrap(), Err(Cancelled));
        assert_eq!(cache.state(2), OcrState::Absent);
    }

    #[test]
    fn test_ready_entries_and_remove() {
        let cache = OcrCache::new(SlowRecognizer::new(Duration::ZERO), config());
        cache.insert_ready(3, "c".to_string());
        cache.insert_ready(1, "a".to_string());

        assert_eq!(cache.ready_pages(), vec![1, 3]);
        assert!(cache.remove(1));
        assert!(!cache.remove(1));
        assert_eq!(cache.ready_pages(), vec![3]);
        assert_eq!(cache.stats().ready, 1);
    }
}
