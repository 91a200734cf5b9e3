//! Engine facade
//!
//! [`HighlightEngine`] owns the background worker and the state shared by its
//! units, and turns UI events into scheduled work. Every entry point returns
//! immediately; scheduling a unit cancels the one in progress.

use crate::auto_fit::AutoFitOperation;
use crate::config::EngineConfig;
use crate::highlight::{HighlightId, HighlightMode, HighlightStore};
use crate::host::{DocumentRecognizer, NullProgress, OcrEngine, ProgressSink, ViewerHost};
use crate::lock;
use crate::page_loader::{EngineOcrCache, PageLoader, PageStatus};
use crate::zone::{AngularZone, Point};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zonefit_cache::{share_store, OcrCache, PageKeyedStore, PageStore, SharedPageStore};
use zonefit_scheduler::{
    FailureHandler, ScheduleOptions, UiBridge, WorkContext, WorkError, WorkFailure, WorkUnit,
    Worker, WorkerStats,
};

/// Background word-highlight engine for one open document
pub struct HighlightEngine<H: ViewerHost, E: OcrEngine> {
    worker: Worker<H>,
    ocr: Arc<EngineOcrCache<E>>,
    highlights: Arc<Mutex<HighlightStore>>,
    status: SharedPageStore<PageStatus>,
    line_heights: SharedPageStore<u32>,
    progress: Arc<dyn ProgressSink>,
    published: Arc<AtomicUsize>,
    config: EngineConfig,
}

impl<H: ViewerHost, E: OcrEngine> HighlightEngine<H, E> {
    /// Create an engine for the document at `file`
    ///
    /// Unit failures are shown through [`ViewerHost::show_error`].
    pub fn new(bridge: UiBridge<H>, engine: E, file: impl Into<PathBuf>, config: EngineConfig) -> Self {
        let bridge = bridge.with_poll_interval(config.worker.bridge_poll());
        let worker = Worker::new(bridge, config.worker.worker_config());
        let show_error: FailureHandler<H> =
            Arc::new(|host: &mut H, failure: &WorkFailure| host.show_error(&failure.message));
        worker.set_failure_handler(show_error);

        let recognizer = DocumentRecognizer::new(engine, file, config.ocr.tradeoff);
        let ocr = OcrCache::new(recognizer, config.ocr.cache_config());

        Self {
            worker,
            ocr: Arc::new(ocr),
            highlights: Arc::new(Mutex::new(HighlightStore::new(config.highlight_mode))),
            status: share_store(PageStore::new()),
            line_heights: share_store(PageStore::new()),
            progress: Arc::new(NullProgress),
            published: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Send progress updates to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Keep page statuses in `store`
    pub fn with_status_store(mut self, store: SharedPageStore<PageStatus>) -> Self {
        self.status = store;
        self
    }

    /// Keep average line heights in `store`
    pub fn with_line_height_store(mut self, store: SharedPageStore<u32>) -> Self {
        self.line_heights = store;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn loader(&self) -> PageLoader<E> {
        PageLoader::new(
            Arc::clone(&self.ocr),
            Arc::clone(&self.highlights),
            Arc::clone(&self.status),
            Arc::clone(&self.progress),
            Arc::clone(&self.published),
        )
    }

    fn auto_fit_operation(&self) -> AutoFitOperation<E> {
        AutoFitOperation::new(
            Arc::clone(&self.ocr),
            Arc::clone(&self.line_heights),
            self.config.auto_fit.clone(),
        )
    }

    /// The user moved to `page`: run a loader pass starting there
    pub fn page_changed(&self, page: u32) -> io::Result<()> {
        self.schedule_loader("page-loader", Some(page))
    }

    /// Run a loader pass starting at the host's current page
    pub fn reload(&self) -> io::Result<()> {
        self.schedule_loader("page-loader", None)
    }

    fn schedule_loader(&self, name: &str, start: Option<u32>) -> io::Result<()> {
        let loader = self.loader();
        self.worker.schedule(WorkUnit::new(name, move |ctx: &WorkContext<H>| {
            loader.run(ctx, start)?;
            Ok(())
        }))
    }

    /// Fit a zone under the drag from `start` to `end` (image coordinates)
    ///
    /// The loader pass this interrupts is resumed once the fit is published.
    pub fn auto_fit(&self, start: Point, end: Point) -> io::Result<()> {
        let operation = self.auto_fit_operation();
        let loader = self.loader();
        self.worker.schedule(WorkUnit::new("auto-fit", move |ctx: &WorkContext<H>| {
            operation.run(ctx, start, end)?;
            loader.run(ctx, None)?;
            Ok(())
        }))
    }

    /// [`auto_fit`](Self::auto_fit) for a drag in client coordinates
    ///
    /// Called on the UI thread with the host state at hand.
    pub fn auto_fit_client(&self, host: &H, start: Point, end: Point) -> io::Result<()> {
        self.auto_fit(host.client_to_image(start), host.client_to_image(end))
    }

    /// Drop the highlights of `page` and rebuild them in a new loader pass
    ///
    /// Returns how many highlights were dropped.
    pub fn invalidate_page(&self, page: u32) -> io::Result<usize> {
        let dropped = lock(&self.highlights).invalidate_page(page);
        lock(&self.status).insert(page, PageStatus::Pending);
        tracing::debug!(page, dropped, "page highlights invalidated");
        self.reload()?;
        Ok(dropped)
    }

    /// Switch highlight mode; existing highlights are rebuilt when it changes
    pub fn set_highlight_mode(&self, mode: HighlightMode) -> io::Result<()> {
        let changed = {
            let mut store = lock(&self.highlights);
            let changed = store.mode() != mode;
            store.set_mode(mode);
            changed
        };
        if changed {
            self.reload()?;
        }
        Ok(())
    }

    /// Tear down for document close
    ///
    /// Cancels the running unit together with any OCR it started, waits up to
    /// `timeout` for the worker to go idle, then drops all per-document state.
    /// Returns `false` if the worker was still busy when the timeout expired.
    pub fn close_document(&self, timeout: Duration) -> bool {
        self.worker.cancel(ScheduleOptions { cancel_ocr: true });
        let idle = self.worker.wait_idle(timeout);
        if !idle {
            tracing::warn!(?timeout, "worker still busy at document close");
        }

        lock(&self.highlights).clear();
        lock(&self.status).clear();
        lock(&self.line_heights).clear();
        self.ocr.clear();
        self.published.store(0, Ordering::Release);
        idle
    }

    /// Load status of `page`
    pub fn page_status(&self, page: u32) -> PageStatus {
        lock(&self.status).get(page).copied().unwrap_or_default()
    }

    /// Zones covering the selected highlights, one per run of adjacent words
    /// on the same line
    pub fn merge_selected(&self, ids: &[HighlightId]) -> Vec<AngularZone> {
        lock(&self.highlights).merge_selected(ids)
    }

    /// Text of the selected highlights; empty in redaction mode
    pub fn selected_text(&self, ids: &[HighlightId]) -> String {
        lock(&self.highlights).selected_text(ids)
    }

    /// Shared highlight store
    pub fn highlights(&self) -> &Arc<Mutex<HighlightStore>> {
        &self.highlights
    }

    /// Shared OCR cache
    pub fn ocr_cache(&self) -> &Arc<EngineOcrCache<E>> {
        &self.ocr
    }

    pub fn worker(&self) -> &Worker<H> {
        &self.worker
    }

    pub fn is_idle(&self) -> bool {
        self.worker.is_idle()
    }

    /// Block until no unit is running or pending
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.worker.wait_idle(timeout)
    }

    pub fn stats(&self) -> WorkerStats {
        self.worker.stats()
    }

    /// Stop the worker and join its thread
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }

    /// Run an arbitrary unit on the engine's worker
    pub fn schedule<F>(&self, name: &str, run: F) -> io::Result<()>
    where
        F: FnOnce(&WorkContext<H>) -> Result<(), WorkError> + Send + 'static,
    {
        self.worker.schedule(WorkUnit::new(name, run))
    }
}
