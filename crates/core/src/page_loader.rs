//! Page loader
//!
//! One loader pass walks the document in ring order starting at the page the
//! user is looking at, obtains OCR for every page, builds its word
//! highlights, and shows them only for the start page. Highlights for every
//! other page stay in the store and are taken out of the live layer, so the
//! UI never carries more than one page's worth.

use crate::error::EngineError;
use crate::highlight::{HighlightStore, WordHighlight};
use crate::host::{DocumentRecognizer, OcrEngine, ProgressScope, ProgressSink, ViewerHost};
use crate::lock;
use crate::text::{DocumentText, SpatialText};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zonefit_cache::{OcrCache, PageKeyedStore, SharedPageStore};
use zonefit_scheduler::WorkContext;

/// OCR cache specialized for the engine's recognizer
pub type EngineOcrCache<E> = OcrCache<DocumentRecognizer<E>>;

/// Load status of one page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageStatus {
    /// Not visited yet
    #[default]
    Pending,
    /// OCR or highlight construction in progress
    Loading,
    /// OCR available
    Ready { words: usize },
    /// No OCR could be obtained
    Unavailable,
}

/// Pages in visiting order: `start` first, wrapping after the last page
///
/// `start` is clamped into the document. Every page appears exactly once.
///
/// # Example
///
/// ```
/// use zonefit_core::ring_order;
///
/// assert_eq!(ring_order(2, 3), vec![2, 3, 1]);
/// assert_eq!(ring_order(9, 2), vec![2, 1]);
/// assert!(ring_order(1, 0).is_empty());
/// ```
pub fn ring_order(start: u32, page_count: u32) -> Vec<u32> {
    if page_count == 0 {
        return Vec::new();
    }
    let start = start.clamp(1, page_count);
    (0..page_count)
        .map(|offset| (start - 1 + offset) % page_count + 1)
        .collect()
}

/// Summary of one loader pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Pages in the order they were visited
    pub visited: Vec<u32>,

    /// Pages with OCR
    pub ready: Vec<u32>,

    /// Pages without OCR
    pub unavailable: Vec<u32>,

    /// No page had OCR and automatic OCR is off
    pub ocr_unavailable: bool,

    /// A whole-document OCR result was handed to the host during this pass
    pub published_document: bool,
}

/// Values read from the UI once per pass
struct HostSnapshot {
    current_page: u32,
    page_count: u32,
    auto_ocr: bool,
    highlighting: bool,
    external: Option<Arc<DocumentText>>,
}

impl HostSnapshot {
    fn capture<H: ViewerHost>(host: &H) -> Self {
        Self {
            current_page: host.current_page(),
            page_count: host.page_count(),
            auto_ocr: host.auto_ocr_enabled(),
            highlighting: host.highlighting_enabled(),
            external: host.external_ocr(),
        }
    }
}

/// Runs loader passes on the worker
pub struct PageLoader<E: OcrEngine> {
    ocr: Arc<EngineOcrCache<E>>,
    highlights: Arc<Mutex<HighlightStore>>,
    status: SharedPageStore<PageStatus>,
    progress: Arc<dyn ProgressSink>,
    /// Page count of the document OCR last handed to the host
    published: Arc<AtomicUsize>,
}

impl<E: OcrEngine> Clone for PageLoader<E> {
    fn clone(&self) -> Self {
        Self {
            ocr: Arc::clone(&self.ocr),
            highlights: Arc::clone(&self.highlights),
            status: Arc::clone(&self.status),
            progress: Arc::clone(&self.progress),
            published: Arc::clone(&self.published),
        }
    }
}

impl<E: OcrEngine> PageLoader<E> {
    /// Create a loader over shared engine state
    ///
    /// `published` counts the pages of the document OCR already handed to
    /// the host; a pass only publishes again once more pages are ready.
    /// Reset it to zero when the document changes.
    pub fn new(
        ocr: Arc<EngineOcrCache<E>>,
        highlights: Arc<Mutex<HighlightStore>>,
        status: SharedPageStore<PageStatus>,
        progress: Arc<dyn ProgressSink>,
        published: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            ocr,
            highlights,
            status,
            progress,
            published,
        }
    }

    /// Status of `page`
    pub fn status(&self, page: u32) -> PageStatus {
        lock(&self.status).get(page).copied().unwrap_or_default()
    }

    /// Run one pass, starting at `start` or at the host's current page
    ///
    /// Pages without OCR are marked unavailable and skipped; that is never an
    /// error. Fails with [`EngineError::CorruptOcrWord`] on malformed OCR. A
    /// page the pass stops on goes back to [`PageStatus::Pending`].
    pub fn run<H: ViewerHost>(
        &self,
        ctx: &WorkContext<H>,
        start: Option<u32>,
    ) -> Result<LoadOutcome, EngineError> {
        ctx.check()?;
        let snapshot = ctx.run_on_ui(|host: &mut H| HostSnapshot::capture(host))?;
        let mut outcome = LoadOutcome::default();
        if snapshot.page_count == 0 {
            return Ok(outcome);
        }

        if let Some(external) = &snapshot.external {
            for text in external.pages.values() {
                if self.ocr.get(text.page).is_none() {
                    self.ocr.insert_ready(text.page, text.clone());
                }
            }
        }

        let order = ring_order(start.unwrap_or(snapshot.current_page), snapshot.page_count);
        let start = order[0];
        let total = order.len();
        tracing::debug!(start, pages = total, auto_ocr = snapshot.auto_ocr, "loader pass started");

        for (done, page) in order.iter().copied().enumerate() {
            ctx.check()?;
            self.set_status(page, PageStatus::Loading);

            let text = match self.load_page(ctx, &snapshot, page, page == start) {
                Ok(text) => text,
                Err(error) => {
                    self.set_status(page, PageStatus::Pending);
                    return Err(error);
                }
            };

            match text {
                Some(text) => {
                    self.set_status(page, PageStatus::Ready { words: text.word_count() });
                    self.progress
                        .report(ProgressScope::Page(page), "Text recognized", 1.0);
                    outcome.ready.push(page);
                }
                None => {
                    self.set_status(page, PageStatus::Unavailable);
                    self.progress
                        .report(ProgressScope::Page(page), "No text available", 1.0);
                    outcome.unavailable.push(page);
                }
            }

            outcome.visited.push(page);
            self.progress.report(
                ProgressScope::Global,
                &format!("Loaded {} of {} pages", done + 1, total),
                (done + 1) as f32 / total as f32,
            );
        }

        if outcome.ready.is_empty() && !snapshot.auto_ocr {
            self.progress
                .report(ProgressScope::Global, "OCR unavailable", 1.0);
            outcome.ocr_unavailable = true;
            return Ok(outcome);
        }

        if snapshot.external.is_none() && !outcome.ready.is_empty() {
            outcome.published_document = self.publish_document(ctx)?;
        }

        tracing::debug!(
            ready = outcome.ready.len(),
            unavailable = outcome.unavailable.len(),
            "loader pass finished"
        );
        Ok(outcome)
    }

    /// Obtain OCR for `page` and, if highlighting is on, show or hide its highlights
    fn load_page<H: ViewerHost>(
        &self,
        ctx: &WorkContext<H>,
        snapshot: &HostSnapshot,
        page: u32,
        is_start: bool,
    ) -> Result<Option<Arc<SpatialText>>, EngineError> {
        let text = if snapshot.auto_ocr {
            self.ocr.get_or_load(page, ctx.token(), ctx.ocr_token())?
        } else {
            self.ocr.get(page)
        };

        if let Some(text) = &text {
            if snapshot.highlighting {
                self.show_page(ctx, text, is_start)?;
            }
        }
        Ok(text)
    }

    /// Hand the host every ready page unless it already has them all
    fn publish_document<H: ViewerHost>(&self, ctx: &WorkContext<H>) -> Result<bool, EngineError> {
        let entries = self.ocr.ready_entries();
        let pages = entries.len();
        if pages <= self.published.load(Ordering::Acquire) {
            return Ok(false);
        }

        let document = DocumentText::from_pages(
            entries
                .into_iter()
                .map(|(_, text)| SpatialText::clone(&text)),
        );
        ctx.run_on_ui(move |host: &mut H| host.publish_document_ocr(document))?;
        self.published.store(pages, Ordering::Release);
        tracing::debug!(pages, "document OCR published");
        Ok(true)
    }

    /// Build the page's highlights and show or hide them
    ///
    /// The highlight store is only locked to start and to commit the build.
    fn show_page<H: ViewerHost>(
        &self,
        ctx: &WorkContext<H>,
        text: &SpatialText,
        is_start: bool,
    ) -> Result<(), EngineError> {
        let page = text.page;
        let mut build = lock(&self.highlights).begin_page(page);
        let built = build.run(text, ctx.token());
        let highlights: Vec<WordHighlight> = lock(&self.highlights).commit(build);
        built?;

        if is_start {
            ctx.run_on_ui(move |host: &mut H| {
                host.remove_highlights(page);
                host.add_highlights(page, &highlights);
                host.invalidate(None);
            })?;
        } else {
            ctx.run_on_ui(move |host: &mut H| host.remove_highlights(page))?;
        }
        Ok(())
    }

    fn set_status(&self, page: u32, status: PageStatus) {
        lock(&self.status).insert(page, status);
    }
}
