//! Collaborators supplied by the host application
//!
//! The engine never owns the viewer, the OCR engine, or the status display.
//! The host implements these traits; [`ViewerHost`] is implemented by the
//! UI-owned state and is only ever touched on the UI thread, through the
//! bridge.

use crate::error::OcrError;
use crate::highlight::WordHighlight;
use crate::probe::PixelProbe;
use crate::text::{DocumentText, SpatialText};
use crate::zone::{AngularZone, Point, Rect};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use zonefit_cache::{PageNumber, PageRecognizer, RecognizeError};
use zonefit_scheduler::CancellationToken;

/// UI-owned viewer state
pub trait ViewerHost: Send + 'static {
    /// Page currently shown, 1-based
    fn current_page(&self) -> u32;

    /// Number of pages in the document
    fn page_count(&self) -> u32;

    /// Whether pages without OCR should be recognized automatically
    fn auto_ocr_enabled(&self) -> bool;

    /// Whether word highlights should be built and shown
    fn highlighting_enabled(&self) -> bool;

    /// A fresh pixel sampler for `page`
    fn sampler(&self, page: u32) -> Option<Arc<dyn PixelProbe>>;

    /// Image pixel to client (screen) coordinates
    fn image_to_client(&self, point: Point) -> Point;

    /// Client (screen) to image pixel coordinates
    fn client_to_image(&self, point: Point) -> Point;

    /// Insert highlights into the live layer of `page`
    fn add_highlights(&mut self, page: u32, highlights: &[WordHighlight]);

    /// Remove every engine-built highlight from the live layer of `page`
    fn remove_highlights(&mut self, page: u32);

    /// Redraw `region` (client coordinates), or everything for `None`
    fn invalidate(&mut self, region: Option<Rect>);

    /// Whether the drag gesture that started an auto-fit is still in progress
    fn gesture_active(&self) -> bool;

    /// The auto-fit candidate currently shown, if any
    fn auto_fit_result(&self) -> Option<AngularZone>;

    /// Replace the auto-fit candidate
    ///
    /// The host keeps the candidate in the live layer while it is set and
    /// removes it when it is replaced or cleared.
    fn set_auto_fit_result(&mut self, zone: Option<AngularZone>);

    /// OCR supplied with the document, if any
    fn external_ocr(&self) -> Option<Arc<DocumentText>>;

    /// Receive the whole-document OCR assembled after a full pass
    fn publish_document_ocr(&mut self, text: DocumentText);

    /// Show an error to the user
    fn show_error(&mut self, message: &str);
}

/// Speed/accuracy tradeoff requested from the OCR engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrTradeoff {
    Fast,
    #[default]
    Balanced,
    Accurate,
}

impl std::str::FromStr for OcrTradeoff {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(OcrTradeoff::Fast),
            "balanced" => Ok(OcrTradeoff::Balanced),
            "accurate" => Ok(OcrTradeoff::Accurate),
            _ => Err(()),
        }
    }
}

/// One page recognition request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizeRequest {
    /// Document file
    pub file: PathBuf,

    /// Page number, 1-based
    pub page: u32,

    pub tradeoff: OcrTradeoff,
}

/// External OCR engine
///
/// Recognition may be slow. Implementations poll `token` and may return
/// `Ok(None)` when cancelled.
pub trait OcrEngine: Send + Sync + 'static {
    fn recognize(
        &self,
        request: &RecognizeRequest,
        token: &CancellationToken,
    ) -> Result<Option<SpatialText>, OcrError>;
}

/// What a progress update refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressScope {
    Page(u32),
    Global,
}

/// Receives status updates for display
pub trait ProgressSink: Send + Sync {
    /// `fraction` is in 0.0..=1.0
    fn report(&self, scope: ProgressScope, message: &str, fraction: f32);
}

/// Progress sink that drops every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _scope: ProgressScope, _message: &str, _fraction: f32) {}
}

/// Adapts an [`OcrEngine`] to the page cache for one document
pub struct DocumentRecognizer<E> {
    engine: E,
    file: PathBuf,
    tradeoff: OcrTradeoff,
}

impl<E: OcrEngine> DocumentRecognizer<E> {
    /// Recognize pages of `file` with `engine`
    pub fn new(engine: E, file: impl Into<PathBuf>, tradeoff: OcrTradeoff) -> Self {
        Self {
            engine,
            file: file.into(),
            tradeoff,
        }
    }

    /// The wrapped engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The document being recognized
    pub fn file(&self) -> &PathBuf {
        &self.file
    }
}

impl<E: OcrEngine> PageRecognizer for DocumentRecognizer<E> {
    type Output = SpatialText;

    fn recognize_page(
        &self,
        page: PageNumber,
        token: &CancellationToken,
    ) -> Result<Option<SpatialText>, RecognizeError> {
        let request = RecognizeRequest {
            file: self.file.clone(),
            page,
            tradeoff: self.tradeoff,
        };
        match self.engine.recognize(&request, token) {
            Ok(text) => Ok(text.filter(|text| !text.is_empty())),
            Err(OcrError::Cancelled) => Err(RecognizeError::Cancelled),
            Err(error) => Err(RecognizeError::Failed(error.to_string())),
        }
    }
}
