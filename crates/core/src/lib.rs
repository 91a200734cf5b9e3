//! Zonefit Core Library
//!
//! Background word-highlight engine for scanned documents.
//!
//! For every page of an open document the engine obtains recognized text
//! (from a supplied OCR result or an external OCR engine), turns each word
//! into a highlight zone, and shows the zones of the page being viewed. On a
//! drag gesture it fits a rotated zone to the ink of the text line under the
//! drag. All of this runs on a single cancellable background worker that
//! talks to the UI-owned viewer state through a bridge.
//!
//! # Example
//!
//! ```
//! use zonefit_core::{AngularZone, Point, Rect};
//!
//! let zone = AngularZone::new(Point::new(10, 20), Point::new(59, 20), 11, 1);
//! assert_eq!(zone.bounds(), Rect::new(10, 15, 59, 25));
//! assert!(zone.contains(Point::new(30, 24)));
//! ```

pub mod auto_fit;
pub mod config;
pub mod engine;
pub mod error;
pub mod highlight;
pub mod host;
pub mod page_loader;
pub mod probe;
pub mod text;
pub mod zone;

pub use auto_fit::{AutoFitConfig, AutoFitOperation, AutoFitOutcome};
pub use config::{EngineConfig, OcrSettings, WorkerSettings};
pub use engine::HighlightEngine;
pub use error::{ConfigError, EngineError, OcrError};
pub use highlight::{line_id, HighlightId, HighlightMode, HighlightStore, PageBuild, WordHighlight};
pub use host::{
    DocumentRecognizer, NullProgress, OcrEngine, OcrTradeoff, ProgressScope, ProgressSink,
    RecognizeRequest, ViewerHost,
};
pub use page_loader::{ring_order, EngineOcrCache, LoadOutcome, PageLoader, PageStatus};
pub use probe::{fit_edge, Bitmap, EdgeFitParams, EdgeFitter, PixelProbe, Side};
pub use text::{DocumentText, OcrWord, SpatialText, TextLine};
pub use zone::{merge_zones, AngularZone, Point, PointF, Rect};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `mutex`, recovering the data if a panicking unit poisoned it
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
