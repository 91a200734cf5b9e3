//! Zonefit Cache Library
//!
//! Page-keyed stores and the OCR cache that coordinates recognition so that
//! each page is recognized by at most one producer at a time.

mod ocr;
mod store;

pub use ocr::{
    OcrCache, OcrCacheConfig, OcrCacheStats, OcrEntry, OcrState, PageRecognizer, RecognizeError,
};
pub use store::{share_store, PageKeyedStore, PageNumber, PageStore, SharedPageStore};
