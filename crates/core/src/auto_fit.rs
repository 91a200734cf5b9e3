//! Auto-fit: size a zone to the ink under a drag gesture
//!
//! The fit starts from a one-pixel seed along the drag line. The top and
//! bottom grow (fuzzily) to the edges of the text line, bounded by a multiple
//! of the page's average line height; then the ends are tightened exactly.

use crate::error::EngineError;
use crate::host::{OcrEngine, ViewerHost};
use crate::lock;
use crate::page_loader::EngineOcrCache;
use crate::probe::{EdgeFitParams, EdgeFitter, PixelProbe, Side};
use crate::zone::{AngularZone, Point, Rect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zonefit_cache::{PageKeyedStore, SharedPageStore};
use zonefit_scheduler::{CancellationToken, Cancelled, WorkContext};

/// Auto-fit tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFitConfig {
    /// Pixels added on every side of a fitted zone
    pub padding: i32,

    /// Floor for the average line height, in pixels
    pub min_line_height: u32,

    /// Tallest zone, as a multiple of the average line height
    pub max_height_factor: f64,

    /// Fuzzy-edge search buffer, as a multiple of the average line height
    pub fuzzy_buffer_factor: f64,

    /// Ink fraction below which a row counts as a fuzzy edge
    pub fuzzy_tolerance: f64,

    /// Shortest fitted height that is accepted
    pub min_splittable_height: u32,
}

impl Default for AutoFitConfig {
    fn default() -> Self {
        Self {
            padding: 2,
            min_line_height: 30,
            max_height_factor: 5.0,
            fuzzy_buffer_factor: 0.5,
            fuzzy_tolerance: 0.05,
            min_splittable_height: 4,
        }
    }
}

impl AutoFitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the padding added around fitted zones
    pub fn with_padding(mut self, padding: i32) -> Self {
        self.padding = padding;
        self
    }

    /// Set the line height floor
    pub fn with_min_line_height(mut self, height: u32) -> Self {
        self.min_line_height = height.max(1);
        self
    }

    /// Set the fuzzy-edge tolerance
    pub fn with_fuzzy_tolerance(mut self, tolerance: f64) -> Self {
        self.fuzzy_tolerance = tolerance;
        self
    }

    /// Set the minimum accepted height
    pub fn with_min_splittable_height(mut self, height: u32) -> Self {
        self.min_splittable_height = height;
        self
    }
}

/// Result of one auto-fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFitOutcome {
    /// A zone was fitted and published as the current candidate
    Fitted(AngularZone),
    /// A zone was fitted but the gesture had already ended
    GestureEnded,
    /// No fit; the previous candidate no longer lies on the drag line
    Retracted,
    /// No fit; the previous candidate still lies on the drag line
    Kept,
    /// No fit and no previous candidate
    NoFit,
}

/// Runs auto-fits on the worker
pub struct AutoFitOperation<E: OcrEngine> {
    ocr: Arc<EngineOcrCache<E>>,
    line_heights: SharedPageStore<u32>,
    config: AutoFitConfig,
}

impl<E: OcrEngine> Clone for AutoFitOperation<E> {
    fn clone(&self) -> Self {
        Self {
            ocr: Arc::clone(&self.ocr),
            line_heights: Arc::clone(&self.line_heights),
            config: self.config.clone(),
        }
    }
}

impl<E: OcrEngine> AutoFitOperation<E> {
    pub fn new(
        ocr: Arc<EngineOcrCache<E>>,
        line_heights: SharedPageStore<u32>,
        config: AutoFitConfig,
    ) -> Self {
        Self {
            ocr,
            line_heights,
            config,
        }
    }

    pub fn config(&self) -> &AutoFitConfig {
        &self.config
    }

    /// Average line height of `page`, never below the configured floor
    ///
    /// Computed from the page's OCR when it is ready and cached from then on;
    /// pages without OCR get the floor and are asked again next time.
    pub fn line_height(&self, page: u32) -> u32 {
        let floor = self.config.min_line_height.max(1);
        let mut heights = lock(&self.line_heights);
        if let Some(height) = heights.get(page) {
            return *height;
        }

        match self.ocr.get(page).and_then(|text| text.average_line_height()) {
            Some(average) => {
                let height = (average.round() as u32).max(floor);
                heights.insert(page, height);
                height
            }
            None => floor,
        }
    }

    /// Fit a zone to the ink under the drag from `start` to `end` (image
    /// coordinates) and publish it, or retract the stale candidate
    pub fn run<H: ViewerHost>(
        &self,
        ctx: &WorkContext<H>,
        start: Point,
        end: Point,
    ) -> Result<AutoFitOutcome, EngineError> {
        ctx.check()?;
        let (page, sampler) = ctx.run_on_ui(|host: &mut H| {
            let page = host.current_page();
            (page, host.sampler(page))
        })?;

        let fitted = match sampler {
            Some(sampler) => {
                let seed = AngularZone::new(start, end, 1, page);
                self.fit(&seed, sampler.as_ref(), ctx.token())?
            }
            None => None,
        };

        let outcome = match fitted {
            Some(zone) => {
                let zone = zone.inflated(self.config.padding);
                ctx.run_on_ui(move |host: &mut H| publish(host, zone))?
            }
            None => ctx.run_on_ui(move |host: &mut H| retract_if_off_line(host, start, end))?,
        };
        tracing::debug!(page, ?outcome, "auto-fit finished");
        Ok(outcome)
    }

    /// Fit `seed` against `probe`; `None` if no acceptable zone was found
    pub fn fit(
        &self,
        seed: &AngularZone,
        probe: &dyn PixelProbe,
        token: &CancellationToken,
    ) -> Result<Option<AngularZone>, Cancelled> {
        token.check()?;
        let line_height = self.line_height(seed.page) as f64;
        let max_height = (line_height * self.config.max_height_factor).round() as u32;
        let buffer = (line_height * self.config.fuzzy_buffer_factor).round() as u32;

        let mut fitter = EdgeFitter::new(seed, probe);
        let vertical = EdgeFitParams::exact(1, max_height)
            .with_fuzzy(self.config.fuzzy_tolerance, buffer);
        if !fitter.fit(Side::Top, &vertical, token)? || !fitter.fit(Side::Bottom, &vertical, token)? {
            return Ok(None);
        }
        if fitter.height() < self.config.min_splittable_height {
            return Ok(None);
        }

        // Ends that find no edge keep the drag's extent.
        let horizontal = EdgeFitParams::exact(1, probe.width().saturating_add(probe.height()));
        fitter.fit(Side::Left, &horizontal, token)?;
        fitter.fit(Side::Right, &horizontal, token)?;
        Ok(Some(fitter.zone()))
    }
}

fn publish<H: ViewerHost>(host: &mut H, zone: AngularZone) -> AutoFitOutcome {
    if !host.gesture_active() {
        return AutoFitOutcome::GestureEnded;
    }
    let dirty = match host.auto_fit_result() {
        Some(previous) => previous.bounds().union(&zone.bounds()),
        None => zone.bounds(),
    };
    host.set_auto_fit_result(Some(zone));
    let region = client_rect(host, dirty);
    host.invalidate(Some(region));
    AutoFitOutcome::Fitted(zone)
}

fn retract_if_off_line<H: ViewerHost>(host: &mut H, start: Point, end: Point) -> AutoFitOutcome {
    match host.auto_fit_result() {
        Some(previous) if !previous.intersects_segment(start, end) => {
            host.set_auto_fit_result(None);
            let region = client_rect(host, previous.bounds());
            host.invalidate(Some(region));
            AutoFitOutcome::Retracted
        }
        Some(_) => AutoFitOutcome::Kept,
        None => AutoFitOutcome::NoFit,
    }
}

fn client_rect<H: ViewerHost>(host: &H, rect: Rect) -> Rect {
    let top_left = host.image_to_client(Point::new(rect.left, rect.top));
    let bottom_right = host.image_to_client(Point::new(rect.right, rect.bottom));
    Rect::from_points(top_left, bottom_right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::host::{DocumentRecognizer, OcrTradeoff, RecognizeRequest};
    use crate::probe::Bitmap;
    use crate::text::{OcrWord, SpatialText, TextLine};
    use zonefit_cache::{share_store, OcrCache, OcrCacheConfig, PageStore};

    struct NoOcr;

    impl OcrEngine for NoOcr {
        fn recognize(
            &self,
            _request: &RecognizeRequest,
            _token: &CancellationToken,
        ) -> Result<Option<SpatialText>, OcrError> {
            Ok(None)
        }
    }

    fn operation(config: AutoFitConfig) -> AutoFitOperation<NoOcr> {
        let cache = OcrCache::new(
            DocumentRecognizer::new(NoOcr, "doc.pdf", OcrTradeoff::Balanced),
            OcrCacheConfig::default(),
        );
        AutoFitOperation::new(Arc::new(cache), share_store(PageStore::new()), config)
    }

    fn block() -> Bitmap {
        let mut bitmap = Bitmap::new(300, 200);
        bitmap.fill(Rect::new(100, 50, 199, 79));
        bitmap
    }

    #[test]
    fn test_fit_solid_block() {
        let op = operation(AutoFitConfig::default());
        let seed = AngularZone::new(Point::new(120, 65), Point::new(180, 65), 1, 1);

        let zone = op.fit(&seed, &block(), &CancellationToken::new()).unwrap().unwrap();
        assert_eq!(zone.bounds(), Rect::new(100, 50, 199, 79));
    }

    #[test]
    fn test_fit_rejects_short_zone() {
        let mut bitmap = Bitmap::new(100, 100);
        bitmap.fill(Rect::new(10, 50, 90, 51));
        let op = operation(AutoFitConfig::default());
        let seed = AngularZone::new(Point::new(20, 50), Point::new(80, 50), 1, 1);

        assert_eq!(op.fit(&seed, &bitmap, &CancellationToken::new()), Ok(None));
        let op = operation(AutoFitConfig::default().with_min_splittable_height(2));
        assert!(op.fit(&seed, &bitmap, &CancellationToken::new()).unwrap().is_some());
    }

    #[test]
    fn test_fit_rejects_too_tall_ink() {
        let mut bitmap = Bitmap::new(100, 400);
        bitmap.fill(Rect::new(10, 0, 90, 399));
        let op = operation(AutoFitConfig::default());
        let seed = AngularZone::new(Point::new(20, 200), Point::new(80, 200), 1, 1);

        // 5 × 30 px is less than the 400 px column of ink
        assert_eq!(op.fit(&seed, &bitmap, &CancellationToken::new()), Ok(None));
    }

    #[test]
    fn test_fit_checks_cancellation_first() {
        let op = operation(AutoFitConfig::default());
        let seed = AngularZone::new(Point::new(120, 65), Point::new(180, 65), 1, 1);
        assert_eq!(op.fit(&seed, &block(), &CancellationToken::cancelled()), Err(Cancelled));
    }

    #[test]
    fn test_line_height_floor_and_cache() {
        let op = operation(AutoFitConfig::default());
        assert_eq!(op.line_height(1), 30);
        assert!(lock(&op.line_heights).get(1).is_none());

        let zone = AngularZone::new(Point::new(0, 100), Point::new(50, 100), 60, 2);
        op.ocr.insert_ready(
            2,
            SpatialText::new(2).with_line(TextLine::new(vec![OcrWord::new("tall", zone)])),
        );
        assert_eq!(op.line_height(2), 60);
        assert_eq!(lock(&op.line_heights).get(2), Some(&60));
    }

    #[test]
    fn test_clones_share_line_height_cache() {
        let op = operation(AutoFitConfig::default());
        let clone = op.clone();

        let zone = AngularZone::new(Point::new(0, 100), Point::new(50, 100), 44, 3);
        op.ocr.insert_ready(
            3,
            SpatialText::new(3).with_line(TextLine::new(vec![OcrWord::new("word", zone)])),
        );
        assert_eq!(clone.line_height(3), 44);
        assert_eq!(lock(&op.line_heights).get(3), Some(&44));
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: AutoFitConfig = serde_json::from_str(r#"{"padding": 4}"#).unwrap();
        assert_eq!(config.padding, 4);
        assert_eq!(config.min_line_height, 30);
        assert_eq!(config.fuzzy_tolerance, 0.05);
    }
}
