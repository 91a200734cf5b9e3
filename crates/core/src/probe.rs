//! Pixel probe and edge fitter
//!
//! The edge fitter moves one side of an [`AngularZone`] to the boundary of
//! the ink underneath it. It works in the zone's local frame: `a` runs along
//! start→end and `b` across it, both in whole pixels. Each row (or column)
//! is sampled at nearest-pixel positions, and ink fractions are compared in
//! integer per-mille so identical input always yields the identical edge.

use crate::error::EngineError;
use crate::zone::{AngularZone, Point, PointF, Rect};
use zonefit_scheduler::{CancellationToken, Cancelled};

/// Ink queries over a page image
pub trait PixelProbe: Send + Sync {
    /// Image width in pixels
    fn width(&self) -> u32;

    /// Image height in pixels
    fn height(&self) -> u32;

    /// Whether the pixel at (x, y) is ink; coordinates are in range
    fn is_ink(&self, x: u32, y: u32) -> bool;

    /// Whether `point` is ink; pixels outside the image are background
    fn ink_at(&self, point: Point) -> bool {
        point.x >= 0
            && point.y >= 0
            && (point.x as u32) < self.width()
            && (point.y as u32) < self.height()
            && self.is_ink(point.x as u32, point.y as u32)
    }

    /// Number of ink pixels inside `rect`
    fn ink_count(&self, rect: Rect) -> u64 {
        let Some(rect) = rect.clamp_to(self.width(), self.height()) else {
            return 0;
        };
        let mut count = 0;
        for y in rect.top..=rect.bottom {
            for x in rect.left..=rect.right {
                if self.is_ink(x as u32, y as u32) {
                    count += 1;
                }
            }
        }
        count
    }
}

/// In-memory grayscale page image
///
/// Pixels darker than the threshold are ink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    luma: Vec<u8>,
    threshold: u8,
}

impl Bitmap {
    /// Create an all-white bitmap
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            luma: vec![u8::MAX; width as usize * height as usize],
            threshold: 128,
        }
    }

    /// Wrap row-major 8-bit luminance data
    pub fn from_luma(width: u32, height: u32, luma: Vec<u8>) -> Result<Self, EngineError> {
        let expected = width as usize * height as usize;
        if luma.len() != expected {
            return Err(EngineError::InvalidBitmap {
                expected,
                actual: luma.len(),
            });
        }
        Ok(Self {
            width,
            height,
            luma,
            threshold: 128,
        })
    }

    /// Set the ink threshold
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set one pixel's luminance; out-of-range writes are ignored
    pub fn set_luma(&mut self, x: u32, y: u32, value: u8) {
        if x < self.width && y < self.height {
            self.luma[(y * self.width + x) as usize] = value;
        }
    }

    /// Paint one pixel black
    pub fn set_ink(&mut self, x: u32, y: u32) {
        self.set_luma(x, y, 0);
    }

    /// Paint a rectangle black
    pub fn fill(&mut self, rect: Rect) {
        let Some(rect) = rect.clamp_to(self.width, self.height) else {
            return;
        };
        for y in rect.top..=rect.bottom {
            for x in rect.left..=rect.right {
                self.set_ink(x as u32, y as u32);
            }
        }
    }
}

impl PixelProbe for Bitmap {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn is_ink(&self, x: u32, y: u32) -> bool {
        self.luma[(y * self.width + x) as usize] < self.threshold
    }
}

/// Side of a zone, in the zone's own orientation
///
/// For a left-to-right zone these match the screen directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Top,
    Bottom,
    /// The `start` end
    Left,
    /// The `end` end
    Right,
}

/// Parameters for one edge fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeFitParams {
    /// Ink fraction below which a row is accepted as a tentative edge;
    /// `None` fits exactly
    pub fuzzy_tolerance: Option<f64>,

    /// Rows scanned past a tentative edge looking for a true background row
    pub fuzzy_buffer: u32,

    /// Smallest extent perpendicular to the side that a shrink may leave
    pub min_extent: u32,

    /// Largest extent perpendicular to the side that a grow may reach
    pub max_extent: u32,
}

impl Default for EdgeFitParams {
    fn default() -> Self {
        Self::exact(1, u32::MAX)
    }
}

impl EdgeFitParams {
    /// Exact fit between `min_extent` and `max_extent`
    pub fn exact(min_extent: u32, max_extent: u32) -> Self {
        Self {
            fuzzy_tolerance: None,
            fuzzy_buffer: 0,
            min_extent: min_extent.max(1),
            max_extent,
        }
    }

    /// Accept fuzzy edges below `tolerance`, searching `buffer` rows further
    pub fn with_fuzzy(mut self, tolerance: f64, buffer: u32) -> Self {
        self.fuzzy_tolerance = Some(tolerance);
        self.fuzzy_buffer = buffer;
        self
    }

    fn tolerance_permille(&self) -> Option<u64> {
        self.fuzzy_tolerance
            .map(|tolerance| (tolerance.clamp(0.0, 1.0) * 1000.0).round() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowClass {
    Background,
    Faint,
    Ink,
}

/// Fits the sides of one zone against a probe
///
/// Fitting several sides in a row through the same fitter keeps sub-pixel
/// positions exact until [`EdgeFitter::zone`] converts back.
pub struct EdgeFitter<'a, P: PixelProbe + ?Sized> {
    probe: &'a P,
    origin: PointF,
    along: PointF,
    across: PointF,
    page: u32,
    a0: i64,
    a1: i64,
    b0: i64,
    b1: i64,
}

impl<'a, P: PixelProbe + ?Sized> EdgeFitter<'a, P> {
    /// Start from `zone`
    pub fn new(zone: &AngularZone, probe: &'a P) -> Self {
        let (along, across) = zone.axes();
        let (low, high) = zone.span();
        Self {
            probe,
            origin: zone.start.to_f64(),
            along,
            across,
            page: zone.page,
            a0: 0,
            a1: zone.length().round() as i64,
            b0: -(low as i64),
            b1: high as i64,
        }
    }

    /// Current extent across the zone
    pub fn height(&self) -> u32 {
        (self.b1 - self.b0 + 1) as u32
    }

    /// Current extent along the zone
    pub fn width(&self) -> u32 {
        (self.a1 - self.a0 + 1) as u32
    }

    /// The fitted zone
    pub fn zone(&self) -> AngularZone {
        // Even heights put the extra row on the +across side.
        let b_mid = (self.b0 + (self.b1 - self.b0) / 2) as f64;
        let at = |a: i64| {
            PointF::new(
                self.origin.x + self.along.x * a as f64 + self.across.x * b_mid,
                self.origin.y + self.along.y * a as f64 + self.across.y * b_mid,
            )
            .rounded()
        };
        AngularZone::new(at(self.a0), at(self.a1), self.height() as i32, self.page)
    }

    /// Move `side` to the nearest ink boundary
    ///
    /// If the side's current row holds ink, the side grows outward to the
    /// last ink row before background, up to `max_extent`. If the row is
    /// background, the side shrinks inward to the first ink row, never below
    /// `min_extent`. Returns `Ok(false)` and leaves the zone unchanged when no
    /// such row exists within those limits.
    pub fn fit(
        &mut self,
        side: Side,
        params: &EdgeFitParams,
        token: &CancellationToken,
    ) -> Result<bool, Cancelled> {
        token.check()?;
        let tolerance = params.tolerance_permille();
        let (edge, opposite, step) = self.edge_of(side);
        let extent = |row: i64| ((row - opposite).abs() + 1) as u64;
        let boundary = |class: RowClass| match tolerance {
            Some(_) => class != RowClass::Ink,
            None => class == RowClass::Background,
        };

        let found = if boundary(self.classify(side, edge, tolerance)) {
            // Shrink inward.
            let mut row = edge - step;
            let mut found = None;
            while extent(row) >= params.min_extent as u64 && (row - opposite) * step >= 0 {
                token.check()?;
                if !boundary(self.classify(side, row, tolerance)) {
                    found = Some(row);
                    break;
                }
                row -= step;
            }
            found
        } else {
            // Grow outward; `last` is the outermost ink row so far.
            let mut last = edge;
            let mut found = None;
            while extent(last) < params.max_extent as u64 {
                token.check()?;
                let row = last + step;
                let class = self.classify(side, row, tolerance);
                if class == RowClass::Background {
                    found = Some(last);
                    break;
                }
                if boundary(class) {
                    found = Some(self.search_buffer(side, last, step, params, &extent, token)?);
                    break;
                }
                last = row;
            }
            if found.is_none() && extent(last) >= params.max_extent as u64 {
                // The limit row itself may be bounded by background.
                token.check()?;
                if self.classify(side, last + step, tolerance) == RowClass::Background {
                    found = Some(last);
                }
            }
            found
        };

        match found {
            Some(row) => {
                self.set_edge(side, row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// After a faint row just outside `tentative`, look up to the fuzzy
    /// buffer further for a true background row
    fn search_buffer(
        &self,
        side: Side,
        tentative: i64,
        step: i64,
        params: &EdgeFitParams,
        extent: &dyn Fn(i64) -> u64,
        token: &CancellationToken,
    ) -> Result<i64, Cancelled> {
        let mut last = tentative + step;
        for _ in 0..params.fuzzy_buffer {
            if extent(last) > params.max_extent as u64 {
                break;
            }
            token.check()?;
            let row = last + step;
            if self.classify(side, row, None) == RowClass::Background {
                return Ok(last);
            }
            last = row;
        }
        Ok(tentative)
    }

    fn edge_of(&self, side: Side) -> (i64, i64, i64) {
        match side {
            Side::Top => (self.b0, self.b1, -1),
            Side::Bottom => (self.b1, self.b0, 1),
            Side::Left => (self.a0, self.a1, -1),
            Side::Right => (self.a1, self.a0, 1),
        }
    }

    fn set_edge(&mut self, side: Side, row: i64) {
        match side {
            Side::Top => self.b0 = row,
            Side::Bottom => self.b1 = row,
            Side::Left => self.a0 = row,
            Side::Right => self.a1 = row,
        }
    }

    fn classify(&self, side: Side, offset: i64, tolerance: Option<u64>) -> RowClass {
        let (ink, total) = self.row_ink(side, offset);
        if ink == 0 {
            RowClass::Background
        } else if matches!(tolerance, Some(permille) if ink * 1000 < permille * total) {
            RowClass::Faint
        } else {
            RowClass::Ink
        }
    }

    /// Ink and total samples of the row (or column) at `offset`
    fn row_ink(&self, side: Side, offset: i64) -> (u64, u64) {
        let mut ink = 0;
        let mut total = 0;
        match side {
            Side::Top | Side::Bottom => {
                for a in self.a0..=self.a1 {
                    total += 1;
                    ink += self.sample(a, offset) as u64;
                }
            }
            Side::Left | Side::Right => {
                for b in self.b0..=self.b1 {
                    total += 1;
                    ink += self.sample(offset, b) as u64;
                }
            }
        }
        (ink, total)
    }

    fn sample(&self, a: i64, b: i64) -> bool {
        let point = PointF::new(
            self.origin.x + self.along.x * a as f64 + self.across.x * b as f64,
            self.origin.y + self.along.y * a as f64 + self.across.y * b as f64,
        );
        self.probe.ink_at(point.rounded())
    }
}

/// Fit one side of `zone` in place
///
/// Returns `Ok(false)` and leaves `zone` untouched when no edge lies within
/// the extent limits.
pub fn fit_edge<P: PixelProbe + ?Sized>(
    zone: &mut AngularZone,
    side: Side,
    probe: &P,
    params: &EdgeFitParams,
    token: &CancellationToken,
) -> Result<bool, Cancelled> {
    let mut fitter = EdgeFitter::new(zone, probe);
    let found = fitter.fit(side, params, token)?;
    if found {
        *zone = fitter.zone();
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 300×200 page with solid ink over x 100..=199, y 50..=79
    fn solid_block() -> Bitmap {
        let mut bitmap = Bitmap::new(300, 200);
        bitmap.fill(Rect::new(100, 50, 199, 79));
        bitmap
    }

    fn seed(x0: i32, x1: i32, y: i32, height: i32) -> AngularZone {
        AngularZone::new(Point::new(x0, y), Point::new(x1, y), height, 1)
    }

    #[test]
    fn test_bitmap_from_luma_checks_size() {
        assert!(Bitmap::from_luma(2, 2, vec![0; 4]).is_ok());
        assert!(matches!(
            Bitmap::from_luma(2, 2, vec![0; 3]),
            Err(EngineError::InvalidBitmap { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_bitmap_threshold_and_ink_count() {
        let mut bitmap = Bitmap::new(10, 10);
        bitmap.set_luma(1, 1, 100);
        assert!(bitmap.is_ink(1, 1));
        assert!(!bitmap.clone().with_threshold(50).is_ink(1, 1));

        bitmap.fill(Rect::new(5, 5, 20, 20));
        assert_eq!(bitmap.ink_count(Rect::new(0, 0, 9, 9)), 26);
        assert!(!bitmap.ink_at(Point::new(-1, 5)));
    }

    #[test]
    fn test_grow_top_to_last_ink_row() {
        let bitmap = solid_block();
        let mut zone = seed(120, 180, 65, 1);
        let token = CancellationToken::new();

        let found = fit_edge(&mut zone, Side::Top, &bitmap, &EdgeFitParams::exact(1, 100), &token);
        assert_eq!(found, Ok(true));
        assert_eq!(zone.bounds().top, 50);
        assert_eq!(zone.bounds().bottom, 65);
    }

    #[test]
    fn test_shrink_top_to_first_ink_row() {
        let bitmap = solid_block();
        let mut zone = seed(120, 180, 65, 51);
        assert_eq!(zone.bounds().top, 40);
        let token = CancellationToken::new();

        let found = fit_edge(&mut zone, Side::Top, &bitmap, &EdgeFitParams::exact(1, 100), &token);
        assert_eq!(found, Ok(true));
        assert_eq!(zone.bounds().top, 50);
        assert_eq!(zone.bounds().bottom, 90);
    }

    #[test]
    fn test_shrink_respects_min_extent() {
        let bitmap = Bitmap::new(100, 100);
        let mut zone = seed(10, 40, 50, 21);
        let original = zone;
        let token = CancellationToken::new();

        let found = fit_edge(&mut zone, Side::Top, &bitmap, &EdgeFitParams::exact(5, 100), &token);
        assert_eq!(found, Ok(false));
        assert_eq!(zone.bounds(), original.bounds());
    }

    #[test]
    fn test_fitter_keeps_mirrored_even_height() {
        let bitmap = solid_block();
        let mirrored = AngularZone::new(Point::new(50, 20), Point::new(10, 20), -10, 1);
        let fitter = EdgeFitter::new(&mirrored, &bitmap);

        assert_eq!(fitter.height(), 10);
        assert_eq!(fitter.zone().bounds(), mirrored.bounds());
    }

    #[test]
    fn test_grow_respects_max_extent() {
        let bitmap = solid_block();
        let mut fitter = EdgeFitter::new(&seed(120, 180, 65, 1), &bitmap);
        let token = CancellationToken::new();

        assert_eq!(fitter.fit(Side::Top, &EdgeFitParams::exact(1, 10), &token), Ok(false));
        assert_eq!(fitter.height(), 1);

        // Exactly enough room: rows 50..=65
        assert_eq!(fitter.fit(Side::Top, &EdgeFitParams::exact(1, 16), &token), Ok(true));
        assert_eq!(fitter.height(), 16);
    }

    #[test]
    fn test_left_and_right_grow_to_ink_bounds() {
        let bitmap = solid_block();
        let mut fitter = EdgeFitter::new(&seed(150, 160, 65, 1), &bitmap);
        let token = CancellationToken::new();
        let params = EdgeFitParams::exact(1, 1000);

        assert_eq!(fitter.fit(Side::Left, &params, &token), Ok(true));
        assert_eq!(fitter.fit(Side::Right, &params, &token), Ok(true));
        let bounds = fitter.zone().bounds();
        assert_eq!((bounds.left, bounds.right), (100, 199));
        assert_eq!(fitter.width(), 100);
    }

    #[test]
    fn test_right_shrinks_past_overshoot() {
        let bitmap = solid_block();
        let mut zone = seed(120, 260, 65, 1);
        let token = CancellationToken::new();

        let found = fit_edge(&mut zone, Side::Right, &bitmap, &EdgeFitParams::exact(1, 1000), &token);
        assert_eq!(found, Ok(true));
        assert_eq!(zone.end, Point::new(199, 65));
    }

    /// Solid block plus sparse ascender rows 45..=49 (one ink pixel each)
    fn block_with_ascenders() -> Bitmap {
        let mut bitmap = solid_block();
        for y in 45..50 {
            bitmap.set_ink(150, y);
        }
        bitmap
    }

    #[test]
    fn test_fuzzy_buffer_prefers_true_background() {
        let bitmap = block_with_ascenders();
        let token = CancellationToken::new();
        let params = EdgeFitParams::exact(1, 100).with_fuzzy(0.05, 10);

        let mut zone = seed(120, 180, 65, 1);
        assert_eq!(fit_edge(&mut zone, Side::Top, &bitmap, &params, &token), Ok(true));
        assert_eq!(zone.bounds().top, 45);
    }

    #[test]
    fn test_fuzzy_short_buffer_keeps_tentative_edge() {
        let bitmap = block_with_ascenders();
        let token = CancellationToken::new();
        let params = EdgeFitParams::exact(1, 100).with_fuzzy(0.05, 2);

        let mut zone = seed(120, 180, 65, 1);
        assert_eq!(fit_edge(&mut zone, Side::Top, &bitmap, &params, &token), Ok(true));
        assert_eq!(zone.bounds().top, 50);
    }

    #[test]
    fn test_exact_includes_sparse_rows() {
        let bitmap = block_with_ascenders();
        let token = CancellationToken::new();

        let mut zone = seed(120, 180, 65, 1);
        let found = fit_edge(&mut zone, Side::Top, &bitmap, &EdgeFitParams::exact(1, 100), &token);
        assert_eq!(found, Ok(true));
        assert_eq!(zone.bounds().top, 45);
    }

    #[test]
    fn test_cancelled_before_scan() {
        let bitmap = solid_block();
        let mut zone = seed(120, 180, 65, 1);
        let token = CancellationToken::cancelled();

        let result = fit_edge(&mut zone, Side::Top, &bitmap, &EdgeFitParams::default(), &token);
        assert_eq!(result, Err(Cancelled));
        assert_eq!(zone, seed(120, 180, 65, 1));
    }
}
