//! Angular zone geometry
//!
//! All coordinates are image pixels with the origin at the top-left, X to the
//! right and Y downward. Integer points name pixel centers.
//!
//! An [`AngularZone`] is a possibly rotated rectangle described by the
//! midpoints of its two short sides (`start`, `end`) and its height measured
//! perpendicular to the start→end line. A zone covers the pixels from `start`
//! to `end` inclusive and `height` pixel rows across, centered on the
//! start→end line.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Integer image-space point (pixel center)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    /// Create a new point
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Convert to floating point
    pub fn to_f64(self) -> PointF {
        PointF::new(self.x as f64, self.y as f64)
    }
}

/// Floating-point point used for derived geometry
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    /// Create a new point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Round to the nearest pixel center
    pub fn rounded(self) -> Point {
        Point::new(self.x.round() as i32, self.y.round() as i32)
    }

    /// Distance to another point
    pub fn distance_to(&self, other: &PointF) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    fn offset(self, dir: PointF, amount: f64) -> PointF {
        PointF::new(self.x + dir.x * amount, self.y + dir.y * amount)
    }
}

/// Inclusive integer rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    /// Create a rectangle from inclusive bounds
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Smallest rectangle containing both points
    pub fn from_points(a: Point, b: Point) -> Self {
        Self::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
    }

    /// Width in pixels
    pub fn width(&self) -> i32 {
        self.right - self.left + 1
    }

    /// Height in pixels
    pub fn height(&self) -> i32 {
        self.bottom - self.top + 1
    }

    /// Check whether the rectangle contains a point
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.top && point.y <= self.bottom
    }

    /// Check whether `other` lies entirely inside this rectangle
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.top >= self.top
            && other.bottom <= self.bottom
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Grow by `px` on every side (shrinks for negative values)
    pub fn inflated(&self, px: i32) -> Rect {
        Rect::new(self.left - px, self.top - px, self.right + px, self.bottom + px)
    }

    /// Intersection with a `width` × `height` image, if any
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let clamped = Rect::new(
            self.left.max(0),
            self.top.max(0),
            self.right.min(width as i32 - 1),
            self.bottom.min(height as i32 - 1),
        );
        (clamped.left <= clamped.right && clamped.top <= clamped.bottom).then_some(clamped)
    }
}

/// An angled rectangle addressing a word, line, or redaction on a page
///
/// Swapping `start` and `end` while negating `height` describes the same
/// zone. An odd height is centered on the start→end line, so its sign does
/// not matter. Equality and hashing follow that geometric identity.
///
/// # Example
///
/// ```
/// use zonefit_core::{AngularZone, Point, Rect};
///
/// let zone = AngularZone::new(Point::new(10, 20), Point::new(50, 20), 11, 1);
/// assert_eq!(zone.bounds(), Rect::new(10, 15, 50, 25));
///
/// let reversed = AngularZone::new(Point::new(50, 20), Point::new(10, 20), -11, 1);
/// assert_eq!(zone, reversed);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AngularZone {
    /// Midpoint of the first short side
    pub start: Point,
    /// Midpoint of the opposite short side
    pub end: Point,
    /// Extent perpendicular to start→end, in pixels; a negative height puts
    /// the extra row of an even height on the other side of the line
    pub height: i32,
    /// Owning page, 1-based
    pub page: u32,
}

impl AngularZone {
    /// Create a new zone
    pub fn new(start: Point, end: Point, height: i32, page: u32) -> Self {
        Self {
            start,
            end,
            height,
            page,
        }
    }

    /// Angle of start→end in radians
    ///
    /// A zone whose start and end coincide has angle 0.
    pub fn angle(&self) -> f64 {
        if self.start == self.end {
            return 0.0;
        }
        let dy = (self.end.y - self.start.y) as f64;
        let dx = (self.end.x - self.start.x) as f64;
        dy.atan2(dx)
    }

    /// Distance from start to end
    pub fn length(&self) -> f64 {
        self.start.to_f64().distance_to(&self.end.to_f64())
    }

    /// Unit vectors along (start→end) and across the zone
    ///
    /// The cross vector is the along vector rotated a quarter turn clockwise
    /// on screen; for a left-to-right zone it points down.
    pub fn axes(&self) -> (PointF, PointF) {
        let angle = self.angle();
        let along = PointF::new(angle.cos(), angle.sin());
        let across = PointF::new(-along.y, along.x);
        (along, across)
    }

    /// Center of the zone
    pub fn center(&self) -> PointF {
        PointF::new(
            (self.start.x + self.end.x) as f64 / 2.0,
            (self.start.y + self.end.y) as f64 / 2.0,
        )
    }

    /// Centers of the four corner pixels, in order around the outline
    pub fn vertices(&self) -> [PointF; 4] {
        let (low, high) = self.span();
        corners_of(self.start.to_f64(), self.end.to_f64(), self.axes().1, low, high)
    }

    /// Smallest pixel rectangle containing the zone's corner pixels
    pub fn bounds(&self) -> Rect {
        let mut vertices = self.vertices().into_iter().map(PointF::rounded);
        let first = vertices.next().unwrap_or(self.start);
        vertices.fold(Rect::from_points(first, first), |rect, p| {
            rect.union(&Rect::from_points(p, p))
        })
    }

    /// Grow by `px` on every side (shrinks for negative values)
    pub fn inflated(&self, px: i32) -> AngularZone {
        let (along, _) = self.axes();
        let amount = px as f64;
        let height = (self.height.abs() + 2 * px).max(1);
        AngularZone {
            start: self.start.to_f64().offset(along, -amount).rounded(),
            end: self.end.to_f64().offset(along, amount).rounded(),
            height: if self.height < 0 { -height } else { height },
            page: self.page,
        }
    }

    /// Check whether a point lies inside the zone's pixel area
    pub fn contains(&self, point: Point) -> bool {
        let (along, across) = self.axes();
        let rel = PointF::new((point.x - self.start.x) as f64, (point.y - self.start.y) as f64);
        let a = rel.x * along.x + rel.y * along.y;
        let b = rel.x * across.x + rel.y * across.y;
        let (low, high) = self.span();
        a >= -0.5 && a <= self.length() + 0.5 && b >= -low - 0.5 && b <= high + 0.5
    }

    /// Check whether the segment `a`→`b` passes through the zone
    pub fn intersects_segment(&self, a: Point, b: Point) -> bool {
        if self.contains(a) || self.contains(b) {
            return true;
        }
        let outline = self.outline();
        let (pa, pb) = (a.to_f64(), b.to_f64());
        (0..4).any(|i| segments_intersect(pa, pb, outline[i], outline[(i + 1) % 4]))
    }

    /// Geometric identity: ordered ends, height signed relative to them, page
    fn identity(&self) -> (Point, Point, i32, u32) {
        let (lo, hi, height) = if self.start <= self.end {
            (self.start, self.end, self.height)
        } else {
            (self.end, self.start, -self.height)
        };
        let height = if height % 2 == 0 && height != 0 {
            height
        } else {
            height.abs()
        };
        (lo, hi, height, self.page)
    }

    /// Pixel rows covered on each side of the start→end line
    ///
    /// An even height puts its extra row on the `across` side, or on the
    /// opposite side when the height is negative.
    pub(crate) fn span(&self) -> (f64, f64) {
        let height = self.height.abs().max(1);
        let short = (height - 1) / 2;
        let long = height - 1 - short;
        if self.height < 0 {
            (long as f64, short as f64)
        } else {
            (short as f64, long as f64)
        }
    }

    /// Outer corners of the pixel area
    fn outline(&self) -> [PointF; 4] {
        let (along, across) = self.axes();
        let (low, high) = self.span();
        let start = self.start.to_f64().offset(along, -0.5);
        let end = self.end.to_f64().offset(along, 0.5);
        corners_of(start, end, across, low + 0.5, high + 0.5)
    }
}

impl PartialEq for AngularZone {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for AngularZone {}

impl Hash for AngularZone {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Merge zones into one aligned with their average angle
///
/// Every input zone is normalized to point the same way as the first before
/// averaging, so a reversed zone does not cancel the others out. The start is
/// rounded to a pixel first and the end is placed along the averaged
/// direction from it, so the result's angle is off the average by at most
/// half a pixel over its length. The result contains all inputs. Returns
/// `None` for an empty slice.
pub fn merge_zones(zones: &[AngularZone]) -> Option<AngularZone> {
    let first = zones.first()?;
    let reference = first.angle();
    let angle = zones
        .iter()
        .map(|zone| align_angle(zone.angle(), reference))
        .sum::<f64>()
        / zones.len() as f64;

    let along = PointF::new(angle.cos(), angle.sin());
    let across = PointF::new(-along.y, along.x);

    let outline: Vec<PointF> = zones.iter().flat_map(|zone| zone.outline()).collect();
    let origin = PointF::new(0.0, 0.0);
    let (a_min, a_max) = projected_extent(&outline, origin, along);
    let (b_min, b_max) = projected_extent(&outline, origin, across);
    let b_mid = (b_min + b_max) / 2.0;

    // Rounding tilts the zone slightly; grow the ends until the tilted
    // zone still covers every input corner.
    let mut slack = 0.5;
    loop {
        let start = origin
            .offset(along, a_min - slack)
            .offset(across, b_mid)
            .rounded();
        let end = start
            .to_f64()
            .offset(along, a_max - a_min + 2.0 * slack)
            .rounded();

        let candidate = AngularZone::new(start, end, 1, first.page);
        let (axis, cross) = candidate.axes();
        let (lo, hi) = projected_extent(&outline, start.to_f64(), axis);
        let missing = (-0.5 - lo).max(hi - candidate.length() - 0.5);
        if missing > 0.0 {
            slack += missing.ceil();
            continue;
        }

        let (b_lo, b_hi) = projected_extent(&outline, start.to_f64(), cross);
        let reach = b_lo.abs().max(b_hi.abs());
        let height = 2 * (reach - 0.5).max(0.0).ceil() as i32 + 1;
        return Some(AngularZone::new(start, end, height, first.page));
    }
}

/// Range of `points` projected onto `dir`, measured from `origin`
fn projected_extent(points: &[PointF], origin: PointF, dir: PointF) -> (f64, f64) {
    points
        .iter()
        .map(|p| (p.x - origin.x) * dir.x + (p.y - origin.y) * dir.y)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| (lo.min(d), hi.max(d)))
}

/// Fold `angle` into the half-turn around `reference`
fn align_angle(angle: f64, reference: f64) -> f64 {
    use std::f64::consts::{FRAC_PI_2, PI};
    let mut angle = angle;
    while angle - reference > FRAC_PI_2 {
        angle -= PI;
    }
    while reference - angle > FRAC_PI_2 {
        angle += PI;
    }
    angle
}

fn corners_of(start: PointF, end: PointF, across: PointF, low: f64, high: f64) -> [PointF; 4] {
    [
        start.offset(across, -low),
        end.offset(across, -low),
        end.offset(across, high),
        start.offset(across, high),
    ]
}

fn segments_intersect(p1: PointF, p2: PointF, q1: PointF, q2: PointF) -> bool {
    fn cross(o: PointF, a: PointF, b: PointF) -> f64 {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    }
    fn on_segment(p: PointF, q: PointF, r: PointF) -> bool {
        r.x >= p.x.min(q.x) && r.x <= p.x.max(q.x) && r.y >= p.y.min(q.y) && r.y <= p.y.max(q.y)
    }

    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}
