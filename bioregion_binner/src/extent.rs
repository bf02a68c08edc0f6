// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Geographic extents and the quadrant arithmetic of the tree.

use kurbo::{Line, Point, Rect};

use crate::feature::Polygon;
use crate::util::segments_intersect;

/// An axis-aligned geographic extent `[west, south, east, north]` in degrees.
///
/// Quadrants are numbered by two bits: bit 0 set selects the east half and bit 1 set selects the
/// north half, so `0` is south-west, `1` south-east, `2` north-west and `3` north-east.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(from = "[f64; 4]", into = "[f64; 4]")
)]
pub struct Extent {
    /// Minimum longitude.
    pub west: f64,
    /// Minimum latitude.
    pub south: f64,
    /// Maximum longitude.
    pub east: f64,
    /// Maximum latitude.
    pub north: f64,
}

impl Extent {
    /// The whole globe, `[-180, -90, 180, 90]`.
    pub const WORLD: Self = Self::new(-180.0, -90.0, 180.0, 90.0);

    /// Create an extent from its bounds.
    #[inline(always)]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Bounds as `[west, south, east, north]`.
    pub const fn to_array(self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    /// The same region as a Kurbo rectangle (`x` is longitude, `y` latitude).
    pub fn to_rect(self) -> Rect {
        Rect::new(self.west, self.south, self.east, self.north)
    }

    /// East-west span.
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// North-south span.
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Centre of the extent, where the quadrants meet.
    pub fn center(&self) -> Point {
        Point::new(
            0.5 * (self.west + self.east),
            0.5 * (self.south + self.north),
        )
    }

    /// Whether halving at the centre yields strictly smaller quadrants.
    ///
    /// Fails once the extent spans only a few representable values on either axis.
    pub fn can_split(&self) -> bool {
        let mid = self.center();
        self.west < mid.x && mid.x < self.east && self.south < mid.y && mid.y < self.north
    }

    /// Whether all bounds are finite and the extent has positive area.
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
            && self.east > self.west
            && self.north > self.south
    }

    /// Extend the shorter axis symmetrically so that the extent becomes square.
    ///
    /// ```rust
    /// use bioregion_binner::Extent;
    ///
    /// let square = Extent::WORLD.squared();
    /// assert_eq!(square, Extent::new(-180.0, -180.0, 180.0, 180.0));
    /// ```
    pub fn squared(self) -> Self {
        let (width, height) = (self.width(), self.height());
        let center = self.center();
        if width > height {
            let half = 0.5 * width;
            Self::new(self.west, center.y - half, self.east, center.y + half)
        } else if height > width {
            let half = 0.5 * height;
            Self::new(center.x - half, self.south, center.x + half, self.north)
        } else {
            self
        }
    }

    /// Quadrant `index` (0..=3) of this extent.
    ///
    /// The four quadrants share the exact midpoint values, so they partition the extent without
    /// gaps or overlaps.
    pub fn quadrant(&self, index: usize) -> Self {
        debug_assert!(index < 4, "quadrant index out of range: {index}");
        let mid = self.center();
        let (west, east) = if index & 1 == 0 {
            (self.west, mid.x)
        } else {
            (mid.x, self.east)
        };
        let (south, north) = if index & 2 == 0 {
            (self.south, mid.y)
        } else {
            (mid.y, self.north)
        };
        Self::new(west, south, east, north)
    }

    /// Quadrant containing `point`. Coordinates equal to the midpoint go to the greater half.
    pub fn quadrant_of(&self, point: Point) -> usize {
        let mid = self.center();
        usize::from(point.x >= mid.x) | (usize::from(point.y >= mid.y) << 1)
    }

    /// Whether `point` lies inside or on the boundary.
    pub fn contains_point(&self, point: Point) -> bool {
        self.west <= point.x && point.x <= self.east && self.south <= point.y && point.y <= self.north
    }

    /// Whether the closed rectangle `rect` touches this extent.
    pub fn overlaps_rect(&self, rect: Rect) -> bool {
        self.west <= rect.x1 && rect.x0 <= self.east && self.south <= rect.y1 && rect.y0 <= self.north
    }

    /// Corners in ring order: south-west, south-east, north-east, north-west.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.west, self.south),
            Point::new(self.east, self.south),
            Point::new(self.east, self.north),
            Point::new(self.west, self.north),
        ]
    }

    /// Closed 5-point ring around the extent, as GeoJSON polygon coordinates expect.
    pub fn coordinates(&self) -> [[f64; 2]; 5] {
        let [sw, se, ne, nw] = self.corners();
        [
            [sw.x, sw.y],
            [se.x, se.y],
            [ne.x, ne.y],
            [nw.x, nw.y],
            [sw.x, sw.y],
        ]
    }

    fn sides(&self) -> [Line; 4] {
        let [sw, se, ne, nw] = self.corners();
        [
            Line::new(sw, se),
            Line::new(se, ne),
            Line::new(ne, nw),
            Line::new(nw, sw),
        ]
    }

    /// Whether `polygon` geometrically intersects this closed extent.
    ///
    /// This is a true intersection test, not a bounding-box test: a polygon whose bounding box
    /// covers a corner of the extent but whose outline bends away does not intersect it. Holes
    /// are respected, and touching boundaries count as intersecting.
    pub fn intersects_polygon(&self, polygon: &Polygon) -> bool {
        if !self.overlaps_rect(polygon.bbox()) {
            return false;
        }
        if polygon.positions().any(|p| self.contains_point(p)) {
            return true;
        }
        if self.corners().iter().any(|&c| polygon.contains(c)) {
            return true;
        }
        let sides = self.sides();
        polygon
            .edges()
            .any(|edge| sides.iter().any(|&side| segments_intersect(edge, side)))
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self::WORLD
    }
}

impl From<[f64; 4]> for Extent {
    fn from([west, south, east, north]: [f64; 4]) -> Self {
        Self::new(west, south, east, north)
    }
}

impl From<Extent> for [f64; 4] {
    fn from(extent: Extent) -> Self {
        extent.to_array()
    }
}

impl From<Rect> for Extent {
    fn from(rect: Rect) -> Self {
        Self::new(rect.x0, rect.y0, rect.x1, rect.y1)
    }
}
