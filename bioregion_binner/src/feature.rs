// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GeoJSON-shaped occurrence features and the handles cells store for them.

use alloc::string::String;
use alloc::vec::Vec;
use core::cell::OnceCell;
use core::fmt;

use kurbo::{BezPath, Line, Point, Rect, Shape as _};

use crate::error::BinError;
use crate::extent::Extent;

/// Properties carried by an occurrence feature.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureProperties {
    /// Species identity.
    pub name: String,
}

/// A species occurrence: a geometry plus the species it records.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    /// Location of the occurrence. `None` is rejected when binning.
    pub geometry: Option<Geometry>,
    /// Species properties.
    pub properties: FeatureProperties,
}

impl Feature {
    /// Create a feature with the given species name and geometry.
    pub fn new(name: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            properties: FeatureProperties { name: name.into() },
        }
    }

    /// A point occurrence at longitude `x`, latitude `y`.
    pub fn point(name: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(name, Geometry::Point(Point::new(x, y)))
    }

    /// A polygon range from its rings (exterior first, then holes).
    pub fn polygon(name: impl Into<String>, rings: Vec<Vec<Point>>) -> Self {
        Self::new(name, Geometry::Polygon(Polygon::new(rings)))
    }

    /// Species name.
    pub fn name(&self) -> &str {
        &self.properties.name
    }

    /// Check that the feature can be binned: it has a supported geometry, finite coordinates,
    /// and polygon rings of at least four positions.
    pub fn validate(&self) -> Result<(), BinError> {
        let name = || self.properties.name.clone();
        let geometry = self
            .geometry
            .as_ref()
            .ok_or_else(|| BinError::MissingGeometry { name: name() })?;
        let polygons: &[Polygon] = match geometry {
            Geometry::Point(p) => {
                return if is_finite(*p) {
                    Ok(())
                } else {
                    Err(BinError::NonFiniteCoordinate { name: name() })
                };
            }
            Geometry::Polygon(polygon) => core::slice::from_ref(polygon),
            Geometry::MultiPolygon(polygons) if !polygons.is_empty() => polygons.as_slice(),
            Geometry::MultiPolygon(_) => return Err(BinError::DegeneratePolygon { name: name() }),
            other => {
                return Err(BinError::UnsupportedGeometry {
                    name: name(),
                    kind: other.kind(),
                });
            }
        };
        for polygon in polygons {
            if polygon.rings.is_empty() || polygon.rings.iter().any(|ring| ring.len() < 4) {
                return Err(BinError::DegeneratePolygon { name: name() });
            }
            if !polygon.positions().all(is_finite) {
                return Err(BinError::NonFiniteCoordinate { name: name() });
            }
        }
        Ok(())
    }
}

fn is_finite(p: Point) -> bool {
    p.x.is_finite() && p.y.is_finite()
}

/// GeoJSON geometry. Positions are Kurbo points with `x` longitude and `y` latitude.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    /// A single position.
    Point(Point),
    /// Several positions.
    MultiPoint(Vec<Point>),
    /// A polyline.
    LineString(Vec<Point>),
    /// Several polylines.
    MultiLineString(Vec<Vec<Point>>),
    /// A polygon with optional holes.
    Polygon(Polygon),
    /// Several polygons.
    MultiPolygon(Vec<Polygon>),
    /// A heterogeneous collection.
    GeometryCollection(Vec<Geometry>),
}

impl Geometry {
    /// The GeoJSON `type` of this geometry.
    pub fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::MultiPoint(_) => GeometryKind::MultiPoint,
            Self::LineString(_) => GeometryKind::LineString,
            Self::MultiLineString(_) => GeometryKind::MultiLineString,
            Self::Polygon(_) => GeometryKind::Polygon,
            Self::MultiPolygon(_) => GeometryKind::MultiPolygon,
            Self::GeometryCollection(_) => GeometryKind::GeometryCollection,
        }
    }
}

/// GeoJSON geometry type names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// `Point`
    Point,
    /// `MultiPoint`
    MultiPoint,
    /// `LineString`
    LineString,
    /// `MultiLineString`
    MultiLineString,
    /// `Polygon`
    Polygon,
    /// `MultiPolygon`
    MultiPolygon,
    /// `GeometryCollection`
    GeometryCollection,
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A polygon: an exterior ring followed by hole rings.
///
/// The bounding box and the Kurbo path used for containment tests are computed on first use and
/// cached.
#[derive(Clone, Debug, Default)]
pub struct Polygon {
    rings: Vec<Vec<Point>>,
    bbox: OnceCell<Rect>,
    path: OnceCell<BezPath>,
}

impl PartialEq for Polygon {
    fn eq(&self, other: &Self) -> bool {
        self.rings == other.rings
    }
}

impl Polygon {
    /// Create a polygon from its rings.
    pub fn new(rings: Vec<Vec<Point>>) -> Self {
        Self {
            rings,
            bbox: OnceCell::new(),
            path: OnceCell::new(),
        }
    }

    /// All rings, exterior first.
    pub fn rings(&self) -> &[Vec<Point>] {
        &self.rings
    }

    /// Every position of every ring.
    pub fn positions(&self) -> impl Iterator<Item = Point> + '_ {
        self.rings.iter().flatten().copied()
    }

    /// Every edge of every ring, closing rings that are not explicitly closed.
    pub fn edges(&self) -> impl Iterator<Item = Line> + '_ {
        self.rings.iter().flat_map(|ring| {
            let n = ring.len();
            (0..n).map(move |i| Line::new(ring[i], ring[(i + 1) % n]))
        })
    }

    /// Bounding box of all positions. `Rect::ZERO` for a polygon without positions.
    pub fn bbox(&self) -> Rect {
        *self.bbox.get_or_init(|| {
            let mut points = self.positions();
            let Some(first) = points.next() else {
                return Rect::ZERO;
            };
            points.fold(Rect::from_points(first, first), |r, p| r.union_pt(p))
        })
    }

    /// Whether the bounding box has been computed already.
    pub fn is_bbox_cached(&self) -> bool {
        self.bbox.get().is_some()
    }

    /// Even-odd containment, so holes are respected whatever their orientation.
    pub fn contains(&self, point: Point) -> bool {
        let path = self.path.get_or_init(|| {
            let mut path = BezPath::new();
            for ring in &self.rings {
                let Some((&first, rest)) = ring.split_first() else {
                    continue;
                };
                path.move_to(first);
                for &p in rest {
                    path.line_to(p);
                }
                path.close_path();
            }
            path
        });
        path.winding(point) % 2 != 0
    }
}

/// Index of a feature in a [`QuadtreeGeoBinner`](crate::QuadtreeGeoBinner).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(pub(crate) u32);

impl FeatureId {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Feature ids are intentionally 32-bit."
    )]
    pub(crate) const fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    /// Position of the feature in insertion order.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a cell stores: a feature, or one polygon of a `MultiPolygon` feature.
///
/// A `MultiPolygon` is split into its polygons when it is routed into child cells, so each part
/// lands only in the quadrants it actually touches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureRef {
    feature: FeatureId,
    part: Option<u32>,
}

impl FeatureRef {
    /// The whole feature.
    pub const fn whole(feature: FeatureId) -> Self {
        Self {
            feature,
            part: None,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Polygon part indices are intentionally 32-bit."
    )]
    pub(crate) const fn part(feature: FeatureId, part: usize) -> Self {
        Self {
            feature,
            part: Some(part as u32),
        }
    }

    /// The feature this refers to.
    pub const fn feature(self) -> FeatureId {
        self.feature
    }

    /// Index of the polygon within a `MultiPolygon`, if this is a part.
    pub fn part_index(self) -> Option<usize> {
        self.part.map(|p| p as usize)
    }
}

/// The geometry a [`FeatureRef`] resolves to, restricted to what the tree can route.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Shape<'a> {
    Point(Point),
    Polygon(&'a Polygon),
    MultiPolygon(&'a [Polygon]),
}

impl<'a> Shape<'a> {
    /// Resolve `r` against the feature list. `r` must come from that list.
    pub(crate) fn resolve(features: &'a [Feature], r: FeatureRef) -> Result<Self, BinError> {
        Self::of(&features[r.feature.index()], r.part_index())
    }

    /// The routable shape of `feature`, or of one of its `MultiPolygon` parts.
    pub(crate) fn of(feature: &'a Feature, part: Option<usize>) -> Result<Self, BinError> {
        let geometry = feature
            .geometry
            .as_ref()
            .ok_or_else(|| BinError::MissingGeometry {
                name: feature.properties.name.clone(),
            })?;
        match (geometry, part) {
            (Geometry::Point(p), None) => Ok(Self::Point(*p)),
            (Geometry::Polygon(polygon), None) => Ok(Self::Polygon(polygon)),
            (Geometry::MultiPolygon(polygons), None) => Ok(Self::MultiPolygon(polygons)),
            (Geometry::MultiPolygon(polygons), Some(i)) if i < polygons.len() => {
                Ok(Self::Polygon(&polygons[i]))
            }
            (other, _) => Err(BinError::UnsupportedGeometry {
                name: feature.properties.name.clone(),
                kind: other.kind(),
            }),
        }
    }

    pub(crate) fn intersects(&self, extent: &Extent) -> bool {
        match self {
            Self::Point(p) => extent.contains_point(*p),
            Self::Polygon(polygon) => extent.intersects_polygon(polygon),
            Self::MultiPolygon(polygons) => polygons.iter().any(|p| extent.intersects_polygon(p)),
        }
    }
}
