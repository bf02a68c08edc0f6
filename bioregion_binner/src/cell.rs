// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The quadtree itself: square cells in an index-addressed arena.

use alloc::{string::String, vec, vec::Vec};
use core::fmt;

use bioregion_flow::{BioregionId, ConnectedBioregions, OverlappingBioregions};
use hashbrown::HashSet;
use smallvec::SmallVec;
use tracing::trace;

use crate::error::BinError;
use crate::extent::Extent;
use crate::feature::{Feature, FeatureRef, Shape};
use crate::util::pow2;

/// Index of a cell in a [`CellTree`].
///
/// Ids are assigned in creation order and stay valid until the tree is rebuilt.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u32);

impl CellId {
    /// The root cell, covering the whole extent.
    pub const ROOT: Self = Self(0);

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Cell ids are intentionally 32-bit."
    )]
    const fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    /// Position of the cell in the arena.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Quadrant digits from the root down to a cell. The root has the empty path.
///
/// Displays as the digit string, e.g. `"302"`.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPath(SmallVec<[u8; 16]>);

impl CellPath {
    fn child(&self, quadrant: usize) -> Self {
        let mut path = self.clone();
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Quadrant indices are always below 4."
        )]
        path.0.push(quadrant as u8);
        path
    }

    /// Number of subdivisions from the root.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Quadrant digits, root first.
    pub fn quadrants(&self) -> &[u8] {
        &self.0
    }

    /// Parse a digit string such as `"302"`. Returns `None` on any digit outside `0..=3`.
    pub fn parse(s: &str) -> Option<Self> {
        s.bytes()
            .map(|b| matches!(b, b'0'..=b'3').then(|| b - b'0'))
            .collect::<Option<SmallVec<_>>>()
            .map(Self)
    }
}

impl fmt::Display for CellPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for q in &self.0 {
            write!(f, "{q}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CellPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellPath(\"{self}\")")
    }
}

/// Number of distinct features of one species in a cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeciesCount {
    /// Species name.
    pub name: String,
    /// Number of features of that species.
    pub count: usize,
}

/// Size and density bounds applied while inserting.
///
/// Sizes are cell edge lengths in the units of the extent (degrees).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SizeLimits {
    /// Cells larger than this always subdivide.
    pub max_size: f64,
    /// Cells at or below this never subdivide.
    pub min_size: f64,
    /// Features a cell holds before it subdivides.
    pub capacity: usize,
}

impl SizeLimits {
    /// Limits from log2 cell sizes in units of `1 / scale` degrees.
    ///
    /// A `scale` of 60 makes the sizes count arc-minutes: `max_size_log2 = 0` then allows cells
    /// of one arc-minute.
    pub fn from_log2(max_size_log2: i32, min_size_log2: i32, scale: f64, capacity: usize) -> Self {
        Self {
            max_size: pow2(max_size_log2) / scale,
            min_size: pow2(min_size_log2) / scale,
            capacity,
        }
    }
}

/// A square node of the tree.
#[derive(Clone, Debug)]
pub struct Cell {
    extent: Extent,
    path: CellPath,
    parent: Option<CellId>,
    children: [Option<CellId>; 4],
    is_leaf: bool,
    features: Vec<FeatureRef>,
    pub(crate) bioregion_id: Option<BioregionId>,
    pub(crate) species_top_list: Vec<SpeciesCount>,
    pub(crate) overlapping: OverlappingBioregions,
    pub(crate) connected: ConnectedBioregions,
}

impl Cell {
    fn new(extent: Extent, path: CellPath, parent: Option<CellId>) -> Self {
        Self {
            extent,
            path,
            parent,
            children: [None; 4],
            is_leaf: true,
            features: Vec::new(),
            bioregion_id: None,
            species_top_list: Vec::new(),
            overlapping: OverlappingBioregions::new(),
            connected: ConnectedBioregions::new(),
        }
    }

    /// Region covered by the cell.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Closed 5-point ring around the cell, for rendering.
    pub fn coordinates(&self) -> [[f64; 2]; 5] {
        self.extent.coordinates()
    }

    /// Edge length.
    pub fn size(&self) -> f64 {
        self.extent.width()
    }

    /// Quadrant path from the root.
    pub fn path(&self) -> &CellPath {
        &self.path
    }

    /// Parent cell, `None` for the root.
    pub fn parent(&self) -> Option<CellId> {
        self.parent
    }

    /// Child in `quadrant`, if it was ever needed.
    pub fn child(&self, quadrant: usize) -> Option<CellId> {
        self.children.get(quadrant).copied().flatten()
    }

    /// Live children in quadrant order.
    pub fn children(&self) -> impl Iterator<Item = CellId> + '_ {
        self.children.iter().flatten().copied()
    }

    /// Whether the cell still takes features directly instead of routing them to children.
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    /// Whether this is an internal cell holding aggregated descendant features.
    pub fn is_patched(&self) -> bool {
        !self.is_leaf && !self.features.is_empty()
    }

    /// Features held by the cell.
    pub fn features(&self) -> &[FeatureRef] {
        &self.features
    }

    /// Bioregion assigned by the clustering step.
    pub fn bioregion_id(&self) -> Option<BioregionId> {
        self.bioregion_id
    }

    /// Species in the cell, most frequent first. Filled in for listed cells.
    pub fn species_top_list(&self) -> &[SpeciesCount] {
        &self.species_top_list
    }

    /// State-node flow of the cell by bioregion.
    pub fn overlapping_bioregions(&self) -> &OverlappingBioregions {
        &self.overlapping
    }

    /// Link flow into the cell by neighbouring bioregion.
    pub fn connected_bioregions(&self) -> &ConnectedBioregions {
        &self.connected
    }
}

#[derive(Copy, Clone, Debug)]
enum PatchRule {
    PartiallyEmpty {
        max_size: f64,
    },
    Sparse {
        max_size: f64,
        lower_threshold: usize,
    },
}

/// Quadtree of [`Cell`]s stored in an arena, with the root at [`CellId::ROOT`].
///
/// Features are referenced by [`FeatureRef`] and resolved against the feature slice passed to
/// [`insert`](Self::insert); always pass the same slice for one tree.
#[derive(Clone)]
pub struct CellTree {
    cells: Vec<Cell>,
}

impl fmt::Debug for CellTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let leaves = self.cells.iter().filter(|c| c.is_leaf).count();
        let patched = self.cells.iter().filter(|c| c.is_patched()).count();
        f.debug_struct("CellTree")
            .field("extent", &self.root().extent)
            .field("cells", &self.cells.len())
            .field("leaves", &leaves)
            .field("patched", &patched)
            .finish_non_exhaustive()
    }
}

impl CellTree {
    /// A tree with a single empty root leaf covering `extent`.
    ///
    /// `extent` should be square (see [`Extent::squared`]) so that every cell is square.
    pub fn new(extent: Extent) -> Self {
        Self {
            cells: vec![Cell::new(extent, CellPath::default(), None)],
        }
    }

    /// The root cell.
    pub fn root(&self) -> &Cell {
        &self.cells[0]
    }

    /// Look up a cell.
    pub fn get(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id.index())
    }

    pub(crate) fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.iter_mut()
    }

    /// Number of cells, internal ones included.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Always `false`: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Depth of the deepest cell; `0` for a lone root.
    pub fn max_depth(&self) -> usize {
        self.cells.iter().map(|c| c.path.depth()).max().unwrap_or(0)
    }

    /// Follow `path` from the root.
    pub fn find(&self, path: &CellPath) -> Option<CellId> {
        path.quadrants()
            .iter()
            .try_fold(CellId::ROOT, |id, &q| self.cells[id.index()].child(usize::from(q)))
    }

    /// Insert a feature at the root, checking first that it touches the root extent.
    pub fn insert(
        &mut self,
        feature: FeatureRef,
        features: &[Feature],
        limits: SizeLimits,
    ) -> Result<(), BinError> {
        let shape = Shape::resolve(features, feature)?;
        if !shape.intersects(&self.root().extent) {
            return Err(BinError::OutsideExtent {
                name: features[feature.feature().index()].properties.name.clone(),
            });
        }
        self.add(CellId::ROOT, feature, features, limits)
    }

    /// Add a feature to `cell`, subdividing as the limits demand.
    ///
    /// - An internal cell routes the feature on to its quadrants.
    /// - A cell larger than `max_size` becomes internal and routes it, whatever its load.
    /// - A cell at or below `min_size` keeps it, whatever its load. So does a cell too small to
    ///   halve in floating point, whatever its size.
    /// - Otherwise the cell buffers features up to `capacity`; the one that overflows it makes
    ///   the cell internal, and all buffered features are routed on together.
    ///
    /// The feature is assumed to touch the cell.
    fn add(
        &mut self,
        cell: CellId,
        feature: FeatureRef,
        features: &[Feature],
        limits: SizeLimits,
    ) -> Result<(), BinError> {
        let node = &mut self.cells[cell.index()];
        if !node.is_leaf {
            return self.add_to_children(cell, feature, features, limits);
        }
        let size = node.extent.width();
        let splittable = node.extent.can_split();
        if size > limits.max_size && splittable {
            node.is_leaf = false;
            return self.add_to_children(cell, feature, features, limits);
        }
        if !splittable || size <= limits.min_size || node.features.len() < limits.capacity {
            node.features.push(feature);
            return Ok(());
        }
        node.is_leaf = false;
        let mut buffered = core::mem::take(&mut node.features);
        buffered.push(feature);
        trace!(path = %node.path, features = buffered.len(), "splitting cell");
        for r in buffered {
            self.add_to_children(cell, r, features, limits)?;
        }
        Ok(())
    }

    fn add_to_children(
        &mut self,
        cell: CellId,
        feature: FeatureRef,
        features: &[Feature],
        limits: SizeLimits,
    ) -> Result<(), BinError> {
        let extent = self.cells[cell.index()].extent;
        match Shape::resolve(features, feature)? {
            Shape::Point(p) => {
                let child = self.child_or_insert(cell, extent.quadrant_of(p));
                self.add(child, feature, features, limits)?;
            }
            Shape::Polygon(polygon) => {
                for quadrant in 0..4 {
                    if extent.quadrant(quadrant).intersects_polygon(polygon) {
                        let child = self.child_or_insert(cell, quadrant);
                        self.add(child, feature, features, limits)?;
                    }
                }
            }
            Shape::MultiPolygon(polygons) => {
                for part in 0..polygons.len() {
                    let part = FeatureRef::part(feature.feature(), part);
                    self.add_to_children(cell, part, features, limits)?;
                }
            }
        }
        Ok(())
    }

    fn child_or_insert(&mut self, cell: CellId, quadrant: usize) -> CellId {
        if let Some(child) = self.cells[cell.index()].children[quadrant] {
            return child;
        }
        let parent = &self.cells[cell.index()];
        let child = Cell::new(
            parent.extent.quadrant(quadrant),
            parent.path.child(quadrant),
            Some(cell),
        );
        let id = CellId::new(self.cells.len());
        self.cells.push(child);
        self.cells[cell.index()].children[quadrant] = Some(id);
        id
    }

    /// Give every internal cell no larger than `max_size` that has no features and fewer than
    /// four children the union of its descendants' features.
    ///
    /// Runs bottom-up; cells already holding features are left as they are.
    pub fn patch_partially_empty_nodes(&mut self, max_size: f64) {
        self.patch(CellId::ROOT, PatchRule::PartiallyEmpty { max_size });
    }

    /// Like [`patch_partially_empty_nodes`](Self::patch_partially_empty_nodes), but also patches
    /// a cell when one of its leaf children holds fewer than `lower_threshold` features.
    pub fn patch_sparse_nodes(&mut self, max_size: f64, lower_threshold: usize) {
        self.patch(
            CellId::ROOT,
            PatchRule::Sparse {
                max_size,
                lower_threshold,
            },
        );
    }

    /// Drop the features of every internal cell, undoing all patches.
    pub fn clear_patches(&mut self) {
        for cell in self.cells.iter_mut().filter(|c| !c.is_leaf) {
            cell.features.clear();
        }
    }

    /// Patch the subtree under `id` and return its feature union.
    fn patch(&mut self, id: CellId, rule: PatchRule) -> Vec<FeatureRef> {
        let node = &self.cells[id.index()];
        if node.is_leaf {
            return node.features.clone();
        }
        let children: SmallVec<[CellId; 4]> = node.children().collect();

        let mut union = Vec::new();
        let mut seen = HashSet::new();
        for &child in &children {
            for r in self.patch(child, rule) {
                if seen.insert(r) {
                    union.push(r);
                }
            }
        }

        let node = &self.cells[id.index()];
        if !node.features.is_empty() {
            return node.features.clone();
        }
        let triggered = match rule {
            PatchRule::PartiallyEmpty { max_size } => {
                node.extent.width() <= max_size && children.len() < 4
            }
            PatchRule::Sparse {
                max_size,
                lower_threshold,
            } => {
                node.extent.width() <= max_size
                    && (children.len() < 4
                        || children.iter().any(|c| {
                            let c = &self.cells[c.index()];
                            c.is_leaf && c.features.len() < lower_threshold
                        }))
            }
        };
        if triggered {
            trace!(path = %node.path, features = union.len(), "patching cell");
            self.cells[id.index()].features = union.clone();
        }
        union
    }

    /// Visit every cell in pre-order. Returning `true` skips the visited cell's subtree.
    pub fn visit<F: FnMut(CellId, &Cell) -> bool>(&self, mut f: F) {
        let mut stack = vec![CellId::ROOT];
        while let Some(id) = stack.pop() {
            let cell = &self.cells[id.index()];
            if f(id, cell) {
                continue;
            }
            // Reversed so that quadrant 0 is popped first.
            stack.extend(cell.children.iter().rev().flatten());
        }
    }

    /// Visit, in pre-order, only the cells holding features. Empty cells are walked through.
    /// Returning `true` skips the visited cell's subtree.
    pub fn visit_non_empty<F: FnMut(CellId, &Cell) -> bool>(&self, mut f: F) {
        self.visit(|id, cell| !cell.features.is_empty() && f(id, cell));
    }
}
