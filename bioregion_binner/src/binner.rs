// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The binner: configuration, feature ownership and the derived cell list.

use alloc::{string::String, vec::Vec};
use core::fmt;

use bioregion_flow::{BioregionId, ConnectedBioregions, OverlappingBioregions};
use hashbrown::{HashMap, HashSet};
use tracing::debug;

use crate::cell::{Cell, CellId, CellTree, SizeLimits, SpeciesCount};
use crate::error::{BinError, ConfigError};
use crate::extent::Extent;
use crate::feature::{Feature, FeatureId, FeatureRef, Shape};

/// Binning parameters.
///
/// Cell sizes are log2 of the cell edge length in units of `1 / scale` degrees, so with the
/// default `scale` of 1 a `max_cell_size_log2` of 4 allows cells up to 16 degrees across.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct BinnerConfig {
    /// Region to bin. Squared before use.
    pub extent: Extent,
    /// Cells larger than `2^max_cell_size_log2` always subdivide.
    pub max_cell_size_log2: i32,
    /// Cells at or below `2^min_cell_size_log2` never subdivide.
    pub min_cell_size_log2: i32,
    /// Features a cell buffers before it subdivides.
    pub max_cell_capacity: usize,
    /// Listed cells hold at least this many features. Also the sparse patch threshold.
    pub min_cell_capacity: usize,
    /// Units per degree of the size bounds, e.g. 60 for arc-minutes.
    pub scale: f64,
    /// Run [`CellTree::patch_sparse_nodes`] before listing cells.
    pub patch_sparse_nodes: bool,
    /// Run [`CellTree::patch_partially_empty_nodes`] before listing cells.
    pub patch_partially_empty_nodes: bool,
}

impl Default for BinnerConfig {
    fn default() -> Self {
        Self {
            extent: Extent::WORLD,
            max_cell_size_log2: 4,
            min_cell_size_log2: 0,
            max_cell_capacity: 100,
            min_cell_capacity: 10,
            scale: 1.0,
            patch_sparse_nodes: false,
            patch_partially_empty_nodes: false,
        }
    }
}

impl BinnerConfig {
    /// Check the bounds against each other.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.extent.is_valid() {
            return Err(ConfigError::InvalidExtent);
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ConfigError::InvalidScale(self.scale));
        }
        if self.min_cell_size_log2 > self.max_cell_size_log2 {
            return Err(ConfigError::SizeBoundsInverted {
                min: self.min_cell_size_log2,
                max: self.max_cell_size_log2,
            });
        }
        if self.max_cell_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.min_cell_capacity > self.max_cell_capacity {
            return Err(ConfigError::CapacityBoundsInverted {
                min: self.min_cell_capacity,
                max: self.max_cell_capacity,
            });
        }
        Ok(())
    }

    /// Edge lengths in degrees and the split capacity, as the tree applies them.
    pub fn size_limits(&self) -> SizeLimits {
        SizeLimits::from_log2(
            self.max_cell_size_log2,
            self.min_cell_size_log2,
            self.scale,
            self.max_cell_capacity,
        )
    }

    fn same_tree_as(&self, other: &Self) -> bool {
        self.extent == other.extent
            && self.scale == other.scale
            && self.max_cell_size_log2 == other.max_cell_size_log2
            && self.min_cell_size_log2 == other.min_cell_size_log2
    }
}

/// How much of the binner's derived data is out of date.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheState {
    /// Tree and cell list reflect the current features and configuration.
    Clean,
    /// The tree is current; the cell list needs [`QuadtreeGeoBinner::generate_cells`].
    CellsStale,
    /// The tree needs [`QuadtreeGeoBinner::generate_tree`], and then the cell list.
    TreeAndCellsStale,
}

/// Adaptive quadtree binning of species occurrences.
///
/// Holds the features, the [`CellTree`] built from them and the flat list of cells handed to
/// clustering. Adding features or changing the extent, scale or size bounds invalidates the tree;
/// changing the capacity bounds or patch toggles only invalidates the cell list, so an existing
/// tree is not re-split when the capacity changes. [`rebuild`](Self::rebuild) brings both up to date.
///
/// ```rust
/// use bioregion_binner::{BinnerConfig, CacheState, Feature, QuadtreeGeoBinner};
///
/// let mut binner = QuadtreeGeoBinner::new(BinnerConfig {
///     min_cell_capacity: 1,
///     ..BinnerConfig::default()
/// })
/// .unwrap();
/// binner.add_feature(Feature::point("Erica tetralix", 5.0, 52.0)).unwrap();
/// assert_eq!(binner.state(), CacheState::TreeAndCellsStale);
///
/// let cells = binner.rebuild().unwrap().to_vec();
/// assert_eq!(cells.len(), 1);
/// assert_eq!(binner.state(), CacheState::Clean);
/// ```
#[derive(Clone)]
pub struct QuadtreeGeoBinner {
    config: BinnerConfig,
    features: Vec<Feature>,
    tree: CellTree,
    cells: Vec<CellId>,
    state: CacheState,
}

impl fmt::Debug for QuadtreeGeoBinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuadtreeGeoBinner")
            .field("config", &self.config)
            .field("features", &self.features.len())
            .field("tree", &self.tree)
            .field("cells", &self.cells.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl QuadtreeGeoBinner {
    /// Create an empty binner. The configured extent is squared.
    pub fn new(mut config: BinnerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        config.extent = config.extent.squared();
        Ok(Self {
            tree: CellTree::new(config.extent),
            config,
            features: Vec::new(),
            cells: Vec::new(),
            state: CacheState::Clean,
        })
    }

    /// Current configuration, with the squared extent.
    pub fn config(&self) -> &BinnerConfig {
        &self.config
    }

    /// Cache state of the tree and cell list.
    pub fn state(&self) -> CacheState {
        self.state
    }

    /// Features in insertion order.
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Look up a feature.
    pub fn feature(&self, id: FeatureId) -> Option<&Feature> {
        self.features.get(id.index())
    }

    /// Add a feature after checking it can be binned. Invalidates the tree.
    ///
    /// The feature is binned by the next [`generate_tree`](Self::generate_tree), together with
    /// every other feature and under the configuration current at that point.
    pub fn add_feature(&mut self, feature: Feature) -> Result<FeatureId, BinError> {
        feature.validate()?;
        if !Shape::of(&feature, None)?.intersects(&self.config.extent) {
            return Err(BinError::OutsideExtent {
                name: feature.properties.name,
            });
        }
        let id = FeatureId::new(self.features.len());
        self.features.push(feature);
        self.state = CacheState::TreeAndCellsStale;
        Ok(id)
    }

    /// Add features in order, stopping at the first one that cannot be binned.
    ///
    /// Features before the failing one stay added. Loop over
    /// [`add_feature`](Self::add_feature) to skip bad features instead.
    pub fn add_features(
        &mut self,
        features: impl IntoIterator<Item = Feature>,
    ) -> Result<(), BinError> {
        for feature in features {
            self.add_feature(feature)?;
        }
        Ok(())
    }

    /// Remove all features, leaving an empty root.
    pub fn clear_features(&mut self) {
        if self.features.is_empty() {
            return;
        }
        self.features.clear();
        self.tree = CellTree::new(self.config.extent);
        self.cells.clear();
        self.state = CacheState::Clean;
    }

    /// Replace the whole configuration, invalidating only what the change affects.
    pub fn set_config(&mut self, mut config: BinnerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        config.extent = config.extent.squared();
        if config == self.config {
            return Ok(());
        }
        if config.same_tree_as(&self.config) {
            self.invalidate_cells();
        } else {
            self.state = CacheState::TreeAndCellsStale;
        }
        self.config = config;
        Ok(())
    }

    fn invalidate_cells(&mut self) {
        if self.state == CacheState::Clean {
            self.state = CacheState::CellsStale;
        }
    }

    fn reconfigure(&mut self, f: impl FnOnce(&mut BinnerConfig)) -> Result<(), ConfigError> {
        let mut config = self.config.clone();
        f(&mut config);
        self.set_config(config)
    }

    /// Change the binned region. Invalidates the tree.
    pub fn set_extent(&mut self, extent: Extent) -> Result<(), ConfigError> {
        self.reconfigure(|c| c.extent = extent)
    }

    /// Change the unit scale of the size bounds. Invalidates the tree.
    pub fn set_scale(&mut self, scale: f64) -> Result<(), ConfigError> {
        self.reconfigure(|c| c.scale = scale)
    }

    /// Invalidates the tree.
    pub fn set_max_cell_size_log2(&mut self, value: i32) -> Result<(), ConfigError> {
        self.reconfigure(|c| c.max_cell_size_log2 = value)
    }

    /// Invalidates the tree.
    pub fn set_min_cell_size_log2(&mut self, value: i32) -> Result<(), ConfigError> {
        self.reconfigure(|c| c.min_cell_size_log2 = value)
    }

    /// Change both size bounds at once, so they may cross their old values. Invalidates the tree.
    pub fn set_cell_size_log2_bounds(&mut self, min: i32, max: i32) -> Result<(), ConfigError> {
        self.reconfigure(|c| {
            c.min_cell_size_log2 = min;
            c.max_cell_size_log2 = max;
        })
    }

    /// Invalidates the cell list only; the current tree keeps its splits.
    pub fn set_max_cell_capacity(&mut self, value: usize) -> Result<(), ConfigError> {
        self.reconfigure(|c| c.max_cell_capacity = value)
    }

    /// Invalidates the cell list only.
    pub fn set_min_cell_capacity(&mut self, value: usize) -> Result<(), ConfigError> {
        self.reconfigure(|c| c.min_cell_capacity = value)
    }

    /// Change both capacity bounds at once. Invalidates the cell list only.
    pub fn set_cell_capacity_bounds(&mut self, min: usize, max: usize) -> Result<(), ConfigError> {
        self.reconfigure(|c| {
            c.min_cell_capacity = min;
            c.max_cell_capacity = max;
        })
    }

    /// Invalidates the cell list only.
    pub fn set_patch_sparse_nodes(&mut self, enabled: bool) {
        if self.config.patch_sparse_nodes != enabled {
            self.config.patch_sparse_nodes = enabled;
            self.invalidate_cells();
        }
    }

    /// Invalidates the cell list only.
    pub fn set_patch_partially_empty_nodes(&mut self, enabled: bool) {
        if self.config.patch_partially_empty_nodes != enabled {
            self.config.patch_partially_empty_nodes = enabled;
            self.invalidate_cells();
        }
    }

    /// Rebuild the tree from scratch, inserting every feature in insertion order.
    ///
    /// Fails with [`BinError::OutsideExtent`] when an extent change left a feature outside the
    /// root; the tree then stays stale.
    pub fn generate_tree(&mut self) -> Result<(), BinError> {
        let limits = self.config.size_limits();
        let mut tree = CellTree::new(self.config.extent);
        for index in 0..self.features.len() {
            let r = FeatureRef::whole(FeatureId::new(index));
            tree.insert(r, &self.features, limits)?;
        }
        debug!(
            features = self.features.len(),
            cells = tree.len(),
            depth = tree.max_depth(),
            "generated tree"
        );
        self.tree = tree;
        self.cells.clear();
        self.state = CacheState::CellsStale;
        Ok(())
    }

    /// Regenerate the cell list, rebuilding the tree first if it is stale.
    ///
    /// Previous patches are undone and the enabled patch passes run again. The list then holds,
    /// in pre-order, the topmost cells holding features; those with fewer than
    /// `min_cell_capacity` features are dropped together with their subtrees.
    pub fn generate_cells(&mut self) -> Result<&[CellId], BinError> {
        if self.state == CacheState::TreeAndCellsStale {
            self.generate_tree()?;
        }
        let SizeLimits { max_size, .. } = self.config.size_limits();
        let min_capacity = self.config.min_cell_capacity;

        self.tree.clear_patches();
        if self.config.patch_partially_empty_nodes {
            self.tree.patch_partially_empty_nodes(max_size);
        }
        if self.config.patch_sparse_nodes {
            self.tree.patch_sparse_nodes(max_size, min_capacity);
        }

        let mut cells = Vec::new();
        let mut dropped = 0_usize;
        self.tree.visit_non_empty(|id, cell| {
            if cell.features().len() >= min_capacity {
                cells.push(id);
            } else {
                dropped += 1;
            }
            true
        });

        for cell in self.tree.cells_mut() {
            cell.species_top_list.clear();
        }
        for &id in &cells {
            if let Some(cell) = self.tree.get_mut(id) {
                cell.species_top_list = species_top_list(cell.features(), &self.features);
            }
        }

        debug!(kept = cells.len(), dropped, "generated cells");
        self.cells = cells;
        self.state = CacheState::Clean;
        Ok(&self.cells)
    }

    /// Bring the tree and the cell list up to date and return the list.
    pub fn rebuild(&mut self) -> Result<&[CellId], BinError> {
        if self.state != CacheState::Clean {
            self.generate_cells()?;
        }
        Ok(&self.cells)
    }

    /// The list from the last [`generate_cells`](Self::generate_cells).
    ///
    /// Check [`state`](Self::state) or call [`rebuild`](Self::rebuild) to get a current list.
    pub fn cells(&self) -> &[CellId] {
        &self.cells
    }

    /// Listed cells with their ids, in list order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (CellId, &Cell)> + '_ {
        self.cells
            .iter()
            .filter_map(|&id| self.tree.get(id).map(|cell| (id, cell)))
    }

    /// Look up any cell of the tree.
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.tree.get(id)
    }

    /// The tree itself.
    pub fn tree(&self) -> &CellTree {
        &self.tree
    }

    /// Number of listed cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Depth of the deepest cell in the tree.
    pub fn max_depth(&self) -> usize {
        self.tree.max_depth()
    }

    /// Listed cells by species name, in list order.
    pub fn name_to_cell_ids(&self) -> HashMap<String, Vec<CellId>> {
        let mut map: HashMap<String, Vec<CellId>> = HashMap::new();
        for (id, cell) in self.iter_cells() {
            for species in cell.species_top_list() {
                map.entry(species.name.clone()).or_default().push(id);
            }
        }
        map
    }

    /// Number of listed cells each species occurs in, most widespread first.
    ///
    /// Counted per cell, so a polygon duplicated across sibling cells counts once per cell.
    pub fn species_counts(&self) -> Vec<SpeciesCount> {
        let mut counts: Vec<SpeciesCount> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        for (_, cell) in self.iter_cells() {
            for species in cell.species_top_list() {
                let slot = *slots.entry(species.name.as_str()).or_insert_with(|| {
                    counts.push(SpeciesCount {
                        name: species.name.clone(),
                        count: 0,
                    });
                    counts.len() - 1
                });
                counts[slot].count += 1;
            }
        }
        counts.sort_by(|a, b| b.count.cmp(&a.count));
        counts
    }

    /// Record the bioregion clustering assigned to a cell. Unknown ids are ignored.
    pub fn assign_bioregion(&mut self, id: CellId, bioregion: BioregionId) {
        if let Some(cell) = self.tree.get_mut(id)
            && cell.bioregion_id != Some(bioregion)
        {
            cell.bioregion_id = Some(bioregion);
            cell.connected.set_own_bioregion(bioregion);
        }
    }

    /// State-node flow aggregator of a cell, for the clustering step to fill.
    pub fn overlapping_mut(&mut self, id: CellId) -> Option<&mut OverlappingBioregions> {
        self.tree.get_mut(id).map(|cell| &mut cell.overlapping)
    }

    /// Link flow aggregator of a cell, for the clustering step to fill.
    pub fn connected_mut(&mut self, id: CellId) -> Option<&mut ConnectedBioregions> {
        self.tree.get_mut(id).map(|cell| &mut cell.connected)
    }

    /// Rank both aggregators of every listed cell.
    pub fn calc_top_bioregions(&mut self) {
        for &id in &self.cells {
            if let Some(cell) = self.tree.get_mut(id) {
                cell.overlapping.calc_top_bioregions();
                cell.connected.calc_top_bioregions();
            }
        }
    }

    /// Forget all bioregion assignments and flow, e.g. before clustering again.
    pub fn reset_bioregions(&mut self) {
        for cell in self.tree.cells_mut() {
            cell.bioregion_id = None;
            cell.overlapping = OverlappingBioregions::new();
            cell.connected = ConnectedBioregions::new();
        }
    }
}

/// Distinct features per species name, most frequent first, ties in first-seen order.
fn species_top_list(refs: &[FeatureRef], features: &[Feature]) -> Vec<SpeciesCount> {
    let mut seen = HashSet::new();
    let mut list: Vec<SpeciesCount> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();
    for r in refs {
        if !seen.insert(r.feature()) {
            continue;
        }
        let name = features[r.feature().index()].name();
        let slot = *slots.entry(name).or_insert_with(|| {
            list.push(SpeciesCount {
                name: name.into(),
                count: 0,
            });
            list.len() - 1
        });
        list[slot].count += 1;
    }
    list.sort_by(|a, b| b.count.cmp(&a.count));
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Geometry, Polygon};
    use alloc::vec;
    use kurbo::Point;

    /// Deterministic xorshift64 generator for reproducible feature sets.
    struct XorShift(u64);

    impl XorShift {
        #[allow(
            clippy::cast_precision_loss,
            reason = "Only the top 53 bits are used."
        )]
        fn next_f64(&mut self) -> f64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            (x >> 11) as f64 / (1_u64 << 53) as f64
        }

        fn range(&mut self, lo: f64, hi: f64) -> f64 {
            lo + (hi - lo) * self.next_f64()
        }
    }

    const NAMES: [&str; 5] = [
        "Calluna vulgaris",
        "Erica tetralix",
        "Vaccinium myrtillus",
        "Empetrum nigrum",
        "Quercus robur",
    ];

    fn random_points(seed: u64, n: usize) -> Vec<Feature> {
        let mut rng = XorShift(seed);
        (0..n)
            .map(|i| {
                // Cluster half of the points so that some cells hit the size floor.
                let (x, y) = if i % 2 == 0 {
                    (rng.range(10.0, 12.0), rng.range(50.0, 52.0))
                } else {
                    (rng.range(-180.0, 180.0), rng.range(-90.0, 90.0))
                };
                Feature::point(NAMES[i % NAMES.len()], x, y)
            })
            .collect()
    }

    fn square(name: &str, west: f64, south: f64, east: f64, north: f64) -> Feature {
        Feature::polygon(
            name,
            vec![vec![
                Point::new(west, south),
                Point::new(east, south),
                Point::new(east, north),
                Point::new(west, north),
                Point::new(west, south),
            ]],
        )
    }

    fn binner(config: BinnerConfig, features: Vec<Feature>) -> QuadtreeGeoBinner {
        let mut binner = QuadtreeGeoBinner::new(config).unwrap();
        binner.add_features(features).unwrap();
        binner
    }

    fn small_config() -> BinnerConfig {
        BinnerConfig {
            max_cell_size_log2: 4,
            min_cell_size_log2: -2,
            max_cell_capacity: 5,
            min_cell_capacity: 0,
            ..BinnerConfig::default()
        }
    }

    #[test]
    fn config_validation() {
        assert_eq!(BinnerConfig::default().validate(), Ok(()));
        let inverted = BinnerConfig {
            min_cell_size_log2: 5,
            ..BinnerConfig::default()
        };
        assert_eq!(
            inverted.validate(),
            Err(ConfigError::SizeBoundsInverted { min: 5, max: 4 })
        );
        let zero = BinnerConfig {
            max_cell_capacity: 0,
            min_cell_capacity: 0,
            ..BinnerConfig::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroCapacity));
        let capacity = BinnerConfig {
            max_cell_capacity: 5,
            ..BinnerConfig::default()
        };
        assert_eq!(
            capacity.validate(),
            Err(ConfigError::CapacityBoundsInverted { min: 10, max: 5 })
        );
        let scale = BinnerConfig {
            scale: 0.0,
            ..BinnerConfig::default()
        };
        assert_eq!(scale.validate(), Err(ConfigError::InvalidScale(0.0)));
        let extent = BinnerConfig {
            extent: Extent::new(0.0, 0.0, 0.0, 1.0),
            ..BinnerConfig::default()
        };
        assert_eq!(extent.validate(), Err(ConfigError::InvalidExtent));
    }

    #[test]
    fn extent_is_squared() {
        let binner = QuadtreeGeoBinner::new(BinnerConfig::default()).unwrap();
        assert_eq!(
            binner.config().extent,
            Extent::new(-180.0, -180.0, 180.0, 180.0)
        );
        assert_eq!(binner.tree().root().extent(), binner.config().extent);
    }

    #[test]
    fn scale_shifts_the_size_bounds() {
        let config = BinnerConfig {
            scale: 60.0,
            max_cell_size_log2: 6,
            min_cell_size_log2: 0,
            ..BinnerConfig::default()
        };
        let limits = config.size_limits();
        assert_eq!(limits.max_size, 64.0 / 60.0);
        assert_eq!(limits.min_size, 1.0 / 60.0);

        let mut binner = binner(config, vec![Feature::point("a", 10.0, 10.0)]);
        binner.rebuild().unwrap();
        binner.tree().visit(|_, cell| {
            if cell.is_leaf() {
                assert!(cell.size() <= 64.0 / 60.0);
                assert!(cell.size() > 32.0 / 60.0);
            }
            false
        });
    }

    #[test]
    fn state_transitions() {
        let mut binner = binner(small_config(), random_points(7, 50));
        assert_eq!(binner.state(), CacheState::TreeAndCellsStale);
        binner.rebuild().unwrap();
        assert_eq!(binner.state(), CacheState::Clean);

        binner.set_min_cell_capacity(2).unwrap();
        assert_eq!(binner.state(), CacheState::CellsStale);
        binner.set_scale(2.0).unwrap();
        assert_eq!(binner.state(), CacheState::TreeAndCellsStale);
        binner.set_patch_sparse_nodes(true);
        assert_eq!(
            binner.state(),
            CacheState::TreeAndCellsStale,
            "a cell-level change never downgrades a stale tree"
        );
        binner.generate_tree().unwrap();
        assert_eq!(binner.state(), CacheState::CellsStale);
        binner.generate_cells().unwrap();
        assert_eq!(binner.state(), CacheState::Clean);

        binner.add_feature(Feature::point("x", 1.0, 1.0)).unwrap();
        assert_eq!(binner.state(), CacheState::TreeAndCellsStale);
    }

    #[test]
    fn patch_toggles_only_invalidate_the_cell_list() {
        let mut binner = binner(small_config(), random_points(9, 30));
        binner.rebuild().unwrap();
        binner.set_patch_sparse_nodes(true);
        assert_eq!(binner.state(), CacheState::CellsStale);
        assert!(binner.config().patch_sparse_nodes);
        binner.generate_cells().unwrap();
        binner.set_patch_partially_empty_nodes(true);
        assert_eq!(binner.state(), CacheState::CellsStale);
        assert!(binner.config().patch_partially_empty_nodes);
        binner.generate_cells().unwrap();
        binner.set_patch_partially_empty_nodes(true);
        assert_eq!(binner.state(), CacheState::Clean);
    }

    #[test]
    fn unchanged_values_do_not_invalidate() {
        let mut binner = binner(small_config(), random_points(3, 20));
        binner.rebuild().unwrap();
        let config = binner.config().clone();
        binner.set_extent(Extent::WORLD).unwrap();
        binner.set_scale(config.scale).unwrap();
        binner.set_max_cell_size_log2(config.max_cell_size_log2).unwrap();
        binner.set_cell_capacity_bounds(0, 5).unwrap();
        binner.set_patch_partially_empty_nodes(false);
        assert_eq!(binner.state(), CacheState::Clean);
    }

    #[test]
    fn invalid_setters_leave_config_untouched() {
        let mut binner = QuadtreeGeoBinner::new(BinnerConfig::default()).unwrap();
        assert_eq!(
            binner.set_min_cell_size_log2(10),
            Err(ConfigError::SizeBoundsInverted { min: 10, max: 4 })
        );
        assert_eq!(binner.config().min_cell_size_log2, 0);
        binner.set_cell_size_log2_bounds(8, 10).unwrap();
        assert_eq!(binner.config().max_cell_size_log2, 10);
    }

    #[test]
    fn capacity_change_keeps_the_tree() {
        let mut binner = binner(small_config(), random_points(11, 80));
        binner.rebuild().unwrap();
        let cells_before = binner.tree().len();
        binner.set_max_cell_capacity(1).unwrap();
        binner.rebuild().unwrap();
        assert_eq!(binner.tree().len(), cells_before, "no retroactive re-split");
        binner.generate_tree().unwrap();
        assert!(binner.tree().len() > cells_before);
    }

    #[test]
    fn features_added_after_a_capacity_change_rebuild_the_tree() {
        let config = BinnerConfig {
            max_cell_size_log2: 8,
            min_cell_size_log2: -4,
            max_cell_capacity: 5,
            min_cell_capacity: 0,
            ..BinnerConfig::default()
        };
        let mut features: Vec<_> = (0..5)
            .map(|i| Feature::point("crowd", 10.0 + f64::from(i) * 0.5, 10.0))
            .collect();
        features.push(Feature::point("outlier", -120.0, -60.0));
        // Lands away from the crowd, whose cell was filled under the old capacity.
        let late = Feature::point("late", -100.0, -40.0);

        let mut reused = binner(config.clone(), features.clone());
        reused.rebuild().unwrap();
        reused.set_max_cell_capacity(1).unwrap();
        reused.add_feature(late.clone()).unwrap();
        assert_eq!(reused.state(), CacheState::TreeAndCellsStale);
        reused.rebuild().unwrap();

        let mut fresh = binner(
            BinnerConfig {
                max_cell_capacity: 1,
                ..config
            },
            features,
        );
        fresh.add_feature(late).unwrap();
        fresh.rebuild().unwrap();

        assert_eq!(reused.tree().len(), fresh.tree().len());
        assert_eq!(reused.cell_count(), fresh.cell_count());
        for (a, b) in reused.iter_cells().zip(fresh.iter_cells()) {
            assert_eq!(a.1.path(), b.1.path());
            assert_eq!(a.1.features(), b.1.features());
        }
        let min_size = reused.config().size_limits().min_size;
        for (_, cell) in reused.iter_cells() {
            assert!(cell.features().len() <= 1 || cell.size() <= min_size);
        }
    }

    #[test]
    fn identical_points_below_float_resolution_share_a_leaf() {
        for (x, y) in [(100.3, 40.7), (1.0, 1.0)] {
            let config = BinnerConfig {
                max_cell_size_log2: 4,
                min_cell_size_log2: -60,
                max_cell_capacity: 1,
                min_cell_capacity: 0,
                ..BinnerConfig::default()
            };
            let mut binner = binner(
                config,
                vec![Feature::point("a", x, y), Feature::point("b", x, y)],
            );
            let cells = binner.rebuild().unwrap().to_vec();
            assert_eq!(cells.len(), 1);
            let cell = binner.cell(cells[0]).unwrap();
            assert_eq!(cell.features().len(), 2);
            assert!(cell.is_leaf());
            assert!(cell.size() > binner.config().size_limits().min_size);
            assert!(!cell.extent().can_split());
            assert!(binner.max_depth() < 64);
        }
    }

    #[test]
    fn bad_features_are_rejected_at_the_call_site() {
        let mut binner = QuadtreeGeoBinner::new(small_config()).unwrap();
        binner.add_feature(Feature::point("a", 0.0, 0.0)).unwrap();
        let err = binner
            .add_features([
                Feature::point("b", 1.0, 1.0),
                Feature::new("c", Geometry::MultiPoint(vec![Point::ORIGIN])),
                Feature::point("d", 2.0, 2.0),
            ])
            .unwrap_err();
        assert!(matches!(err, BinError::UnsupportedGeometry { .. }));
        assert_eq!(binner.features().len(), 2);

        let mut narrow = QuadtreeGeoBinner::new(BinnerConfig {
            extent: Extent::new(0.0, 0.0, 10.0, 10.0),
            ..small_config()
        })
        .unwrap();
        assert_eq!(
            narrow.add_feature(Feature::point("e", 50.0, 50.0)),
            Err(BinError::OutsideExtent { name: "e".into() })
        );
        assert!(narrow.features().is_empty());
    }

    #[test]
    fn generate_tree_fails_when_extent_excludes_features() {
        let mut binner = binner(small_config(), vec![Feature::point("a", 100.0, 50.0)]);
        binner.rebuild().unwrap();
        binner.set_extent(Extent::new(-20.0, -20.0, 20.0, 20.0)).unwrap();
        assert_eq!(
            binner.generate_tree(),
            Err(BinError::OutsideExtent { name: "a".into() })
        );
        assert_eq!(binner.state(), CacheState::TreeAndCellsStale);
        binner.clear_features();
        assert_eq!(binner.state(), CacheState::Clean);
        assert_eq!(binner.tree().root().extent(), Extent::new(-20.0, -20.0, 20.0, 20.0));
    }

    #[test]
    fn sparse_cells_are_dropped_with_their_subtree() {
        let mut features = vec![Feature::point("lonely", -100.0, -50.0)];
        features.extend((0..6).map(|i| Feature::point("crowd", 10.0 + f64::from(i) * 0.1, 10.0)));
        let config = BinnerConfig {
            max_cell_size_log2: 9,
            min_cell_size_log2: 0,
            max_cell_capacity: 10,
            min_cell_capacity: 2,
            ..BinnerConfig::default()
        };
        let mut binner = binner(config, features);
        let cells = binner.rebuild().unwrap().to_vec();
        // Seven features fit the root, which is listed on its own.
        assert_eq!(cells, [CellId::ROOT]);

        binner.set_max_cell_capacity(3).unwrap();
        binner.generate_tree().unwrap();
        let cells = binner.generate_cells().unwrap().to_vec();
        assert!(!cells.is_empty());
        for &id in &cells {
            let cell = binner.cell(id).unwrap();
            assert!(cell.features().len() >= 2);
            assert_eq!(cell.species_top_list()[0].name, "crowd");
        }
    }

    #[test]
    fn every_listed_leaf_respects_capacity_or_size_floor() {
        for seed in [1, 2, 3, 42] {
            let config = small_config();
            let limits = config.size_limits();
            let mut binner = binner(config, random_points(seed, 300));
            binner.rebuild().unwrap();
            for (_, cell) in binner.iter_cells() {
                if cell.is_leaf() {
                    assert!(
                        cell.features().len() <= limits.capacity || cell.size() <= limits.min_size
                    );
                }
            }
            binner.tree().visit(|_, cell| {
                assert_eq!(cell.extent().width(), cell.extent().height());
                if cell.size() > limits.max_size {
                    assert!(!cell.is_leaf());
                }
                false
            });
        }
    }

    #[test]
    fn construction_is_deterministic() {
        let mut a = binner(small_config(), random_points(9, 200));
        let mut b = binner(small_config(), random_points(9, 200));
        a.rebuild().unwrap();
        b.rebuild().unwrap();
        assert_eq!(a.tree().len(), b.tree().len());
        let mut paths_a = Vec::new();
        a.tree().visit(|id, cell| {
            paths_a.push((id, cell.path().clone(), cell.features().to_vec()));
            false
        });
        let mut paths_b = Vec::new();
        b.tree().visit(|id, cell| {
            paths_b.push((id, cell.path().clone(), cell.features().to_vec()));
            false
        });
        assert_eq!(paths_a, paths_b);
    }

    #[test]
    fn unpatched_cells_hold_every_point_exactly_once() {
        let features = random_points(13, 250);
        let n = features.len();
        let mut binner = binner(small_config(), features);
        binner.rebuild().unwrap();
        let mut seen = vec![0_usize; n];
        binner.tree().visit_non_empty(|_, cell| {
            for r in cell.features() {
                seen[r.feature().index()] += 1;
            }
            false
        });
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn patches_follow_threshold_changes() {
        let mut binner = binner(small_config(), random_points(21, 150));
        binner.set_patch_sparse_nodes(true);
        binner.set_min_cell_capacity(3).unwrap();
        let first = binner.rebuild().unwrap().to_vec();
        let patched = first
            .iter()
            .filter(|&&id| binner.cell(id).unwrap().is_patched())
            .count();
        assert!(patched > 0);

        binner.set_patch_sparse_nodes(false);
        binner.rebuild().unwrap();
        assert!(binner.iter_cells().all(|(_, cell)| !cell.is_patched()));

        binner.set_patch_sparse_nodes(true);
        let again = binner.rebuild().unwrap().to_vec();
        assert_eq!(first, again);
    }

    /// Whether any listed cell lies inside the subtree of another listed cell.
    fn has_nested_cells(binner: &QuadtreeGeoBinner) -> bool {
        binner.cells().iter().any(|&id| {
            let mut parent = binner.cell(id).unwrap().parent();
            while let Some(p) = parent {
                if binner.cells().contains(&p) {
                    return true;
                }
                parent = binner.cell(p).unwrap().parent();
            }
            false
        })
    }

    #[test]
    fn partially_empty_patches_stand_in_for_their_subtree() {
        let config = BinnerConfig {
            extent: Extent::new(0.0, 0.0, 16.0, 16.0),
            max_cell_size_log2: 3,
            min_cell_size_log2: 0,
            max_cell_capacity: 1,
            min_cell_capacity: 1,
            ..BinnerConfig::default()
        };
        let features = vec![
            Feature::point("Calluna vulgaris", 1.0, 1.0),
            Feature::point("Erica tetralix", 3.0, 3.0),
            Feature::point("Calluna vulgaris", 12.0, 12.0),
        ];
        let mut binner = binner(config, features);
        let unpatched = binner.rebuild().unwrap().to_vec();
        assert_eq!(unpatched.len(), 3);

        binner.set_patch_partially_empty_nodes(true);
        let cells = binner.rebuild().unwrap().to_vec();
        let root = binner.tree().root();
        let south_west = root.child(0).unwrap();
        let north_east = root.child(3).unwrap();
        assert_eq!(cells, [south_west, north_east]);
        let patched = binner.cell(south_west).unwrap();
        assert!(patched.is_patched());
        let ids: Vec<_> = patched.features().iter().map(|r| r.feature().index()).collect();
        assert_eq!(ids, [0, 1]);
        assert_eq!(patched.species_top_list().len(), 2);
        assert!(!binner.cell(north_east).unwrap().is_patched());
        assert!(!has_nested_cells(&binner));
    }

    #[test]
    fn both_patch_passes_agree_with_the_sparse_pass() {
        let mut config = small_config();
        config.min_cell_capacity = 2;
        let mut sparse = binner(config.clone(), random_points(33, 200));
        sparse.set_patch_sparse_nodes(true);
        sparse.rebuild().unwrap();

        config.patch_sparse_nodes = true;
        config.patch_partially_empty_nodes = true;
        let mut both = binner(config, random_points(33, 200));
        let cells = both.rebuild().unwrap().to_vec();
        assert!(cells.iter().any(|&id| both.cell(id).unwrap().is_patched()));
        assert!(!has_nested_cells(&both));
        assert_eq!(cells, sparse.cells());
        for (a, b) in both.iter_cells().zip(sparse.iter_cells()) {
            assert_eq!(a.1.features(), b.1.features());
        }
    }

    #[test]
    fn species_statistics_count_each_feature_once_per_cell() {
        let multi = Feature::new(
            "Pinus",
            Geometry::MultiPolygon(vec![
                Polygon::new(vec![vec![
                    Point::new(1.0, 1.0),
                    Point::new(2.0, 1.0),
                    Point::new(2.0, 2.0),
                    Point::new(1.0, 1.0),
                ]]),
                Polygon::new(vec![vec![
                    Point::new(3.0, 3.0),
                    Point::new(4.0, 3.0),
                    Point::new(4.0, 4.0),
                    Point::new(3.0, 3.0),
                ]]),
            ]),
        );
        let features = vec![
            square("Betula", -60.0, -60.0, 60.0, 60.0),
            multi,
            Feature::point("Betula", 5.0, 5.0),
            Feature::point("Alnus", -5.0, -5.0),
        ];
        let config = BinnerConfig {
            max_cell_size_log2: 9,
            min_cell_size_log2: 5,
            max_cell_capacity: 2,
            min_cell_capacity: 1,
            ..BinnerConfig::default()
        };
        let mut binner = binner(config, features);
        binner.rebuild().unwrap();
        for (_, cell) in binner.iter_cells() {
            let pinus = cell
                .species_top_list()
                .iter()
                .find(|s| s.name == "Pinus")
                .map_or(0, |s| s.count);
            assert!(pinus <= 1, "parts of one feature count once");
        }
        let counts = binner.species_counts();
        assert_eq!(counts[0].name, "Betula");
        assert_eq!(counts[0].count, binner.cell_count());
        let by_name = binner.name_to_cell_ids();
        assert_eq!(by_name["Betula"].len(), binner.cell_count());
        assert_eq!(by_name["Alnus"].len(), 1);
    }

    #[test]
    fn species_top_list_is_sorted_stably() {
        let features = vec![
            Feature::point("b", 0.0, 0.0),
            Feature::point("a", 0.0, 0.0),
            Feature::point("a", 0.0, 0.0),
            Feature::point("c", 0.0, 0.0),
        ];
        let refs: Vec<_> = (0..features.len())
            .map(|i| FeatureRef::whole(FeatureId::new(i)))
            .collect();
        let list = species_top_list(&refs, &features);
        let names: Vec<_> = list.iter().map(|s| (s.name.as_str(), s.count)).collect();
        assert_eq!(names, [("a", 2), ("b", 1), ("c", 1)]);
    }

    #[test]
    fn bioregion_hooks() {
        let mut binner = binner(
            BinnerConfig {
                min_cell_capacity: 1,
                max_cell_capacity: 1,
                max_cell_size_log2: 9,
                ..BinnerConfig::default()
            },
            vec![
                Feature::point("a", -10.0, -10.0),
                Feature::point("b", 10.0, 10.0),
            ],
        );
        let cells = binner.rebuild().unwrap().to_vec();
        assert_eq!(cells.len(), 2);
        let (west, east) = (cells[0], cells[1]);

        binner.assign_bioregion(west, BioregionId(3));
        binner.assign_bioregion(east, BioregionId(1));
        let connected = binner.connected_mut(west).unwrap();
        connected.add_link(BioregionId(1), 5.0);
        let overlapping = binner.overlapping_mut(east).unwrap();
        overlapping.add_state_node(BioregionId(1), 0.6, "a");
        overlapping.add_state_node(BioregionId(2), 0.4, "b");
        binner.calc_top_bioregions();

        let west_cell = binner.cell(west).unwrap();
        assert_eq!(west_cell.bioregion_id(), Some(BioregionId(3)));
        assert!(west_cell.connected_bioregions().not_top_bioregion());
        assert_eq!(west_cell.connected_bioregions().own_proportion(), 0.0);
        let east_cell = binner.cell(east).unwrap();
        assert_eq!(
            east_cell.overlapping_bioregions().top_bioregion_id(),
            Some(BioregionId(1))
        );
        assert_eq!(
            east_cell.overlapping_bioregions().second_bioregion_proportion(),
            0.4
        );

        binner.reset_bioregions();
        assert_eq!(binner.cell(west).unwrap().bioregion_id(), None);
        assert_eq!(binner.cell(east).unwrap().overlapping_bioregions().len(), 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_loads_from_toml() {
        let config: BinnerConfig = toml::from_str(
            r#"
            extent = [-30.0, 30.0, 50.0, 75.0]
            max_cell_size_log2 = 3
            scale = 60.0
            patch_sparse_nodes = true
            "#,
        )
        .unwrap();
        assert_eq!(config.extent, Extent::new(-30.0, 30.0, 50.0, 75.0));
        assert_eq!(config.max_cell_size_log2, 3);
        assert_eq!(config.min_cell_capacity, 10);
        assert!(config.patch_sparse_nodes);
        assert!(QuadtreeGeoBinner::new(config).is_ok());
    }
}
