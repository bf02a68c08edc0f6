// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bioregion Binner: adaptive quadtree binning of species occurrences.
//!
//! Species occurrences (points) and ranges (polygons) are binned into square grid cells whose
//! size adapts to the data: dense regions get small cells, sparse regions large ones. The cells
//! are then handed to a community-detection step that groups them into bioregions.
//!
//! - [`QuadtreeGeoBinner`] owns the features and the [`BinnerConfig`], builds the tree and
//!   produces the flat cell list, tracking what is stale with a [`CacheState`].
//! - [`CellTree`] is the quadtree itself, an arena of square [`Cell`]s addressed by [`CellId`].
//!   Cells split when they exceed the maximum size or, above the minimum size, when they hold
//!   more features than the capacity allows.
//! - Polygons are routed into every child cell they geometrically intersect, so the same range
//!   can be held by several sibling cells. Statistics are computed per cell for that reason.
//! - Optional patch passes pull descendant features back up into partially empty or sparse
//!   internal cells, which then stand in for their whole subtree in the cell list.
//!
//! Each cell carries an [`OverlappingBioregions`](bioregion_flow::OverlappingBioregions) and a
//! [`ConnectedBioregions`](bioregion_flow::ConnectedBioregions) from the `bioregion_flow` crate,
//! filled in by the clustering step through the binner's hooks.
//!
//! Sizes are given as log2 of the cell edge in `1 / scale` degrees. The extent is squared before
//! use so that every cell is square; for the whole world the root split lines are the prime
//! meridian and the equator.
//!
//! ## Features
//!
//! - `std` *(default)*: use `std` in Kurbo. Disable and enable `libm` for `no_std` builds.
//! - `serde`: derive `Serialize`/`Deserialize` for [`BinnerConfig`] and [`Extent`].
//!
//! # Example
//!
//! ```rust
//! use bioregion_binner::{BinnerConfig, Feature, QuadtreeGeoBinner};
//!
//! let mut binner = QuadtreeGeoBinner::new(BinnerConfig {
//!     max_cell_size_log2: 2,
//!     min_cell_size_log2: 0,
//!     max_cell_capacity: 1,
//!     min_cell_capacity: 1,
//!     ..BinnerConfig::default()
//! })
//! .unwrap();
//!
//! binner
//!     .add_features([
//!         Feature::point("Calluna vulgaris", 0.1, 0.1),
//!         Feature::point("Erica tetralix", 0.1, 0.2),
//!         Feature::point("Calluna vulgaris", 50.0, 50.0),
//!     ])
//!     .unwrap();
//!
//! let cells = binner.rebuild().unwrap().to_vec();
//! assert_eq!(cells.len(), 2);
//!
//! // The two nearby points hit the size floor together.
//! let shared = binner.cell(cells[0]).unwrap();
//! assert_eq!(shared.features().len(), 2);
//! assert!(shared.size() <= 1.0);
//! ```
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod binner;
mod cell;
mod error;
mod extent;
mod feature;
mod util;

pub use binner::{BinnerConfig, CacheState, QuadtreeGeoBinner};
pub use cell::{Cell, CellId, CellPath, CellTree, SizeLimits, SpeciesCount};
pub use error::{BinError, ConfigError};
pub use extent::Extent;
pub use feature::{
    Feature, FeatureId, FeatureProperties, FeatureRef, Geometry, GeometryKind, Polygon,
};
