// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types for feature ingestion, binning and configuration.

use alloc::string::String;

use thiserror::Error;

use crate::feature::GeometryKind;

/// A feature could not be binned.
///
/// Binning is a deterministic in-memory transform, so every variant describes bad input and
/// retrying is pointless. Batch callers decide whether to skip the feature or abort.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum BinError {
    /// The feature carries no geometry at all.
    #[error("feature {name:?} has no geometry")]
    MissingGeometry {
        /// Species name of the feature.
        name: String,
    },
    /// Only `Point`, `Polygon` and `MultiPolygon` geometries can be binned.
    #[error("feature {name:?} has unsupported geometry type {kind}")]
    UnsupportedGeometry {
        /// Species name of the feature.
        name: String,
        /// The offending geometry type.
        kind: GeometryKind,
    },
    /// A coordinate is `NaN` or infinite.
    #[error("feature {name:?} has a non-finite coordinate")]
    NonFiniteCoordinate {
        /// Species name of the feature.
        name: String,
    },
    /// A polygon without rings, or with a ring of fewer than four positions.
    #[error("feature {name:?} has a degenerate polygon")]
    DegeneratePolygon {
        /// Species name of the feature.
        name: String,
    },
    /// The geometry does not touch the binning extent.
    #[error("feature {name:?} lies outside the binning extent")]
    OutsideExtent {
        /// Species name of the feature.
        name: String,
    },
    /// The binner configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A [`BinnerConfig`](crate::BinnerConfig) violates its bounds.
#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// `min_cell_size_log2 > max_cell_size_log2`.
    #[error("minimum cell size 2^{min} exceeds maximum cell size 2^{max}")]
    SizeBoundsInverted {
        /// Requested minimum, log2 of the cell edge.
        min: i32,
        /// Requested maximum, log2 of the cell edge.
        max: i32,
    },
    /// `max_cell_capacity` is zero.
    #[error("maximum cell capacity must be at least 1")]
    ZeroCapacity,
    /// `min_cell_capacity > max_cell_capacity`.
    #[error("minimum cell capacity {min} exceeds maximum cell capacity {max}")]
    CapacityBoundsInverted {
        /// Requested minimum capacity.
        min: usize,
        /// Requested maximum capacity.
        max: usize,
    },
    /// The unit scale is zero, negative or not finite.
    #[error("scale must be finite and positive, got {0}")]
    InvalidScale(f64),
    /// The extent is not finite or has no area.
    #[error("extent must be finite with east > west and north > south")]
    InvalidExtent,
}
