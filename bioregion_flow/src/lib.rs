// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bioregion Flow: per-cell summaries of community-detection flow.
//!
//! After an external community-detection step has assigned every grid cell to a bioregion, two
//! questions are asked per cell:
//!
//! - Which bioregions does the cell belong to, and in what proportion? With a memory network a
//!   cell is represented by several state nodes, each with its own flow and bioregion.
//!   [`OverlappingBioregions`] collects them.
//! - Does the cell agree with its surroundings? [`ConnectedBioregions`] collects link flow from
//!   neighbouring cells and flags cells whose own bioregion is not the flow-dominant one.
//!
//! Both reduce their input with a single streaming pass that keeps the two largest flows
//! ([`TopBioregions`]). Ties keep the earlier-inserted bioregion. A cell touched by one bioregion
//! only reports it in both slots with proportion `1.0`, and a cell with zero total flow reports
//! `NaN` proportions (callers guard that case).
//!
//! # Example
//!
//! ```rust
//! use bioregion_flow::{BioregionId, ConnectedBioregions};
//!
//! let mut cell = ConnectedBioregions::new();
//! cell.set_own_bioregion(BioregionId(3));
//! cell.add_link(BioregionId(1), 5.0);
//! cell.calc_top_bioregions();
//!
//! assert!(cell.not_top_bioregion());
//! assert_eq!(cell.own_proportion(), 0.0);
//! ```
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod connected;
mod overlapping;
mod ranking;

pub use connected::ConnectedBioregions;
pub use overlapping::OverlappingBioregions;
pub use ranking::{RankedBioregion, TopBioregions};

/// Identifier of a bioregion, as assigned by the clustering step.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BioregionId(pub u32);

impl From<u32> for BioregionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BioregionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
