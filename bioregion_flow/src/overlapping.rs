// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Aggregation of state-node flow for cells that belong to several bioregions at once.

use alloc::string::String;
use alloc::vec::Vec;

use smallvec::SmallVec;

use crate::BioregionId;
use crate::ranking::{FlowTable, TopBioregions};

/// Flow of the state nodes of one cell, grouped by the bioregion each state node was assigned.
///
/// With a memory (state) network a single cell can be represented by several state nodes that end
/// up in different bioregions. Each one is reported through [`add_state_node`], and
/// [`calc_top_bioregions`] reduces them to the two dominant bioregions, which is what pie-chart
/// renderings of overlapping cells display.
///
/// ```rust
/// use bioregion_flow::{BioregionId, OverlappingBioregions};
///
/// let mut cell = OverlappingBioregions::new();
/// cell.add_state_node(BioregionId(1), 0.6, "a");
/// cell.add_state_node(BioregionId(2), 0.4, "b");
/// cell.calc_top_bioregions();
/// assert_eq!(cell.top_bioregion_id(), Some(BioregionId(1)));
/// assert_eq!(cell.second_bioregion_id(), Some(BioregionId(2)));
/// ```
///
/// [`add_state_node`]: OverlappingBioregions::add_state_node
/// [`calc_top_bioregions`]: OverlappingBioregions::calc_top_bioregions
#[derive(Clone, Debug, Default)]
pub struct OverlappingBioregions {
    flow: FlowTable,
    // Parallel to the slots of `flow`.
    state_names: Vec<SmallVec<[String; 1]>>,
    top: TopBioregions,
}

impl OverlappingBioregions {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a state node of this cell with its `flow`, assigned to `bioregion`.
    pub fn add_state_node(&mut self, bioregion: BioregionId, flow: f64, state_name: &str) {
        let slot = self.flow.add(bioregion, flow);
        if slot == self.state_names.len() {
            self.state_names.push(SmallVec::new());
        }
        self.state_names[slot].push(String::from(state_name));
    }

    /// Rank the accumulated flow. Call after every state node of the cell was added.
    pub fn calc_top_bioregions(&mut self) -> TopBioregions {
        self.top = self.flow.rank();
        self.top
    }

    /// The summary computed by the last [`calc_top_bioregions`](Self::calc_top_bioregions).
    pub fn top_bioregions(&self) -> TopBioregions {
        self.top
    }

    /// Bioregion with the largest flow.
    pub fn top_bioregion_id(&self) -> Option<BioregionId> {
        self.top.top_id()
    }

    /// Share of the total flow in the dominant bioregion.
    pub fn top_bioregion_proportion(&self) -> f64 {
        self.top.top_proportion()
    }

    /// Bioregion with the second largest flow (the top one if it is alone).
    pub fn second_bioregion_id(&self) -> Option<BioregionId> {
        self.top.second_id()
    }

    /// Share of the total flow in the runner-up bioregion.
    pub fn second_bioregion_proportion(&self) -> f64 {
        self.top.second_proportion()
    }

    /// Total flow added so far.
    pub fn total_flow(&self) -> f64 {
        self.flow.total()
    }

    /// Number of distinct bioregions touching the cell.
    pub fn len(&self) -> usize {
        self.flow.len()
    }

    /// Whether no state node was added.
    pub fn is_empty(&self) -> bool {
        self.flow.len() == 0
    }

    /// Accumulated flow per bioregion, in first-seen order.
    pub fn bioregions(&self) -> impl Iterator<Item = (BioregionId, f64)> + '_ {
        self.flow.iter()
    }

    /// Names of the state nodes that contributed to `bioregion`.
    pub fn state_names(&self, bioregion: BioregionId) -> &[String] {
        self.flow
            .slot_of(bioregion)
            .map(|slot| self.state_names[slot].as_slice())
            .unwrap_or(&[])
    }

    /// Forget all contributions and the last ranking.
    pub fn clear(&mut self) {
        self.flow.clear();
        self.state_names.clear();
        self.top = TopBioregions::default();
    }
}
