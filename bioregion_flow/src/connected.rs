// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flow from neighbouring cells, compared against the cell's own bioregion.

use crate::BioregionId;
use crate::ranking::{FlowTable, TopBioregions};

/// Link flow into one cell from its neighbours, grouped by the neighbours' bioregions.
///
/// After [`calc_top_bioregions`](Self::calc_top_bioregions), a cell whose own assignment is not
/// the flow-dominant one is flagged with [`not_top_bioregion`](Self::not_top_bioregion); such
/// cells sit on a boundary or are outliers, and renderers smooth them.
#[derive(Clone, Debug, Default)]
pub struct ConnectedBioregions {
    own: Option<BioregionId>,
    flow: FlowTable,
    top: TopBioregions,
    not_top_bioregion: bool,
    own_proportion: f64,
}

impl ConnectedBioregions {
    /// Create an empty aggregator with no own bioregion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bioregion the clustering assigned to this cell.
    pub fn set_own_bioregion(&mut self, bioregion: BioregionId) {
        self.own = Some(bioregion);
    }

    /// The bioregion the clustering assigned to this cell.
    pub fn own_bioregion(&self) -> Option<BioregionId> {
        self.own
    }

    /// Add `flow` along a link to a cell assigned to `bioregion`.
    pub fn add_link(&mut self, bioregion: BioregionId, flow: f64) {
        self.flow.add(bioregion, flow);
    }

    /// Rank the accumulated link flow and compare it with the own bioregion.
    ///
    /// Call after every link of the cell was added; earlier calls rank partial data.
    pub fn calc_top_bioregions(&mut self) -> TopBioregions {
        self.top = self.flow.rank();
        match self.own {
            Some(own) => {
                self.not_top_bioregion = self.top.top_id() != Some(own);
                self.own_proportion = self.flow.flow_of(own).unwrap_or(0.0) / self.flow.total();
            }
            None => {
                self.not_top_bioregion = false;
                self.own_proportion = 0.0;
            }
        }
        self.top
    }

    /// The summary computed by the last [`calc_top_bioregions`](Self::calc_top_bioregions).
    pub fn top_bioregions(&self) -> TopBioregions {
        self.top
    }

    /// Bioregion with the largest link flow.
    pub fn top_bioregion_id(&self) -> Option<BioregionId> {
        self.top.top_id()
    }

    /// Share of the link flow in the dominant bioregion.
    pub fn top_bioregion_proportion(&self) -> f64 {
        self.top.top_proportion()
    }

    /// Bioregion with the second largest link flow.
    pub fn second_bioregion_id(&self) -> Option<BioregionId> {
        self.top.second_id()
    }

    /// Share of the link flow in the runner-up bioregion.
    pub fn second_bioregion_proportion(&self) -> f64 {
        self.top.second_proportion()
    }

    /// Whether the own bioregion differs from the flow-dominant one.
    pub fn not_top_bioregion(&self) -> bool {
        self.not_top_bioregion
    }

    /// Share of the link flow supporting the own bioregion.
    ///
    /// `NaN` when the total flow is zero.
    pub fn own_proportion(&self) -> f64 {
        self.own_proportion
    }

    /// Total link flow added so far.
    pub fn total_flow(&self) -> f64 {
        self.flow.total()
    }

    /// Accumulated link flow per bioregion, in first-seen order.
    pub fn bioregions(&self) -> impl Iterator<Item = (BioregionId, f64)> + '_ {
        self.flow.iter()
    }

    /// Forget links and ranking, keeping the own bioregion.
    pub fn clear_links(&mut self) {
        self.flow.clear();
        self.top = TopBioregions::default();
        self.not_top_bioregion = false;
        self.own_proportion = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlier_cell_is_flagged() {
        let mut cell = ConnectedBioregions::new();
        cell.set_own_bioregion(BioregionId(3));
        cell.add_link(BioregionId(1), 5.0);
        cell.calc_top_bioregions();
        assert!(cell.not_top_bioregion());
        assert_eq!(cell.own_proportion(), 0.0);
        assert_eq!(cell.top_bioregion_id(), Some(BioregionId(1)));
    }

    #[test]
    fn agreeing_cell_reports_its_share() {
        let mut cell = ConnectedBioregions::new();
        cell.set_own_bioregion(BioregionId(2));
        cell.add_link(BioregionId(2), 3.0);
        cell.add_link(BioregionId(1), 1.0);
        cell.calc_top_bioregions();
        assert!(!cell.not_top_bioregion());
        assert!((cell.own_proportion() - 0.75).abs() < 1e-12);
        assert_eq!(cell.second_bioregion_id(), Some(BioregionId(1)));
    }

    #[test]
    fn minority_own_bioregion_is_not_top() {
        let mut cell = ConnectedBioregions::new();
        cell.set_own_bioregion(BioregionId(2));
        cell.add_link(BioregionId(1), 3.0);
        cell.add_link(BioregionId(2), 1.0);
        cell.calc_top_bioregions();
        assert!(cell.not_top_bioregion());
        assert!((cell.own_proportion() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn no_links_gives_nan_share() {
        let mut cell = ConnectedBioregions::new();
        cell.set_own_bioregion(BioregionId(1));
        cell.calc_top_bioregions();
        assert!(cell.not_top_bioregion());
        assert!(cell.own_proportion().is_nan());
    }

    #[test]
    fn without_own_bioregion_nothing_is_flagged() {
        let mut cell = ConnectedBioregions::new();
        cell.add_link(BioregionId(1), 1.0);
        cell.calc_top_bioregions();
        assert!(!cell.not_top_bioregion());
        assert_eq!(cell.own_proportion(), 0.0);
    }

    #[test]
    fn clear_links_keeps_own_bioregion() {
        let mut cell = ConnectedBioregions::new();
        cell.set_own_bioregion(BioregionId(4));
        cell.add_link(BioregionId(1), 1.0);
        cell.calc_top_bioregions();
        cell.clear_links();
        assert_eq!(cell.own_bioregion(), Some(BioregionId(4)));
        assert_eq!(cell.total_flow(), 0.0);
        assert_eq!(cell.top_bioregion_id(), None);
    }
}
