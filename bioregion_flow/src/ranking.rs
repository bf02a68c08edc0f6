// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Flow accumulation and the streaming top-two ranking shared by the aggregators.

use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::BioregionId;

/// One ranked bioregion in a [`TopBioregions`] summary.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RankedBioregion {
    /// Bioregion identifier.
    pub id: BioregionId,
    /// Accumulated flow for this bioregion.
    pub flow: f64,
    /// `flow / total_flow`. `NaN` when the total flow is zero.
    pub proportion: f64,
}

/// Result of ranking the accumulated flow of a cell.
///
/// When only one bioregion contributed, `second` repeats `top`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TopBioregions {
    /// Bioregion carrying the largest flow.
    pub top: Option<RankedBioregion>,
    /// Bioregion carrying the second largest flow.
    pub second: Option<RankedBioregion>,
    /// Sum of all accumulated flow.
    pub total_flow: f64,
}

impl TopBioregions {
    /// Identifier of the flow-dominant bioregion.
    pub fn top_id(&self) -> Option<BioregionId> {
        self.top.map(|r| r.id)
    }

    /// Identifier of the runner-up bioregion.
    pub fn second_id(&self) -> Option<BioregionId> {
        self.second.map(|r| r.id)
    }

    /// Proportion of the dominant bioregion, `NaN` when nothing was ranked.
    pub fn top_proportion(&self) -> f64 {
        self.top.map_or(f64::NAN, |r| r.proportion)
    }

    /// Proportion of the runner-up bioregion, `NaN` when nothing was ranked.
    pub fn second_proportion(&self) -> f64 {
        self.second.map_or(f64::NAN, |r| r.proportion)
    }
}

/// Flow per bioregion, kept in first-seen order.
#[derive(Clone, Debug, Default)]
pub(crate) struct FlowTable {
    entries: Vec<(BioregionId, f64)>,
    slots: HashMap<BioregionId, usize>,
    total: f64,
}

impl FlowTable {
    /// Add `flow` to `id`, returning the entry's slot.
    pub(crate) fn add(&mut self, id: BioregionId, flow: f64) -> usize {
        self.total += flow;
        let entries = &mut self.entries;
        let slot = *self.slots.entry(id).or_insert_with(|| {
            entries.push((id, 0.0));
            entries.len() - 1
        });
        self.entries[slot].1 += flow;
        slot
    }

    pub(crate) fn slot_of(&self, id: BioregionId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    pub(crate) fn flow_of(&self, id: BioregionId) -> Option<f64> {
        self.slot_of(id).map(|slot| self.entries[slot].1)
    }

    pub(crate) fn total(&self) -> f64 {
        self.total
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (BioregionId, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.slots.clear();
        self.total = 0.0;
    }

    /// Single pass over the table keeping the two largest flows.
    ///
    /// Comparisons are strict, so on ties the earlier-inserted bioregion keeps its rank.
    pub(crate) fn rank(&self) -> TopBioregions {
        let mut top: Option<(BioregionId, f64)> = None;
        let mut second: Option<(BioregionId, f64)> = None;
        for &(id, flow) in &self.entries {
            match top {
                None => top = Some((id, flow)),
                Some((_, top_flow)) if flow > top_flow => {
                    second = top;
                    top = Some((id, flow));
                }
                _ => match second {
                    None => second = Some((id, flow)),
                    Some((_, second_flow)) if flow > second_flow => second = Some((id, flow)),
                    _ => {}
                },
            }
        }
        if second.is_none() {
            second = top;
        }
        let total = self.total;
        let ranked = |(id, flow): (BioregionId, f64)| RankedBioregion {
            id,
            flow,
            proportion: flow / total,
        };
        TopBioregions {
            top: top.map(ranked),
            second: second.map(ranked),
            total_flow: total,
        }
    }
}
