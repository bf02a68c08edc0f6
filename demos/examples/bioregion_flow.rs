// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bioregion flow.
//!
//! Load a binner configuration from TOML, bin a synthetic data set, assign bioregions with a
//! stand-in for the clustering step, and report cells that disagree with their neighbours.
//!
//! Run:
//! - `cargo run -p bioregion_demos --example bioregion_flow`

use bioregion_binner::{BinnerConfig, CellId, Feature, QuadtreeGeoBinner};
use bioregion_flow::BioregionId;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
extent = [-20.0, 30.0, 40.0, 70.0]
max_cell_size_log2 = 3
min_cell_size_log2 = -1
max_cell_capacity = 6
min_cell_capacity = 2
patch_sparse_nodes = true
"#;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config: BinnerConfig = toml::from_str(CONFIG).unwrap();
    info!(?config, "loaded configuration");
    let mut binner = QuadtreeGeoBinner::new(config).unwrap();

    // A west-east gradient: one species set west of 10 degrees east, another east of it, with
    // a mixed strip in between.
    let mut seed = 0x9E37_79B9_7F4A_7C15_u64;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        (seed >> 11) as f64 / (1u64 << 53) as f64
    };
    for i in 0..600 {
        let lon = -15.0 + next() * 50.0;
        let lat = 35.0 + next() * 30.0;
        let west = if (8.0..12.0).contains(&lon) {
            i % 2 == 0
        } else {
            lon < 10.0
        };
        let name = if west {
            ["Ulex europaeus", "Erica cinerea"][i % 2]
        } else {
            ["Pinus sylvestris", "Vaccinium uliginosum"][i % 2]
        };
        binner.add_feature(Feature::point(name, lon, lat)).unwrap();
    }

    let cells = binner.rebuild().unwrap().to_vec();
    info!(cells = cells.len(), "binned");

    // Stand-in for clustering: the majority species group decides the bioregion.
    let bioregion_of = |binner: &QuadtreeGeoBinner, id: CellId| {
        let cell = binner.cell(id).unwrap();
        let western: usize = cell
            .species_top_list()
            .iter()
            .filter(|s| s.name == "Ulex europaeus" || s.name == "Erica cinerea")
            .map(|s| s.count)
            .sum();
        let total: usize = cell.species_top_list().iter().map(|s| s.count).sum();
        if 2 * western >= total {
            BioregionId(1)
        } else {
            BioregionId(2)
        }
    };
    let assigned: Vec<_> = cells.iter().map(|&id| (id, bioregion_of(&binner, id))).collect();
    for &(id, bioregion) in &assigned {
        binner.assign_bioregion(id, bioregion);
        let overlapping = binner.overlapping_mut(id).unwrap();
        overlapping.add_state_node(bioregion, 1.0, "state");
    }

    // Links between cells whose extents touch, weighted by the shared edge length.
    for &(a, _) in &assigned {
        let ea = binner.cell(a).unwrap().extent();
        for &(b, region_b) in &assigned {
            if a == b {
                continue;
            }
            let eb = binner.cell(b).unwrap().extent();
            let dx = ea.east.min(eb.east) - ea.west.max(eb.west);
            let dy = ea.north.min(eb.north) - ea.south.max(eb.south);
            let shared = if dx == 0.0 { dy } else if dy == 0.0 { dx } else { 0.0 };
            if shared > 0.0 {
                binner.connected_mut(a).unwrap().add_link(region_b, shared);
            }
        }
    }
    binner.calc_top_bioregions();

    let mut outliers = 0;
    for (id, cell) in binner.iter_cells() {
        let connected = cell.connected_bioregions();
        if connected.not_top_bioregion() {
            outliers += 1;
            println!(
                "{id:?} path={} own={:?} top={:?} own share {:.2}",
                cell.path(),
                cell.bioregion_id(),
                connected.top_bioregion_id(),
                connected.own_proportion()
            );
        }
    }
    println!("{outliers} of {} cells disagree with their neighbours", cells.len());
}
