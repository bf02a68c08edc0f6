// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binner basics.
//!
//! Bin a handful of occurrences, list the cells, then lower the capacity and rebuild.
//!
//! Run:
//! - `cargo run -p bioregion_demos --example binner_basics`
//! - `RUST_LOG=bioregion_binner=trace cargo run -p bioregion_demos --example binner_basics`

use bioregion_binner::{BinnerConfig, Feature, QuadtreeGeoBinner};
use kurbo::Point;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let mut binner = QuadtreeGeoBinner::new(BinnerConfig {
        max_cell_size_log2: 6,
        min_cell_size_log2: 0,
        max_cell_capacity: 4,
        min_cell_capacity: 1,
        ..BinnerConfig::default()
    })
    .unwrap();

    // Heathland species around the North Sea, plus one range polygon.
    let features = [
        Feature::point("Calluna vulgaris", 5.2, 52.1),
        Feature::point("Calluna vulgaris", 5.4, 52.3),
        Feature::point("Erica tetralix", 5.3, 52.2),
        Feature::point("Erica tetralix", 8.9, 55.6),
        Feature::point("Empetrum nigrum", 9.1, 55.7),
        Feature::point("Empetrum nigrum", -3.2, 57.1),
        Feature::point("Calluna vulgaris", -3.4, 57.0),
        Feature::polygon(
            "Myrica gale",
            vec![vec![
                Point::new(4.0, 51.0),
                Point::new(10.0, 51.0),
                Point::new(10.0, 56.0),
                Point::new(4.0, 56.0),
                Point::new(4.0, 51.0),
            ]],
        ),
    ];
    for feature in features {
        if let Err(err) = binner.add_feature(feature) {
            eprintln!("skipping feature: {err}");
        }
    }

    binner.rebuild().unwrap();
    println!("{} cells, tree depth {}", binner.cell_count(), binner.max_depth());
    for (id, cell) in binner.iter_cells() {
        let e = cell.extent();
        println!(
            "  {:?} path={} [{:.3}, {:.3}, {:.3}, {:.3}] features={}",
            id,
            cell.path(),
            e.west,
            e.south,
            e.east,
            e.north,
            cell.features().len()
        );
        for species in cell.species_top_list() {
            println!("    {} x{}", species.name, species.count);
        }
    }

    // Capacity changes only regenerate the list; the tree keeps its splits until rebuilt.
    binner.set_max_cell_capacity(2).unwrap();
    println!("after capacity change: {:?}", binner.state());
    binner.generate_tree().unwrap();
    binner.generate_cells().unwrap();
    println!("{} cells after regenerating the tree", binner.cell_count());

    for species in binner.species_counts() {
        println!("{} occurs in {} cells", species.name, species.count);
    }
}
