//! Example that builds a place list under the `compact` policy and prints
//! each place's affinity mask.

use omp_topology::{build_places, AffinityConfig, AffinityType, LayerKind};

fn main() {
    env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .init();

    let ctx = match omp_topology::topology_context() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error discovering topology: {e}");
            return;
        }
    };

    let mut topo = ctx.topology.clone();
    let mut config = AffinityConfig::new(AffinityType::Compact, LayerKind::Core);
    if let Err(e) = build_places(&mut topo, &mut config) {
        eprintln!("Error building places: {e}");
        return;
    }

    println!("Place list ({} places):", config.num_masks);
    for (i, (mask, summary)) in config.masks.iter().zip(config.summaries.iter()).enumerate() {
        let ids = summary.ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join("/");
        println!("  place {i}: {mask} (ids=[{ids}], core_type={})", summary.attrs.core_type);
    }
}
