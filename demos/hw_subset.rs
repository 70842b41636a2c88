//! Example that applies an `HW_SUBSET` filter to the discovered topology and
//! reports the resulting shape.

use omp_topology::parse_hw_subset;

fn main() {
    env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .init();

    let subset_text = std::env::args().nth(1).unwrap_or_else(|| "1@0 sockets, 4 cores".to_string());

    let items = match parse_hw_subset(&subset_text) {
        Ok(items) => items,
        Err(e) => {
            eprintln!("Error parsing HW_SUBSET '{subset_text}': {e}");
            return;
        }
    };

    let ctx = match omp_topology::topology_context() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error discovering topology: {e}");
            return;
        }
    };

    let mut topo = ctx.topology.clone();
    println!("Before subset: {} packages, {} cores, {} threads", topo.num_packages(), topo.num_cores(), topo.num_threads());

    if let Err(e) = omp_topology::apply_subset(&mut topo, &items) {
        eprintln!("Error applying subset '{subset_text}': {e}");
        return;
    }

    println!("After subset '{subset_text}': {} packages, {} cores, {} threads", topo.num_packages(), topo.num_cores(), topo.num_threads());
    println!("Uniform: {}", topo.uniform);
}
