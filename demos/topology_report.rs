//! Example that discovers the machine topology and prints a summary report.

fn main() {
    env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .init();

    let topo = match omp_topology::topology() {
        Ok(topo) => topo,
        Err(e) => {
            eprintln!("Error discovering topology: {e}");
            return;
        }
    };

    println!("Topology report:");
    println!("----------------");
    println!("Layers (outermost to innermost): {}", topo.types.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(" > "));
    println!("Packages: {}", topo.num_packages());
    println!("Cores: {}", topo.num_cores());
    println!("Threads: {}", topo.num_threads());
    println!("Threads per core: {}", topo.threads_per_core());
    println!("Cores per package: {}", topo.cores_per_pkg());
    println!("Uniform: {}", if topo.uniform { "Yes" } else { "No" });
    println!("Hybrid: {}", if topo.is_hybrid() { "Yes" } else { "No" });

    println!("\nHardware threads:");
    for t in &topo.threads {
        let ids = t.ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join("/");
        println!("  os_id={:<4} ids=[{}] core_type={} leader={}", t.os_id, ids, t.attrs.core_type, t.leader);
    }
}
