//! omp-topology: machine-topology discovery and affinity-binding core
//!
//! This crate discovers a process's hardware topology (sockets, dice,
//! tiles, NUMA domains, cache levels, cores, SMT threads), canonicalizes it
//! into a single normalized model, applies user-specified subset filtering
//! and place-list construction, and binds individual threads consistently
//! with the chosen policy.
//!
//! # Key Features
//!
//! *   **Topology discovery**: [`discovery`] tries several back-ends in
//!     priority order (hwloc, CPUID x2APIC, legacy APIC, `/proc/cpuinfo`,
//!     AIX SRAD, Windows processor groups, a flat fallback) and
//!     canonicalizes the result.
//! *   **Subset filtering**: the `HW_SUBSET` DSL ([`topology::subset`])
//!     narrows a topology to a user-requested slice.
//! *   **Place-list construction**: [`places`] builds the ordered list of
//!     affinity masks threads are bound to, from either a granularity +
//!     sort policy or an explicit proclist/`OMP_PLACES` grammar
//!     ([`grammar`]).
//! *   **Thread binding**: [`binding`] assigns place indices to threads by
//!     `gtid` and invokes the [`os_binder::OsBinder`] collaborator.
//! *   **Lazy initialization**: the process-wide topology is detected once
//!     and cached globally via [`context::topology()`].
//!
//! # Getting Started
//!
//! ```no_run
//! use omp_topology::{topology, Error};
//!
//! fn main() -> Result<(), Error> {
//!     let topo = topology()?;
//!     println!("{} packages, {} cores, {} threads", topo.num_packages(), topo.num_cores(), topo.num_threads());
//!     println!("uniform: {}", topo.uniform);
//!     Ok(())
//! }
//! ```
//!
//! # Cargo Features
//!
//! *   `serde`: Enables serialization/deserialization of topology and
//!     configuration types via Serde.

mod balanced;
mod binding;
mod config;
mod discovery;
mod error;
mod granularity;
mod grammar;
mod layer;
mod mask;
mod os_binder;
mod places;
mod topology;

mod context;
mod aux;

pub use aux::{get_affinity, get_affinity_mask_proc, set_affinity, set_affinity_mask_proc, unset_affinity_mask_proc};
pub use balanced::balanced_places;
pub use binding::{bind_init_mask, bind_place, current_mask, current_place, ThreadBindState};
pub use config::{AffinityConfig, AffinityFlags, AffinityType, PlaceSummary};
pub use context::{is_uniform, num_cores, num_packages, num_threads, topology, topology_context, TopologyContext};
pub use discovery::{discover, AixResourceSet, DiscoveryBackend, DiscoveryPolicy, HwlocNode, NullRawTopologySource, RawTopologySource, WindowsGroupInfo};
pub use error::{DetectionFailure, Error, Result};
pub use granularity::{build_os_id_masks, gran_levels, granularity_groups, resolve_granularity};
pub use grammar::{parse_omp_places, parse_proclist};
pub use layer::{CoreAttrs, CoreEfficiency, CoreType, LayerId, LayerKind};
pub use mask::Mask;
pub use os_binder::OsBinder;
#[cfg(target_os = "linux")]
pub use os_binder::LinuxOsBinder;
#[cfg(not(target_os = "linux"))]
pub use os_binder::UnsupportedOsBinder;
pub use places::build_places;
pub use topology::{canonicalize, sort_by_compact, HwThread, Topology};
pub use topology::subset::{apply_subset, parse_hw_subset, restrict_to_mask, HwSubsetItem, SubsetAttr, SubsetCount};
