//! Crate-level entry points: the `OnceLock`-backed singletons and the
//! `TopologyContext` wrapper that lets tests instantiate independent
//! topologies instead of reaching for the global.

use std::sync::OnceLock;

use crate::discovery::{discover, DiscoveryPolicy, NullRawTopologySource};
use crate::error::Result;
use crate::mask::Mask;
use crate::os_binder::OsBinder;
use crate::topology::{canonicalize, subset::HwSubsetItem, Topology};

#[cfg(target_os = "linux")]
use crate::os_binder::LinuxOsBinder as DefaultOsBinder;
#[cfg(not(target_os = "linux"))]
use crate::os_binder::UnsupportedOsBinder as DefaultOsBinder;

/// The topology plus the process-wide bookkeeping that sits alongside it:
/// the full mask subset filtering narrows, and the last `HW_SUBSET` applied.
/// Encapsulates the singletons behind an explicit context struct so tests
/// can hold independent instances instead of sharing process-global state.
pub struct TopologyContext {
    pub topology: Topology,
    pub full_mask: Mask,
    pub applied_subset: Option<Vec<HwSubsetItem>>,
}

impl TopologyContext {
    /// Runs discovery followed by canonicalization to build a fresh context,
    /// using `binder`/`source` as the OS/raw-topology collaborators.
    pub fn discover(policy: DiscoveryPolicy, binder: &dyn OsBinder, source: &dyn crate::discovery::RawTopologySource) -> Result<Self> {
        let full_mask = binder.get_system_affinity(usize::from(std::thread::available_parallelism()?)).unwrap_or_else(|_| Mask::full(1));
        let mut topology = discover(policy, binder, source, &full_mask)?;
        canonicalize(&mut topology)?;
        Ok(TopologyContext { topology, full_mask, applied_subset: None })
    }

    /// Applies an `HW_SUBSET` filter to this context's topology, recording
    /// it as the last-applied subset.
    pub fn apply_subset(&mut self, items: Vec<HwSubsetItem>) -> Result<()> {
        crate::topology::subset::apply_subset(&mut self.topology, &items)?;
        self.full_mask = self.topology.full_mask.clone();
        self.applied_subset = Some(items);
        Ok(())
    }

    pub fn num_packages(&self) -> usize {
        self.topology.num_packages()
    }

    pub fn num_cores(&self) -> usize {
        self.topology.num_cores()
    }

    pub fn num_threads(&self) -> usize {
        self.topology.num_threads()
    }

    pub fn is_uniform(&self) -> bool {
        self.topology.uniform
    }
}

static CONTEXT: OnceLock<Result<TopologyContext>> = OnceLock::new();

fn init_context() -> Result<TopologyContext> {
    let binder = DefaultOsBinder::default();
    let source = NullRawTopologySource;
    TopologyContext::discover(DiscoveryPolicy::default(), &binder, &source)
}

/// Detect-once, cache-forever access to the process-wide `Topology`
/// (mirroring the teacher's `cpu_info()` pattern). Errors are cloned from
/// the single discovery attempt on every subsequent call -- discovery never
/// re-runs.
pub fn topology() -> Result<&'static Topology> {
    topology_context().map(|ctx| &ctx.topology)
}

/// Detect-once, cache-forever access to the full [`TopologyContext`].
pub fn topology_context() -> Result<&'static TopologyContext> {
    CONTEXT.get_or_init(init_context).as_ref().map_err(Clone::clone)
}

pub fn num_packages() -> Result<usize> {
    topology().map(|t| t.num_packages())
}

pub fn num_cores() -> Result<usize> {
    topology().map(|t| t.num_cores())
}

pub fn num_threads() -> Result<usize> {
    topology().map(|t| t.num_threads())
}

pub fn is_uniform() -> Result<bool> {
    topology().map(|t| t.uniform)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopBinder;
    impl OsBinder for NoopBinder {
        fn bind_thread(&self, _os_id: usize) -> Result<()> {
            Ok(())
        }
        fn set_system_affinity(&self, _mask: &Mask, _enforce: bool) -> Result<()> {
            Ok(())
        }
        fn get_system_affinity(&self, capacity: usize) -> Result<Mask> {
            Ok(Mask::full(capacity))
        }
    }

    #[test]
    fn context_discover_builds_a_canonicalized_topology() {
        let binder = NoopBinder;
        let source = NullRawTopologySource;
        let ctx = TopologyContext::discover(DiscoveryPolicy::default(), &binder, &source).unwrap();
        assert!(ctx.num_threads() > 0);
    }
}
