//! Discovery back-ends and their dispatch.
//!
//! The back-end set is closed and small, so dispatch is a tagged-variant
//! (`enum DiscoveryBackend`) driver rather than trait objects. CPUID
//! 0x1F/0xB, legacy APIC, and `/proc/cpuinfo` are implemented
//! natively for Linux/x86_64, grounded on the teacher's `platform::common_x86_64`
//! and `platform::linux::cpu::{proc, sysfs}` modules; hwloc, AIX SRAD, and
//! Windows processor groups are pure transformations fed by [`RawTopologySource`].

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod cpuid_x2apic;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod legacy_apic;
#[cfg(target_os = "linux")]
mod proc_cpuinfo;
mod raw_source;
mod transforms;

pub use raw_source::{AixResourceSet, HwlocNode, NullRawTopologySource, RawTopologySource, WindowsGroupInfo};

use crate::error::{Error, Result};
use crate::layer::{CoreAttrs, LayerId, LayerKind};
use crate::mask::Mask;
use crate::os_binder::OsBinder;
use crate::topology::{HwThread, Topology};

/// One discovery back-end, listed in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiscoveryBackend {
    Hwloc,
    CpuidX2Apic,
    LegacyApic,
    ProcCpuinfo,
    AixSrad,
    WindowsGroups,
    Flat,
}

const DEFAULT_ORDER: [DiscoveryBackend; 7] = [
    DiscoveryBackend::Hwloc,
    DiscoveryBackend::CpuidX2Apic,
    DiscoveryBackend::LegacyApic,
    DiscoveryBackend::ProcCpuinfo,
    DiscoveryBackend::AixSrad,
    DiscoveryBackend::WindowsGroups,
    DiscoveryBackend::Flat,
];

/// The discovery policy: either try every back-end in priority order until
/// one succeeds (the default), or pin a single back-end and fail hard on
/// its failure (`top_method`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryPolicy {
    pub top_method: Option<DiscoveryBackend>,
}

/// Always succeeds: one package, one core per OS processor, one thread per
/// core.
fn flat_fallback(full_mask: &Mask) -> Topology {
    let types = vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread];
    let threads = full_mask
        .iter()
        .enumerate()
        .map(|(idx, os_id)| HwThread::new(os_id, idx, vec![LayerId::Known(0), LayerId::Known(idx as u32), LayerId::Known(0)], CoreAttrs::default()))
        .collect();
    Topology::from_discovery(types, threads, full_mask.clone())
}

fn run_backend(kind: DiscoveryBackend, binder: &dyn OsBinder, source: &dyn RawTopologySource, full_mask: &Mask) -> Result<Topology> {
    match kind {
        DiscoveryBackend::Hwloc => source.hwloc_tree().and_then(|tree| transforms::transform_hwloc(&tree)),
        DiscoveryBackend::CpuidX2Apic => {
            #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
            {
                cpuid_x2apic::discover(binder, full_mask)
            }
            #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
            {
                let _ = (binder, full_mask);
                Err(Error::Unsupported("CPUID x2APIC discovery requires Linux/x86_64".into()))
            }
        }
        DiscoveryBackend::LegacyApic => {
            #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
            {
                legacy_apic::discover(binder, full_mask)
            }
            #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
            {
                let _ = (binder, full_mask);
                Err(Error::Unsupported("legacy APIC discovery requires Linux/x86_64".into()))
            }
        }
        DiscoveryBackend::ProcCpuinfo => {
            #[cfg(target_os = "linux")]
            {
                proc_cpuinfo::discover()
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(Error::Unsupported("/proc/cpuinfo discovery requires Linux".into()))
            }
        }
        DiscoveryBackend::AixSrad => source
            .aix_srad_resource_sets()
            .and_then(|sets| transforms::transform_aix_srad(&sets, source.aix_smt_threads())),
        DiscoveryBackend::WindowsGroups => source.windows_processor_groups().and_then(|groups| transforms::transform_windows_groups(&groups)),
        DiscoveryBackend::Flat => Ok(flat_fallback(full_mask)),
    }
}

/// Runs discovery per `policy`, returning an uncanonicalized [`Topology`].
/// Callers run [`crate::topology::canonicalize`] on the result before use
/// (mirroring the B → C step of the overall data flow).
pub fn discover(policy: DiscoveryPolicy, binder: &dyn OsBinder, source: &dyn RawTopologySource, full_mask: &Mask) -> Result<Topology> {
    if let Some(pinned) = policy.top_method {
        return run_backend(pinned, binder, source, full_mask);
    }

    let mut last_err = None;
    for &backend in &DEFAULT_ORDER {
        match run_backend(backend, binder, source, full_mask) {
            Ok(topo) => return Ok(topo),
            Err(e) => {
                log::debug!("discovery back-end {backend:?} failed: {e}");
                last_err = Some(e);
            }
        }
    }
    // Flat is always last and always succeeds, so this is unreachable in
    // practice; kept for exhaustiveness.
    Err(last_err.unwrap_or(Error::Detection(crate::error::DetectionFailure::UnknownTopology)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os_binder::OsBinder as _;

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
    fn flat_fallback_always_succeeds() {
        let full_mask = Mask::full(4);
        let topo = flat_fallback(&full_mask);
        assert_eq!(topo.num_threads(), 4);
    }

    #[test]
    fn default_policy_falls_through_to_flat_when_nothing_else_applies() {
        let full_mask = Mask::full(4);
        let binder = NoopBinder;
        let source = NullRawTopologySource;
        let topo = discover(DiscoveryPolicy::default(), &binder, &source, &full_mask).unwrap();
        assert_eq!(topo.num_threads(), 4);
    }

    #[test]
    fn pinned_backend_failure_is_fatal() {
        let full_mask = Mask::full(4);
        let binder = NoopBinder;
        let source = NullRawTopologySource;
        let policy = DiscoveryPolicy { top_method: Some(DiscoveryBackend::Hwloc) };
        assert!(discover(policy, &binder, &source, &full_mask).is_err());
    }
}
