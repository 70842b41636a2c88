//! Legacy APIC back-end (CPUID leaves 1 and 4): a fixed two-level
//! `(package, core, thread)` decomposition of the initial APIC id,
//! native on Linux/x86_64. Grounded on the teacher's `platform::common_x86_64`
//! CPUID-query style.

use std::collections::HashMap;

use raw_cpuid::{CacheType, CpuId};

use crate::error::{DetectionFailure, Error, Result};
use crate::layer::{CoreAttrs, LayerId, LayerKind};
use crate::mask::Mask;
use crate::os_binder::{OsBinder, ThreadBindGuard};
use crate::topology::{HwThread, Topology};

fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        0
    } else {
        32 - (n - 1).leading_zeros()
    }
}

struct LegacyRecord {
    package: u32,
    core: u32,
    thread: u32,
    max_cores_per_pkg: u32,
    max_threads_per_pkg: u32,
}

fn read_legacy_for_current_thread() -> Result<LegacyRecord> {
    let cpuid = CpuId::new();
    let feature_info = cpuid.get_feature_info().ok_or(Error::Detection(DetectionFailure::ApicNotPresent))?;

    let apic_id = feature_info.initial_local_apic_id() as u32;
    let max_threads_per_pkg = (feature_info.max_logical_processor_ids() as u32).max(1);

    let max_cores_per_pkg = cpuid
        .get_cache_parameters()
        .and_then(|mut it| {
            it.find(|c| matches!(c.cache_type(), CacheType::Unified | CacheType::Data))
                .map(|c| c.max_cores_for_cache() as u32)
        })
        .unwrap_or(max_threads_per_pkg)
        .max(1);

    let thread_width = ceil_log2(max_threads_per_pkg);
    let core_width = ceil_log2(max_cores_per_pkg);
    let thread_mask = (1u32 << thread_width) - 1;
    let core_mask = (1u32 << core_width) - 1;

    let thread = apic_id & thread_mask;
    let core = (apic_id >> thread_width) & core_mask;
    let package = apic_id >> (thread_width + core_width);

    Ok(LegacyRecord { package, core, thread, max_cores_per_pkg, max_threads_per_pkg })
}

/// Runs legacy-APIC discovery across every processor in `full_mask`.
pub fn discover(binder: &dyn OsBinder, full_mask: &Mask) -> Result<Topology> {
    let os_ids: Vec<usize> = full_mask.iter().collect();
    if os_ids.is_empty() {
        return Err(Error::Detection(DetectionFailure::UnknownTopology));
    }

    let mut records = Vec::with_capacity(os_ids.len());
    for &os_id in &os_ids {
        let _guard = ThreadBindGuard::new(binder, os_id, full_mask.end())?;
        records.push(read_legacy_for_current_thread()?);
    }

    let mut per_package: HashMap<u32, (u32, u32)> = HashMap::new();
    for r in &records {
        let entry = per_package.entry(r.package).or_insert((r.max_cores_per_pkg, r.max_threads_per_pkg));
        if *entry != (r.max_cores_per_pkg, r.max_threads_per_pkg) {
            return Err(Error::Detection(DetectionFailure::InconsistentCpuidInfo));
        }
    }

    let types = vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread];
    let mut seen = std::collections::HashSet::new();
    let mut threads = Vec::with_capacity(records.len());
    for (idx, (os_id, r)) in os_ids.iter().zip(records.iter()).enumerate() {
        let tuple = (r.package, r.core, r.thread);
        if !seen.insert(tuple) {
            return Err(Error::Detection(DetectionFailure::LegacyApicIdsNotUnique));
        }
        threads.push(HwThread::new(
            *os_id,
            idx,
            vec![LayerId::Known(r.package), LayerId::Known(r.core), LayerId::Known(r.thread)],
            CoreAttrs::default(),
        ));
    }

    Ok(Topology::from_discovery(types, threads, full_mask.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_log2_matches_expected_widths() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(8), 3);
    }
}
