//! CPUID leaf 0x1F/0x0B (x2APIC extended topology) back-end, native on
//! Linux/x86_64. Grounded on the teacher's `platform::common_x86_64`
//! CPUID-query style, generalized from single-leaf feature detection to a
//! per-processor topology walk.

use raw_cpuid::{CpuId, TopologyType};

use crate::error::{DetectionFailure, Error, Result};
use crate::layer::{CoreAttrs, LayerId, LayerKind};
use crate::mask::Mask;
use crate::os_binder::{OsBinder, ThreadBindGuard};
use crate::topology::{HwThread, Topology};

fn topology_type_to_layer(t: TopologyType) -> Option<LayerKind> {
    match t {
        TopologyType::SMT => Some(LayerKind::Thread),
        TopologyType::Core => Some(LayerKind::Core),
        TopologyType::Module => Some(LayerKind::Module),
        TopologyType::Tile => Some(LayerKind::Tile),
        TopologyType::Die | TopologyType::DieGrp => Some(LayerKind::Die),
        _ => None,
    }
}

struct PerProcLevels {
    /// `(layer, id)` for every *known* level, outermost last (package last).
    columns: Vec<(LayerKind, u32)>,
}

fn read_levels_for_current_thread() -> Result<PerProcLevels> {
    let cpuid = CpuId::new();
    let Some(iter) = cpuid.get_extended_topology_info() else {
        return Err(Error::Detection(DetectionFailure::ApicNotPresent));
    };

    let mut levels: Vec<_> = iter.collect();
    levels.sort_by_key(|l| l.level_number());

    if levels.is_empty() {
        return Err(Error::Detection(DetectionFailure::ApicNotPresent));
    }

    let apic_id = levels[0].x2apic_id();
    let mut columns = Vec::new();
    let mut prev_shift = 0u32;

    for level in &levels {
        let shift = level.shift_right_for_next_apic_id();
        let width = shift.saturating_sub(prev_shift);
        if let Some(layer) = topology_type_to_layer(level.level_type()) {
            let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
            let id = (apic_id >> prev_shift) & mask;
            columns.push((layer, id));
        }
        prev_shift = shift;
    }

    // Whatever remains above the last known level's shift is the package id.
    columns.push((LayerKind::Socket, apic_id >> prev_shift));

    Ok(PerProcLevels { columns })
}

/// Runs the discovery for every OS processor currently in `full_mask`,
/// pinning the calling thread to each in turn via `binder` and restoring
/// its original affinity afterward.
pub fn discover(binder: &dyn OsBinder, full_mask: &Mask) -> Result<Topology> {
    let os_ids: Vec<usize> = full_mask.iter().collect();
    if os_ids.is_empty() {
        return Err(Error::Detection(DetectionFailure::UnknownTopology));
    }

    let mut per_thread: Vec<PerProcLevels> = Vec::with_capacity(os_ids.len());
    for &os_id in &os_ids {
        let _guard = ThreadBindGuard::new(binder, os_id, full_mask.end())?;
        per_thread.push(read_levels_for_current_thread()?);
    }

    // Union of layer kinds actually seen, package innermost-to-outermost
    // reversed so Socket ends up outermost (index 0).
    let mut seen_order: Vec<LayerKind> = Vec::new();
    for pt in &per_thread {
        for (kind, _) in pt.columns.iter().rev() {
            if !seen_order.contains(kind) {
                seen_order.push(*kind);
            }
        }
    }
    // seen_order is now outermost-first (Socket pushed first since columns
    // were iterated in reverse, ending with SMT/Core last).
    let types = seen_order;

    let mut threads = Vec::with_capacity(per_thread.len());
    for (idx, (os_id, levels)) in os_ids.iter().zip(per_thread.iter()).enumerate() {
        let mut ids = vec![LayerId::Unknown; types.len()];
        for (kind, id) in levels.columns.iter().rev() {
            if let Some(pos) = types.iter().position(|k| k == kind) {
                ids[pos] = LayerId::Known(*id);
            }
        }
        threads.push(HwThread::new(*os_id, idx, ids, CoreAttrs::default()));
    }

    Ok(Topology::from_discovery(types, threads, full_mask.clone()))
}
