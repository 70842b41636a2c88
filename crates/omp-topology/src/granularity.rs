//! Granularity resolution and the OS-id mask table.

use crate::error::Result;
use crate::layer::LayerKind;
use crate::mask::Mask;
use crate::topology::subset::restrict_to_mask;
use crate::topology::{sort_by_ids, Topology};

/// Resolves a requested granularity layer to one that actually exists in
/// `topo`, following the fallback chain `CORE -> THREAD -> SOCKET` and
/// clamping to `PROC_GROUP` when present and coarser.
pub fn resolve_granularity(topo: &Topology, requested: LayerKind) -> LayerKind {
    let mut resolved = match topo.layer_index(requested) {
        Ok(_) => topo.resolve(requested),
        Err(_) => {
            let mut fallback = LayerKind::Core;
            for candidate in [LayerKind::Core, LayerKind::Thread, LayerKind::Socket] {
                if topo.layer_index(candidate).is_ok() {
                    fallback = candidate;
                    break;
                }
            }
            log::warn!("granularity {requested} is not present in this topology; falling back to {fallback}");
            fallback
        }
    };

    if let Ok(pg_idx) = topo.layer_index(LayerKind::ProcGroup) {
        if let Ok(resolved_idx) = topo.layer_index(resolved) {
            if resolved_idx < pg_idx {
                log::warn!("granularity {resolved} spans more than one processor group; clamping to PROC_GROUP");
                resolved = LayerKind::ProcGroup;
            }
        }
    }

    resolved
}

/// Number of layers strictly inside `resolved`.
pub fn gran_levels(topo: &Topology, resolved: LayerKind) -> usize {
    match topo.layer_index(resolved) {
        Ok(idx) => topo.depth().saturating_sub(1).saturating_sub(idx),
        Err(_) => 0,
    }
}

/// Ordered list of masks, one per distinct id-group at `kind` in canonical
/// sort order. Read-only: does not mark leaders or mutate `topo`.
pub fn granularity_groups(topo: &Topology, kind: LayerKind) -> Result<Vec<Mask>> {
    let idx = topo.layer_index(kind)?;
    let cap = topo.num_os_id_masks().max(1);
    let mut groups = Vec::new();
    let mut i = 0;
    while i < topo.threads.len() {
        let mut j = i;
        let key = topo.threads[i].ids[0..=idx].to_vec();
        let mut mask = Mask::empty(cap);
        while j < topo.threads.len() && topo.threads[j].ids[0..=idx] == key[..] {
            mask.set(topo.threads[j].os_id);
            j += 1;
        }
        groups.push(mask);
        i = j;
    }
    Ok(groups)
}

/// Builds the OS-id-indexed mask table: every thread "close enough" to
/// `os_id` is one whose ids agree through `depth-1-gran_levels`,
/// optionally overridden to also require matching hybrid attributes.
/// Marks each group's first thread (in canonical order) as `leader`.
/// Narrows `topo` via [`restrict_to_mask`] first if the union of all groups
/// is smaller than the current full mask, then re-emits against the
/// narrowed topology.
pub fn build_os_id_masks(topo: &mut Topology, granularity: LayerKind, core_types_gran: bool, core_effs_gran: bool) -> Result<Vec<Mask>> {
    sort_by_ids(topo);
    let split_idx = topo.layer_index(granularity)?;
    let cap = topo.num_os_id_masks().max(1);

    let mut os_id_masks = vec![Mask::empty(cap); cap];
    let mut group_masks = Vec::new();
    let mut i = 0;

    while i < topo.threads.len() {
        let ref_ids = topo.threads[i].ids[0..=split_idx].to_vec();
        let ref_attrs = topo.threads[i].attrs;
        let mut j = i;
        let mut group_mask = Mask::empty(cap);
        while j < topo.threads.len() {
            let t = &topo.threads[j];
            let ids_match = t.ids[0..=split_idx] == ref_ids[..];
            let types_match = !core_types_gran || t.attrs.core_type == ref_attrs.core_type;
            let effs_match = !core_effs_gran || t.attrs.efficiency == ref_attrs.efficiency;
            if !(ids_match && types_match && effs_match) {
                break;
            }
            group_mask.set(t.os_id);
            j += 1;
        }
        for (rank, k) in (i..j).enumerate() {
            let os_id = topo.threads[k].os_id;
            os_id_masks[os_id] = group_mask.clone();
            topo.threads[k].leader = rank == 0;
        }
        group_masks.push(group_mask);
        i = j;
    }

    let mut union_mask = Mask::empty(cap);
    for m in &group_masks {
        union_mask.union(m);
    }

    if !union_mask.equal(&topo.full_mask) {
        restrict_to_mask(topo, &union_mask)?;
        return build_os_id_masks(topo, granularity, core_types_gran, core_effs_gran);
    }

    Ok(os_id_masks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CoreAttrs, LayerId};
    use crate::topology::{canonicalize, HwThread};

    fn uniform_2x8x2() -> Topology {
        let types = vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread];
        let mut threads = Vec::new();
        for socket in 0..2u32 {
            for core in 0..8u32 {
                for thread in 0..2u32 {
                    let os_id = (socket as usize * 16) + (core as usize * 2) + thread as usize;
                    threads.push(HwThread::new(
                        os_id,
                        os_id,
                        vec![LayerId::Known(socket), LayerId::Known(core), LayerId::Known(thread)],
                        CoreAttrs::default(),
                    ));
                }
            }
        }
        let mut topo = Topology::from_discovery(types, threads, Mask::full(32));
        canonicalize(&mut topo).unwrap();
        topo
    }

    #[test]
    fn resolve_falls_back_when_layer_absent() {
        let topo = uniform_2x8x2();
        assert_eq!(resolve_granularity(&topo, LayerKind::Numa), LayerKind::Core);
    }

    #[test]
    fn os_id_masks_group_smt_siblings_at_core_granularity() {
        let mut topo = uniform_2x8x2();
        let masks = build_os_id_masks(&mut topo, LayerKind::Core, false, false).unwrap();
        assert_eq!(masks[0].count(), 2);
        assert!(masks[0].test(0) && masks[0].test(1));
        let leaders = topo.threads.iter().filter(|t| t.leader).count();
        assert_eq!(leaders, 16);
    }

    #[test]
    fn os_id_masks_at_thread_granularity_are_singletons() {
        let mut topo = uniform_2x8x2();
        let masks = build_os_id_masks(&mut topo, LayerKind::Thread, false, false).unwrap();
        assert_eq!(masks[0].count(), 1);
    }
}
