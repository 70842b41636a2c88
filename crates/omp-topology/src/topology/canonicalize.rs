//! The canonicalization algorithm: radix-1 layer removal, enumeration
//! gathering, uniformity, sub-ids, globals, and LLC aliasing.

use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::layer::LayerKind;

use super::Topology;

/// Run the full canonicalization pipeline on a freshly discovered topology.
///
/// Step 1 (processor-group insertion) is the responsibility of the discovery
/// back-end itself: a back-end that knows about Windows processor groups
/// prepends the `PROC_GROUP` layer to `types`/`ids` before handing the
/// topology here, so by the time canonicalization runs the layer (if any)
/// is already present and is treated like any other layer by step 2.
/// Re-runs enumeration gathering, uniformity, sub-ids, and leader marking
/// without touching `types`/`equivalent`. Used by [`super::subset::restrict_to_mask`]
/// after a thread has been dropped from the array.
pub(crate) fn recompute_aggregates(topo: &mut Topology) {
    super::sort_by_ids(topo);
    gather_enumeration(topo);
    gather_hybrid_attrs(topo);
    topo.uniform = compute_uniform(topo);
    assign_sub_ids(topo);
    mark_leaders(topo);
}

pub fn canonicalize(topo: &mut Topology) -> Result<()> {
    super::sort_by_ids(topo);
    while remove_one_radix1_layer(topo) {}
    super::sort_by_ids(topo);
    gather_enumeration(topo);
    gather_hybrid_attrs(topo);
    topo.uniform = compute_uniform(topo);
    assign_sub_ids(topo);
    alias_llc(topo);
    mark_leaders(topo);
    debug_assert!(topo.depth() > 0, "canonicalized topology must retain at least one layer");
    debug_assert!(topo.count.iter().all(|&c| c > 0), "every layer must have at least one distinct id");
    debug_assert!(topo.ratio.iter().all(|&r| r > 0), "every layer must have positive fan-out");
    debug_assert!(
        topo.types.iter().all(|&k| topo.equivalent.get(&k) == Some(&k)),
        "every surviving layer must self-map in the equivalence table"
    );
    Ok(())
}

fn protected(kind: LayerKind) -> bool {
    matches!(kind, LayerKind::Socket | LayerKind::Core | LayerKind::Thread)
}

fn is_radix1_under(topo: &Topology, outer_idx: usize, inner_idx: usize) -> bool {
    let mut seen = HashMap::new();
    for t in &topo.threads {
        let outer = t.ids[outer_idx];
        let inner = t.ids[inner_idx];
        match seen.get(&outer) {
            Some(&prev) if prev != inner => return false,
            None => {
                seen.insert(outer, inner);
            }
            _ => {}
        }
    }
    true
}

fn distinct_count_at(topo: &Topology, idx: usize) -> usize {
    topo.threads.iter().map(|t| t.ids[idx]).collect::<HashSet<_>>().len()
}

/// Finds and removes (at most) one radix-1 layer pair. Returns `true` if a
/// layer was removed, so the caller can loop to a fixed point.
fn remove_one_radix1_layer(topo: &mut Topology) -> bool {
    let depth = topo.types.len();
    for i in 0..depth.saturating_sub(1) {
        let outer_kind = topo.types[i];
        let inner_kind = topo.types[i + 1];
        if protected(outer_kind) || protected(inner_kind) {
            continue;
        }
        if !is_radix1_under(topo, i, i + 1) {
            continue;
        }

        let inner_varies_at_all = distinct_count_at(topo, i + 1) > 1;
        let drop_inner = if !inner_varies_at_all {
            true
        } else {
            outer_kind.preference() >= inner_kind.preference()
        };

        let drop_idx = if drop_inner { i + 1 } else { i };
        let keep_kind = if drop_inner { outer_kind } else { inner_kind };
        let dropped_kind = topo.types[drop_idx];

        topo.equivalent.insert(dropped_kind, keep_kind);
        topo.types.remove(drop_idx);
        for t in topo.threads.iter_mut() {
            t.ids.remove(drop_idx);
        }
        return true;
    }
    false
}

fn gather_enumeration(topo: &mut Topology) {
    let depth = topo.types.len();
    let mut count = vec![0usize; depth];
    let mut ratio = vec![0usize; depth];

    for l in 0..depth {
        let mut prefixes: HashSet<&[crate::layer::LayerId]> = HashSet::new();
        let mut groups: HashMap<&[crate::layer::LayerId], HashSet<crate::layer::LayerId>> = HashMap::new();
        for t in &topo.threads {
            prefixes.insert(&t.ids[0..=l]);
            if l > 0 {
                groups.entry(&t.ids[0..l]).or_default().insert(t.ids[l]);
            }
        }
        count[l] = prefixes.len();
        ratio[l] = if l == 0 { prefixes.len() } else { groups.values().map(|s| s.len()).max().unwrap_or(0) };
    }

    topo.count = count;
    topo.ratio = ratio;
}

fn gather_hybrid_attrs(topo: &mut Topology) {
    let mut core_types = Vec::new();
    let mut effs = HashSet::new();
    for t in &topo.threads {
        if !core_types.contains(&t.attrs.core_type) {
            core_types.push(t.attrs.core_type);
        }
        effs.insert(t.attrs.efficiency);
    }
    topo.core_types = core_types;
    topo.num_core_efficiencies = effs.len();
}

fn compute_uniform(topo: &Topology) -> bool {
    if topo.ratio.is_empty() {
        return true;
    }
    let product: usize = topo.ratio.iter().product();
    let depth = topo.depth();
    product == topo.count[depth - 1]
}

fn assign_sub_ids(topo: &mut Topology) {
    let depth = topo.depth();
    let mut counters = vec![0u32; depth];
    let mut prev_ids: Option<Vec<crate::layer::LayerId>> = None;

    for t in topo.threads.iter_mut() {
        if let Some(prev) = &prev_ids {
            for l in 0..depth {
                if t.ids[l] != prev[l] {
                    counters[l] += 1;
                    for c in counters.iter_mut().skip(l + 1) {
                        *c = 0;
                    }
                    break;
                }
            }
        }
        t.sub_ids = counters.clone();
        prev_ids = Some(t.ids.clone());
    }
}

fn alias_llc(topo: &mut Topology) {
    const ORDER: [LayerKind; 5] = [LayerKind::L3, LayerKind::L2, LayerKind::L1, LayerKind::Socket, LayerKind::Core];
    if let Some(&kind) = ORDER.iter().find(|k| topo.types.contains(k)) {
        topo.equivalent.insert(LayerKind::Llc, kind);
    }
}

/// Marks the first thread of every group sharing the same id prefix through
/// the granularity layer as `leader`. Granularity defaults to the core
/// layer here; [`crate::granularity::build_os_id_masks`] recomputes leaders
/// for the caller's actual requested granularity.
fn mark_leaders(topo: &mut Topology) {
    let Some(core_idx) = topo.core_level_index() else {
        for t in topo.threads.iter_mut() {
            t.leader = true;
        }
        return;
    };
    let mut prev: Option<Vec<crate::layer::LayerId>> = None;
    for t in topo.threads.iter_mut() {
        let prefix = t.ids[0..=core_idx].to_vec();
        let is_new = prev.as_deref() != Some(&prefix);
        t.leader = is_new;
        prev = Some(prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CoreAttrs, LayerId};
    use crate::mask::Mask;
    use crate::topology::HwThread;

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
    fn uniform_topology_counts_match_expected_shape() {
        let topo = uniform_2x8x2();
        assert!(topo.uniform);
        assert_eq!(topo.num_packages(), 2);
        assert_eq!(topo.num_cores(), 16);
        assert_eq!(topo.num_threads(), 32);
        assert_eq!(topo.threads_per_core(), 2);
    }

    #[test]
    fn radix1_die_layer_collapses_into_socket() {
        let types = vec![LayerKind::Socket, LayerKind::Die, LayerKind::Core, LayerKind::Thread];
        let mut threads = Vec::new();
        for socket in 0..2u32 {
            for core in 0..4u32 {
                for thread in 0..2u32 {
                    let os_id = (socket as usize * 8) + (core as usize * 2) + thread as usize;
                    threads.push(HwThread::new(
                        os_id,
                        os_id,
                        vec![LayerId::Known(socket), LayerId::Known(0), LayerId::Known(core), LayerId::Known(thread)],
                        CoreAttrs::default(),
                    ));
                }
            }
        }
        let mut topo = Topology::from_discovery(types, threads, Mask::full(16));
        canonicalize(&mut topo).unwrap();
        assert!(!topo.types.contains(&LayerKind::Die));
        assert_eq!(topo.resolve(LayerKind::Die), LayerKind::Socket);
    }

    #[test]
    fn leaders_marked_once_per_core() {
        let topo = uniform_2x8x2();
        let leaders = topo.threads.iter().filter(|t| t.leader).count();
        assert_eq!(leaders, 16);
    }

    /// Generates a random `(sockets, cores_per_socket, threads_per_core)`
    /// flat topology and checks the invariants that must hold for *any*
    /// such shape, not just the fixed 2x8x2 fixture above.
    fn random_uniform_topology(rng: &mut impl rand::Rng) -> Topology {
        let sockets = rng.random_range(1..=4u32);
        let cores = rng.random_range(1..=8u32);
        let threads = rng.random_range(1..=2u32);

        let types = vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread];
        let mut hw_threads = Vec::new();
        let mut os_id = 0usize;
        for socket in 0..sockets {
            for core in 0..cores {
                for thread in 0..threads {
                    hw_threads.push(HwThread::new(
                        os_id,
                        os_id,
                        vec![LayerId::Known(socket), LayerId::Known(core), LayerId::Known(thread)],
                        CoreAttrs::default(),
                    ));
                    os_id += 1;
                }
            }
        }
        let mut topo = Topology::from_discovery(types, hw_threads, Mask::full(os_id));
        canonicalize(&mut topo).unwrap();
        topo
    }

    #[test]
    fn property_random_uniform_topologies_satisfy_core_invariants() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let topo = random_uniform_topology(&mut rng);

            for l in 0..topo.depth() {
                assert!(topo.count[l] > 0, "count[{l}] must be positive");
                assert!(topo.ratio[l] > 0, "ratio[{l}] must be positive");
                let product_so_far: usize = topo.ratio[0..=l].iter().product();
                assert!(topo.count[l] <= product_so_far, "count[{l}] must not exceed the running fan-out product");
            }

            let mut seen = HashSet::new();
            for t in &topo.threads {
                assert!(seen.insert(t.ids.clone()), "duplicate id tuple {:?}", t.ids);
            }

            for &kind in &topo.types {
                let once = topo.resolve(kind);
                assert_eq!(topo.resolve(once), once, "equivalence map must be idempotent for {kind}");
            }

            assert!(topo.uniform, "a rectangular socket x core x thread grid is always uniform");
        }
    }
}
