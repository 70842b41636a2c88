//! The two thread orderings: lexicographic "by ids" (the stable canonical
//! order) and "by compact(k)" (used to realise both compact and scatter
//! place-building policies via a single routine).

use std::cmp::Reverse;

use crate::layer::CoreEfficiency;

use super::Topology;

fn efficiency_sort_key(e: CoreEfficiency) -> (u8, Reverse<u32>) {
    match e {
        CoreEfficiency::Known(v) => (0, Reverse(v)),
        CoreEfficiency::Unknown => (1, Reverse(0)),
        CoreEfficiency::Multiple => (2, Reverse(0)),
    }
}

/// Lex-sort by `ids[0..depth]`, with a descending-efficiency tie-break
/// inserted at the core layer (mandatory per the design notes: scatter
/// policy and cache-level heuristics rely on "higher efficiency first"),
/// `Unknown` ids sorting after any known id, and `os_id` as the final
/// tie-break.
pub(crate) fn sort_by_ids(topo: &mut Topology) {
    let core_idx = topo.core_level_index();
    topo.threads.sort_by(|a, b| {
        let depth = a.ids.len();
        for l in 0..depth {
            if Some(l) == core_idx {
                let ea = efficiency_sort_key(a.attrs.efficiency);
                let eb = efficiency_sort_key(b.attrs.efficiency);
                if ea != eb {
                    return ea.cmp(&eb);
                }
            }
            let ka = a.ids[l].sort_key();
            let kb = b.ids[l].sort_key();
            if ka != kb {
                return ka.cmp(&kb);
            }
        }
        a.os_id.cmp(&b.os_id)
    });
}

/// Sort by `compact(k)`: the innermost `k` sub-id levels first, then the
/// remaining outer levels. `k = depth` clusters threads as tightly as
/// possible within the hierarchy ("compact"); `k = 0` (or small `k`) spreads
/// them across the outermost layers first ("scatter", by passing
/// `depth - 1 - user_compact`).
pub fn sort_by_compact(topo: &mut Topology, k: usize) {
    let depth = topo.depth();
    let k = k.min(depth);
    let split = depth - k;
    topo.threads.sort_by(|a, b| {
        for l in split..depth {
            if a.sub_ids[l] != b.sub_ids[l] {
                return a.sub_ids[l].cmp(&b.sub_ids[l]);
            }
        }
        for l in 0..split {
            if a.sub_ids[l] != b.sub_ids[l] {
                return a.sub_ids[l].cmp(&b.sub_ids[l]);
            }
        }
        a.os_id.cmp(&b.os_id)
    });
    topo.compact = k;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CoreAttrs, LayerId, LayerKind};
    use crate::mask::Mask;
    use crate::topology::{canonicalize, HwThread, Topology};

    #[test]
    fn compact_zero_keeps_canonical_order_for_flat_topology() {
        let types = vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread];
        let threads: Vec<_> = (0..4)
            .map(|i| HwThread::new(i, i, vec![LayerId::Known(0), LayerId::Known(i as u32), LayerId::Known(0)], CoreAttrs::default()))
            .collect();
        let mut topo = Topology::from_discovery(types, threads, Mask::full(4));
        canonicalize(&mut topo).unwrap();
        sort_by_compact(&mut topo, topo.depth());
        let os_ids: Vec<_> = topo.threads.iter().map(|t| t.os_id).collect();
        assert_eq!(os_ids, vec![0, 1, 2, 3]);
    }
}
