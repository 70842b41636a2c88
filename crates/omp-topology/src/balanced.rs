//! The balanced assigner: a special-case place generator used by the
//! `balanced` policy instead of the ordinary compact-table walk.

use crate::error::Result;
use crate::granularity::granularity_groups;
use crate::layer::LayerKind;
use crate::mask::Mask;
use crate::topology::Topology;

/// Builds `nthreads` places over `topo`'s cores, using the uniform closed
/// form when `topo.uniform`, and the `procarr`-fill algorithm otherwise.
/// `fine` selects one OS id per thread; coarse assigns the whole core's mask
/// to every thread sharing it.
pub fn balanced_places(topo: &Topology, nthreads: usize, fine: bool) -> Result<Vec<Mask>> {
    if topo.uniform {
        uniform_balanced(topo, nthreads, fine)
    } else {
        nonuniform_balanced(topo, nthreads, fine)
    }
}

fn uniform_balanced(topo: &Topology, nthreads: usize, fine: bool) -> Result<Vec<Mask>> {
    let cores = granularity_groups(topo, LayerKind::Core)?;
    let ncores = cores.len().max(1);
    let nth_per_core = topo.threads_per_core().max(1);

    let chunk = nthreads / ncores;
    let big = nthreads % ncores;

    let mut places = Vec::with_capacity(nthreads);
    for tid in 0..nthreads {
        let (core, sub) = if tid < big * (chunk + 1) {
            (tid / (chunk + 1), (tid % (chunk + 1)) % nth_per_core)
        } else {
            let adj = tid - big;
            (adj / chunk.max(1), (adj % chunk.max(1)) % nth_per_core)
        };
        let core_mask = &cores[core.min(cores.len() - 1)];
        if fine {
            let os_id = core_mask.iter().nth(sub).unwrap_or_else(|| core_mask.iter().next().unwrap());
            places.push(Mask::single(core_mask.capacity(), os_id));
        } else {
            places.push(core_mask.clone());
        }
    }
    Ok(places)
}

/// Per-core os-id table with `-1` holes, used by the non-uniform branch.
fn build_procarr(topo: &Topology) -> Result<(Vec<Vec<Option<usize>>>, usize)> {
    let cores = granularity_groups(topo, LayerKind::Core)?;
    let nth_per_core = cores.iter().map(|c| c.count()).max().unwrap_or(1);
    let procarr: Vec<Vec<Option<usize>>> = cores
        .iter()
        .map(|c| {
            let mut ids: Vec<Option<usize>> = c.iter().map(Some).collect();
            ids.resize(nth_per_core, None);
            ids
        })
        .collect();
    Ok((procarr, nth_per_core))
}

fn nonuniform_balanced(topo: &Topology, nthreads: usize, fine: bool) -> Result<Vec<Mask>> {
    let cores = granularity_groups(topo, LayerKind::Core)?;
    let ncores = cores.len();
    let (procarr, _nth_per_core) = build_procarr(topo)?;
    let avail_proc: usize = procarr.iter().map(|row| row.iter().filter(|s| s.is_some()).count()).sum();

    // How many threads land on each core, honouring holes in `procarr`.
    let mut per_core = vec![0usize; ncores];

    if nthreads == avail_proc {
        for (core, row) in procarr.iter().enumerate() {
            per_core[core] = row.iter().filter(|s| s.is_some()).count();
        }
    } else if nthreads <= ncores {
        // One bit per core, skipping empty cores, in order.
        let mut placed = 0;
        for core in 0..ncores {
            if placed >= nthreads {
                break;
            }
            if procarr[core].iter().any(|s| s.is_some()) {
                per_core[core] = 1;
                placed += 1;
            }
        }
    } else {
        // Iterative fill: round-robin bump the allocation of populated
        // cores with spare threads until every thread has a slot.
        let mut placed = 0;
        let mut round = 0usize;
        while placed < nthreads {
            let mut progressed = false;
            for core in 0..ncores {
                if placed >= nthreads {
                    break;
                }
                let capacity = procarr[core].iter().filter(|s| s.is_some()).count();
                if per_core[core] < capacity && per_core[core] == round {
                    per_core[core] += 1;
                    placed += 1;
                    progressed = true;
                }
            }
            round += 1;
            if !progressed && round > nthreads + ncores {
                break;
            }
        }
    }

    let mut places = Vec::with_capacity(nthreads);
    'outer: for core in 0..ncores {
        for sub in 0..per_core[core] {
            if fine {
                if let Some(Some(os_id)) = procarr[core].get(sub) {
                    places.push(Mask::single(cores[core].capacity(), *os_id));
                }
            } else {
                places.push(cores[core].clone());
            }
            if places.len() == nthreads {
                break 'outer;
            }
        }
    }
    Ok(places)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CoreAttrs, LayerId};
    use crate::mask::Mask as M;
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
        let mut topo = Topology::from_discovery(types, threads, M::full(32));
        canonicalize(&mut topo).unwrap();
        topo
    }

    /// 3 cores with SMT counts (4, 2, 2), nthreads = 6. Expected: cores
    /// receive (2, 2, 2) threads.
    fn nonuniform_3cores_4_2_2() -> Topology {
        let types = vec![LayerKind::Core, LayerKind::Thread];
        let mut threads = Vec::new();
        let mut os_id = 0usize;
        for (core, smt) in [(0u32, 4u32), (1, 2), (2, 2)] {
            for thread in 0..smt {
                threads.push(HwThread::new(os_id, os_id, vec![LayerId::Known(core), LayerId::Known(thread)], CoreAttrs::default()));
                os_id += 1;
            }
        }
        let cap = os_id;
        let mut topo = Topology::from_discovery(types, threads, M::full(cap));
        canonicalize(&mut topo).unwrap();
        topo
    }

    #[test]
    fn uniform_topology_balanced_matches_thread_count() {
        let topo = uniform_2x8x2();
        let places = balanced_places(&topo, 32, true).unwrap();
        assert_eq!(places.len(), 32);
        for p in &places {
            assert_eq!(p.count(), 1);
        }
    }

    #[test]
    fn nonuniform_balanced_distributes_two_per_core() {
        let topo = nonuniform_3cores_4_2_2();
        assert!(!topo.uniform);
        let places = balanced_places(&topo, 6, true).unwrap();
        assert_eq!(places.len(), 6);
        let cores = granularity_groups(&topo, LayerKind::Core).unwrap();
        let mut per_core = vec![0usize; cores.len()];
        for p in &places {
            let os_id = p.iter().next().unwrap();
            for (i, c) in cores.iter().enumerate() {
                if c.test(os_id) {
                    per_core[i] += 1;
                }
            }
        }
        assert_eq!(per_core, vec![2, 2, 2]);
    }

    #[test]
    fn nonuniform_coarse_binds_whole_core() {
        let topo = nonuniform_3cores_4_2_2();
        let places = balanced_places(&topo, 6, false).unwrap();
        let cores = granularity_groups(&topo, LayerKind::Core).unwrap();
        assert!(places.iter().all(|p| cores.contains(p)));
    }
}
