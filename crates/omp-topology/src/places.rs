//! Place-list construction: dispatches on [`AffinityType`] to build the
//! ordered place vector and attaches a [`PlaceSummary`] to each.

use crate::balanced::balanced_places;
use crate::config::{aggregate_attrs, aggregate_ids, AffinityConfig, AffinityFlags, AffinityType, PlaceSummary};
use crate::error::{Error, Result};
use crate::granularity::{build_os_id_masks, gran_levels, resolve_granularity};
use crate::grammar::{parse_omp_places, parse_proclist};
use crate::mask::Mask;
use crate::topology::{sort_by_compact, Topology};

/// compact-table row for the non-`explicit`/`balanced` policies.
fn compact_for(ty: AffinityType, depth: usize, user_compact: i64) -> usize {
    let k = user_compact.clamp(0, depth as i64 - 1) as usize;
    match ty {
        AffinityType::Logical => 0,
        AffinityType::Physical => 1usize.min(depth.saturating_sub(1)),
        AffinityType::Scatter => depth.saturating_sub(1).saturating_sub(k),
        AffinityType::Compact => k.min(depth.saturating_sub(1)),
        _ => 0,
    }
}

fn summarize(topo: &Topology, mask: &Mask) -> PlaceSummary {
    let depth = topo.depth();
    let members: Vec<&crate::topology::HwThread> = topo.threads.iter().filter(|t| mask.test(t.os_id)).collect();
    let id_rows: Vec<&[crate::layer::LayerId]> = members.iter().map(|t| t.ids.as_slice()).collect();
    let ids = aggregate_ids(depth, id_rows.into_iter());
    let attrs = aggregate_attrs(members.iter().map(|t| &t.attrs));
    PlaceSummary { ids, attrs }
}

/// Degrades `config` to `none`: one place covering the process full mask,
/// with a warning, for the case where no thread survives filtering.
fn degrade_to_none(topo: &Topology, config: &mut AffinityConfig) {
    log::warn!("place construction produced no places; degrading to 'none'");
    config.ty = AffinityType::None;
    config.masks = vec![topo.full_mask.clone()];
    config.os_id_masks = vec![topo.full_mask.clone(); topo.num_os_id_masks().max(1)];
    config.summaries = vec![summarize(topo, &topo.full_mask)];
    config.num_masks = 1;
}

fn apply_cap_and_offset(mut masks: Vec<Mask>, offset: i64, cap: Option<usize>) -> Vec<Mask> {
    if masks.is_empty() {
        return masks;
    }
    let n = masks.len() as i64;
    let shift = ((offset % n) + n) % n;
    masks.rotate_left(shift as usize);
    if let Some(cap) = cap {
        masks.truncate(cap);
    }
    masks
}

/// Builds `config.masks`/`os_id_masks`/`summaries` and sets
/// `config.num_masks` end to end, mutating `topo` in place when the chosen
/// granularity requires [`build_os_id_masks`] to restrict it first.
pub fn build_places(topo: &mut Topology, config: &mut AffinityConfig) -> Result<()> {
    let capacity = topo.num_os_id_masks().max(1);
    let threads_per_core = topo.threads_per_core().max(1);
    config.full_mask = topo.full_mask.clone();

    let mut masks = match config.ty {
        AffinityType::Explicit => {
            let text = config
                .proclist
                .as_deref()
                .ok_or_else(|| Error::InvalidParameter("explicit affinity type requires a proclist".into()))?;
            if config.flags.contains(AffinityFlags::OMP_PLACES) {
                parse_omp_places(text, topo, capacity)?
            } else {
                parse_proclist(text, capacity)?
            }
        }
        AffinityType::Balanced => {
            let fine = gran_levels(topo, resolve_granularity(topo, config.granularity)) == 0;
            let nthreads = config.num_places_cap.unwrap_or_else(|| topo.num_threads());
            balanced_places(topo, nthreads, fine)?
        }
        AffinityType::Disabled | AffinityType::None => {
            vec![topo.full_mask.clone()]
        }
        AffinityType::Logical | AffinityType::Physical | AffinityType::Scatter | AffinityType::Compact => {
            let resolved = resolve_granularity(topo, config.granularity);
            let group_of_os_id = build_os_id_masks(
                topo,
                resolved,
                config.flags.contains(AffinityFlags::CORE_TYPES_GRAN),
                config.flags.contains(AffinityFlags::CORE_EFFS_GRAN),
            )?;
            let compact = compact_for(config.ty, topo.depth(), config.compact);
            sort_by_compact(topo, compact);

            let dups = config.flags.contains(AffinityFlags::DUPS);
            let mut out = Vec::new();
            for t in &topo.threads {
                if dups || t.leader {
                    out.push(if dups { Mask::single(capacity, t.os_id) } else { group_of_os_id[t.os_id].clone() });
                }
            }
            out
        }
    };

    let offset = match config.ty {
        AffinityType::Logical | AffinityType::Physical => config.offset * threads_per_core as i64,
        _ => config.offset,
    };

    if !matches!(config.ty, AffinityType::Disabled | AffinityType::None) {
        masks = apply_cap_and_offset(masks, offset, config.num_places_cap);
    }

    if masks.is_empty() {
        degrade_to_none(topo, config);
        return Ok(());
    }

    config.summaries = masks.iter().map(|m| summarize(topo, m)).collect();
    config.num_masks = masks.len();
    config.os_id_masks = vec![Mask::empty(capacity); capacity];
    for (place_idx, m) in masks.iter().enumerate() {
        for os_id in m.iter() {
            config.os_id_masks[os_id] = masks[place_idx].clone();
        }
    }
    config.masks = masks;
    config.flags.insert(AffinityFlags::INITIALIZED);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CoreAttrs, LayerId, LayerKind};
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

    /// Compact affinity at thread granularity with no subset filter puts
    /// every thread in its own place: place `i` is `{i}`.
    #[test]
    fn compact_thread_granularity_yields_singletons() {
        let mut topo = uniform_2x8x2();
        let mut config = AffinityConfig::new(AffinityType::Compact, LayerKind::Thread);
        build_places(&mut topo, &mut config).unwrap();
        assert_eq!(config.num_masks, 32);
        for i in 0..32 {
            assert_eq!(config.masks[i], Mask::single(32, i));
        }
    }

    #[test]
    fn explicit_proclist_builds_places() {
        let mut topo = uniform_2x8x2();
        let mut config = AffinityConfig::new(AffinityType::Explicit, LayerKind::Core).with_proclist("0,1,2");
        build_places(&mut topo, &mut config).unwrap();
        assert_eq!(config.num_masks, 3);
    }

    #[test]
    fn empty_result_degrades_to_none() {
        let mut topo = uniform_2x8x2();
        let mut config = AffinityConfig::new(AffinityType::Explicit, LayerKind::Core).with_proclist("999,1000");
        build_places(&mut topo, &mut config).unwrap();
        assert_eq!(config.ty, AffinityType::None);
        assert_eq!(config.num_masks, 1);
        assert_eq!(config.masks[0], topo.full_mask);
    }

    #[test]
    fn logical_granularity_core_groups_smt_pairs() {
        let mut topo = uniform_2x8x2();
        let mut config = AffinityConfig::new(AffinityType::Logical, LayerKind::Core);
        build_places(&mut topo, &mut config).unwrap();
        assert_eq!(config.num_masks, 16);
        for m in &config.masks {
            assert_eq!(m.count(), 2);
        }
    }
}
