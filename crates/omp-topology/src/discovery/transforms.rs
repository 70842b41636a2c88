//! Pure transformations from [`RawTopologySource`] input into a
//! [`Topology`].

use std::collections::HashSet;

use crate::error::{DetectionFailure, Error, Result};
use crate::layer::{CoreAttrs, LayerId, LayerKind};
use crate::mask::Mask;
use crate::topology::{HwThread, Topology};

use super::raw_source::{AixResourceSet, HwlocNode, WindowsGroupInfo};

struct HwlocLeaf {
    os_id: usize,
    path: Vec<(LayerKind, u32)>,
}

fn collect_hwloc_leaves(node: &HwlocNode, path: &mut Vec<(LayerKind, u32)>, leaves: &mut Vec<HwlocLeaf>) {
    if let Some(os_id) = node.os_id {
        leaves.push(HwlocLeaf { os_id, path: path.clone() });
        return;
    }
    for (i, child) in node.children.iter().enumerate() {
        path.push((child.kind, i as u32));
        collect_hwloc_leaves(child, path, leaves);
        path.pop();
    }
}

/// Walks an hwloc-style tree, mapping node kinds to layer kinds directly.
/// NUMA nodes are expected to already appear as ordinary
/// ancestors in `root`'s shape; a collaborator whose tree places memory
/// nodes outside the parent/child chain should inject them as `Numa`
/// children before calling this transform.
pub fn transform_hwloc(root: &HwlocNode) -> Result<Topology> {
    let mut leaves = Vec::new();
    let mut path = Vec::new();
    collect_hwloc_leaves(root, &mut path, &mut leaves);

    if leaves.is_empty() {
        return Err(Error::Detection(DetectionFailure::UnknownTopology));
    }

    let template: Vec<LayerKind> = leaves[0].path.iter().map(|(k, _)| *k).collect();
    for leaf in &leaves {
        let kinds: Vec<LayerKind> = leaf.path.iter().map(|(k, _)| *k).collect();
        if kinds != template {
            return Err(Error::Unsupported("heterogeneous hwloc tree shapes are not supported".into()));
        }
    }

    let types = template;
    let mut threads = Vec::with_capacity(leaves.len());
    let mut all_os_ids = Vec::with_capacity(leaves.len());
    for (idx, leaf) in leaves.iter().enumerate() {
        let ids = leaf.path.iter().map(|(_, id)| LayerId::Known(*id)).collect();
        threads.push(HwThread::new(leaf.os_id, idx, ids, CoreAttrs::default()));
        all_os_ids.push(leaf.os_id);
    }

    let capacity = all_os_ids.iter().max().map(|m| m + 1).unwrap_or(0);
    let full_mask = Mask::from_ids(capacity, all_os_ids);
    Ok(Topology::from_discovery(types, threads, full_mask))
}

/// Builds a `(package, core, thread)` topology from AIX resource sets: each
/// RAD becomes a package, cores derived as `os_id / smt_threads`.
pub fn transform_aix_srad(sets: &[AixResourceSet], smt_threads: usize) -> Result<Topology> {
    if smt_threads == 0 {
        return Err(Error::InvalidParameter("smt_threads must be positive".into()));
    }

    let types = vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread];
    let mut threads = Vec::new();
    let mut all_os_ids = Vec::new();

    for set in sets {
        for &os_id in &set.os_ids {
            let core = (os_id / smt_threads) as u32;
            let thread = (os_id % smt_threads) as u32;
            let idx = threads.len();
            threads.push(HwThread::new(
                os_id,
                idx,
                vec![LayerId::Known(set.rad_id), LayerId::Known(core), LayerId::Known(thread)],
                CoreAttrs::default(),
            ));
            all_os_ids.push(os_id);
        }
    }

    if threads.is_empty() {
        return Err(Error::Detection(DetectionFailure::UnknownTopology));
    }

    let capacity = all_os_ids.iter().max().map(|m| m + 1).unwrap_or(0);
    let full_mask = Mask::from_ids(capacity, all_os_ids);
    Ok(Topology::from_discovery(types, threads, full_mask))
}

const BITS_PER_GROUP: usize = 64;

/// Builds a `(group, core, thread)` topology from Windows processor groups:
/// `thread = core = os_id mod BITS_PER_GROUP`.
pub fn transform_windows_groups(groups: &[WindowsGroupInfo]) -> Result<Topology> {
    let types = vec![LayerKind::ProcGroup, LayerKind::Core, LayerKind::Thread];
    let mut threads = Vec::new();
    let mut all_os_ids = Vec::new();
    let mut seen_groups: HashSet<u32> = HashSet::new();

    for group in groups {
        seen_groups.insert(group.group_id);
        for &os_id in &group.os_ids {
            let local = (os_id % BITS_PER_GROUP) as u32;
            let idx = threads.len();
            threads.push(HwThread::new(
                os_id,
                idx,
                vec![LayerId::Known(group.group_id), LayerId::Known(local), LayerId::Known(local)],
                CoreAttrs::default(),
            ));
            all_os_ids.push(os_id);
        }
    }

    if threads.is_empty() {
        return Err(Error::Detection(DetectionFailure::UnknownTopology));
    }

    let capacity = all_os_ids.iter().max().map(|m| m + 1).unwrap_or(0);
    let mut full_mask = Mask::from_ids(capacity, all_os_ids.clone());
    let group_of_bit: Vec<usize> = (0..capacity).map(|id| id / BITS_PER_GROUP).collect();
    full_mask.attach_groups(group_of_bit);
    Ok(Topology::from_discovery(types, threads, full_mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms_simple_hwloc_tree() {
        let tree = HwlocNode {
            kind: LayerKind::Unknown,
            os_id: None,
            children: vec![HwlocNode {
                kind: LayerKind::Core,
                os_id: Some(0),
                children: vec![],
            }],
        };
        let topo = transform_hwloc(&tree).unwrap();
        assert_eq!(topo.num_threads(), 1);
    }

    #[test]
    fn transforms_aix_srad_resource_sets() {
        let sets = vec![AixResourceSet { rad_id: 0, os_ids: vec![0, 1, 2, 3] }];
        let topo = transform_aix_srad(&sets, 2).unwrap();
        assert_eq!(topo.num_threads(), 4);
    }

    #[test]
    fn transforms_windows_processor_groups() {
        let groups = vec![WindowsGroupInfo { group_id: 0, os_ids: vec![0, 1] }];
        let topo = transform_windows_groups(&groups).unwrap();
        assert_eq!(topo.num_threads(), 2);
        assert_eq!(topo.full_mask.group_of(), Some(0));
    }
}
