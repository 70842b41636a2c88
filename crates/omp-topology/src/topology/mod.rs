//! Canonical topology representation.

mod canonicalize;
mod sort;
pub mod subset;

pub use canonicalize::canonicalize;
pub(crate) use canonicalize::recompute_aggregates;
pub use sort::sort_by_compact;
pub(crate) use sort::sort_by_ids;

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::layer::{CoreAttrs, LayerId, LayerKind};
use crate::mask::Mask;

/// One hardware thread (logical processor) record.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HwThread {
    pub os_id: usize,
    pub original_idx: usize,
    /// Per-layer id, ordered outermost (index 0) to innermost, parallel to
    /// [`Topology::types`].
    pub ids: Vec<LayerId>,
    /// Per-layer dense sub-id, derived during canonicalization.
    pub sub_ids: Vec<u32>,
    pub attrs: CoreAttrs,
    pub leader: bool,
}

impl HwThread {
    pub(crate) fn new(os_id: usize, original_idx: usize, ids: Vec<LayerId>, attrs: CoreAttrs) -> Self {
        let depth = ids.len();
        HwThread {
            os_id,
            original_idx,
            ids,
            sub_ids: vec![0; depth],
            attrs,
            leader: false,
        }
    }
}

/// The canonical, process-wide hardware topology.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Topology {
    pub types: Vec<LayerKind>,
    pub threads: Vec<HwThread>,
    pub count: Vec<usize>,
    pub ratio: Vec<usize>,
    pub equivalent: HashMap<LayerKind, LayerKind>,
    pub core_types: Vec<crate::layer::CoreType>,
    pub num_core_efficiencies: usize,
    pub uniform: bool,
    /// Current sort bias, an integer in `[0, depth]`.
    pub compact: usize,
    /// The set of OS processor ids the owning process is permitted to use.
    pub full_mask: Mask,
}

impl Topology {
    /// Build an uncanonicalized topology from discovery output: `types` in
    /// outermost-to-innermost order and one [`HwThread`] per logical
    /// processor, each already populated with `os_id`/`original_idx`/`ids`/`attrs`.
    pub(crate) fn from_discovery(types: Vec<LayerKind>, threads: Vec<HwThread>, full_mask: Mask) -> Self {
        let equivalent = types.iter().map(|&k| (k, k)).collect();
        let depth = types.len();
        Topology {
            types,
            threads,
            count: vec![0; depth],
            ratio: vec![0; depth],
            equivalent,
            core_types: Vec::new(),
            num_core_efficiencies: 0,
            uniform: false,
            compact: 0,
            full_mask,
        }
    }

    pub fn depth(&self) -> usize {
        self.types.len()
    }

    pub fn num_os_id_masks(&self) -> usize {
        self.threads.iter().map(|t| t.os_id).max().map(|m| m + 1).unwrap_or(0)
    }

    /// The real layer kind `kind` resolves to through the equivalence map.
    pub fn resolve(&self, kind: LayerKind) -> LayerKind {
        let mut cur = kind;
        for _ in 0..self.types.len() + 1 {
            match self.equivalent.get(&cur) {
                Some(&next) if next != cur => cur = next,
                _ => return cur,
            }
        }
        cur
    }

    /// The depth-index of `kind` (after equivalence resolution), or an error
    /// if the layer does not exist in this topology.
    pub fn layer_index(&self, kind: LayerKind) -> Result<usize> {
        let resolved = self.resolve(kind);
        self.types
            .iter()
            .position(|&k| k == resolved)
            .ok_or_else(|| Error::InvalidParameter(format!("layer {kind} not present in topology")))
    }

    pub fn core_level_index(&self) -> Option<usize> {
        self.layer_index(LayerKind::Core).ok()
    }

    pub fn thread_level_index(&self) -> Option<usize> {
        self.layer_index(LayerKind::Thread).ok()
    }

    pub fn socket_level_index(&self) -> Option<usize> {
        self.layer_index(LayerKind::Socket).ok()
    }

    pub fn is_hybrid(&self) -> bool {
        self.core_types.len() > 1 || self.num_core_efficiencies > 1
    }

    pub fn num_packages(&self) -> usize {
        self.socket_level_index().map(|i| self.count[i]).unwrap_or(1)
    }

    pub fn num_cores(&self) -> usize {
        self.core_level_index().map(|i| self.count[i]).unwrap_or(self.threads.len())
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn threads_per_core(&self) -> usize {
        match (self.thread_level_index(), self.core_level_index()) {
            (Some(t), Some(c)) if self.ratio[c] > 0 => self.ratio[t] / self.ratio[c],
            _ => 1,
        }
    }

    pub fn cores_per_pkg(&self) -> usize {
        match (self.core_level_index(), self.socket_level_index()) {
            (Some(co), Some(so)) if self.ratio[so] > 0 => self.ratio[co] / self.ratio[so],
            (Some(co), _) => self.ratio[co],
            _ => 1,
        }
    }

    /// Index-by-`os_id` lookup table, rebuilt whenever the thread array
    /// changes; the table and the parallel os-id structure can otherwise
    /// drift out of sync.
    pub fn os_id_index_map(&self) -> HashMap<usize, usize> {
        self.threads.iter().enumerate().map(|(i, t)| (t.os_id, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_topology(n: usize) -> Topology {
        let types = vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread];
        let threads = (0..n)
            .map(|i| HwThread::new(i, i, vec![LayerId::Known(0), LayerId::Known(i as u32), LayerId::Known(0)], CoreAttrs::default()))
            .collect();
        let full_mask = Mask::full(n);
        let mut topo = Topology::from_discovery(types, threads, full_mask);
        canonicalize(&mut topo).unwrap();
        topo
    }

    #[test]
    fn flat_topology_has_expected_counts() {
        let topo = flat_topology(4);
        assert_eq!(topo.num_cores(), 4);
        assert_eq!(topo.num_threads(), 4);
        assert!(topo.uniform);
    }

    #[test]
    fn resolve_is_identity_before_aliasing() {
        let topo = flat_topology(4);
        assert_eq!(topo.resolve(LayerKind::Socket), LayerKind::Socket);
    }
}
