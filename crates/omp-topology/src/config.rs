//! Affinity configuration and its outputs: the surface a caller populates to
//! describe a binding policy, and the place vector + per-place summaries the
//! place builder produces from it.

use crate::layer::{CoreAttrs, CoreEfficiency, CoreType, LayerId, LayerKind};
use crate::mask::Mask;

bitflags::bitflags! {
    /// The closed flag set governing affinity behavior.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct AffinityFlags: u16 {
        const VERBOSE         = 1 << 0;
        const RESPECT         = 1 << 1;
        const WARNINGS        = 1 << 2;
        const DUPS            = 1 << 3;
        const OMP_PLACES      = 1 << 4;
        const CORE_TYPES_GRAN = 1 << 5;
        const CORE_EFFS_GRAN  = 1 << 6;
        const INITIALIZED     = 1 << 7;
    }
}

/// The place-assignment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AffinityType {
    None,
    Explicit,
    Logical,
    Physical,
    Scatter,
    Compact,
    Balanced,
    Disabled,
}

impl std::fmt::Display for AffinityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AffinityType::None => "none",
            AffinityType::Explicit => "explicit",
            AffinityType::Logical => "logical",
            AffinityType::Physical => "physical",
            AffinityType::Scatter => "scatter",
            AffinityType::Compact => "compact",
            AffinityType::Balanced => "balanced",
            AffinityType::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Per-place topology summary: the id at each layer and the hybrid
/// attributes shared by every thread in the place, or [`LayerId::Multiple`]
/// / [`CoreType::Multiple`] when the place spans more than one value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlaceSummary {
    pub ids: Vec<LayerId>,
    pub attrs: CoreAttrs,
}

/// One distinct policy set. A process typically carries two: one for user
/// threads and one for hidden-helper threads.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AffinityConfig {
    pub ty: AffinityType,
    pub granularity: LayerKind,
    /// Grammar text for `explicit`: a proclist unless
    /// `flags.contains(OMP_PLACES)`, in which case it is parsed as an
    /// `OMP_PLACES` placelist instead.
    pub proclist: Option<String>,
    pub offset: i64,
    pub compact: i64,
    pub flags: AffinityFlags,
    /// `OMP_NUM_PLACES`: caps the number of generated places when set.
    pub num_places_cap: Option<usize>,
    /// The process full mask, used by the binding engine when
    /// `OMP_PROC_BIND` is off: every thread binds to this mask rather than
    /// to any individual place.
    pub full_mask: Mask,

    // Outputs ("os_id_masks" is produced before "masks").
    pub num_masks: usize,
    pub masks: Vec<Mask>,
    pub os_id_masks: Vec<Mask>,
    pub summaries: Vec<PlaceSummary>,
}

impl AffinityConfig {
    /// A freshly created, uninitialized config ("created empty, then
    /// initialized once").
    pub fn new(ty: AffinityType, granularity: LayerKind) -> Self {
        AffinityConfig {
            ty,
            granularity,
            proclist: None,
            offset: 0,
            compact: 0,
            flags: AffinityFlags::WARNINGS,
            num_places_cap: None,
            full_mask: Mask::empty(0),
            num_masks: 0,
            masks: Vec::new(),
            os_id_masks: Vec::new(),
            summaries: Vec::new(),
        }
    }

    pub fn with_proclist(mut self, proclist: impl Into<String>) -> Self {
        self.proclist = Some(proclist.into());
        self
    }

    pub fn with_full_mask(mut self, full_mask: Mask) -> Self {
        self.full_mask = full_mask;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_compact(mut self, compact: i64) -> Self {
        self.compact = compact;
        self
    }

    pub fn with_flags(mut self, flags: AffinityFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_num_places_cap(mut self, cap: usize) -> Self {
        self.num_places_cap = Some(cap);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.flags.contains(AffinityFlags::INITIALIZED)
    }
}

/// Collapses a set of hybrid attributes seen within one place into a single
/// value, using the `Multiple`/`Unknown` sentinels when they disagree.
pub(crate) fn aggregate_attrs<'a>(attrs: impl Iterator<Item = &'a CoreAttrs>) -> CoreAttrs {
    let mut core_type: Option<CoreType> = None;
    let mut efficiency: Option<CoreEfficiency> = None;
    let mut any = false;
    for a in attrs {
        any = true;
        core_type = match core_type {
            None => Some(a.core_type),
            Some(t) if t == a.core_type => Some(t),
            Some(_) => Some(CoreType::Multiple),
        };
        efficiency = match efficiency {
            None => Some(a.efficiency),
            Some(e) if e == a.efficiency => Some(e),
            Some(_) => Some(CoreEfficiency::Multiple),
        };
    }
    if !any {
        return CoreAttrs::UNKNOWN;
    }
    CoreAttrs { core_type: core_type.unwrap(), efficiency: efficiency.unwrap() }
}

/// Collapses a set of per-layer ids seen within one place into a single
/// tuple, using [`LayerId::Multiple`] when a layer disagrees across members.
pub(crate) fn aggregate_ids<'a>(depth: usize, id_rows: impl Iterator<Item = &'a [LayerId]> + Clone) -> Vec<LayerId> {
    let mut out = vec![LayerId::Unknown; depth];
    for l in 0..depth {
        let mut vals = id_rows.clone().map(|row| row[l]);
        let Some(first) = vals.next() else { continue };
        out[l] = if vals.all(|v| v == first) { first } else { LayerId::Multiple };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_attrs_collapses_to_multiple_on_disagreement() {
        let a = CoreAttrs { core_type: CoreType::Core, efficiency: CoreEfficiency::Known(1) };
        let b = CoreAttrs { core_type: CoreType::Atom, efficiency: CoreEfficiency::Known(0) };
        let agg = aggregate_attrs([a, b].iter());
        assert_eq!(agg.core_type, CoreType::Multiple);
        assert_eq!(agg.efficiency, CoreEfficiency::Multiple);
    }

    #[test]
    fn aggregate_attrs_keeps_value_when_unanimous() {
        let a = CoreAttrs { core_type: CoreType::Core, efficiency: CoreEfficiency::Known(1) };
        let agg = aggregate_attrs([a, a].iter());
        assert_eq!(agg, a);
    }

    #[test]
    fn aggregate_ids_marks_multiple_only_on_disagreeing_layers() {
        let rows: Vec<Vec<LayerId>> = vec![
            vec![LayerId::Known(0), LayerId::Known(1)],
            vec![LayerId::Known(0), LayerId::Known(2)],
        ];
        let refs: Vec<&[LayerId]> = rows.iter().map(|r| r.as_slice()).collect();
        let agg = aggregate_ids(2, refs.into_iter());
        assert_eq!(agg[0], LayerId::Known(0));
        assert_eq!(agg[1], LayerId::Multiple);
    }
}
