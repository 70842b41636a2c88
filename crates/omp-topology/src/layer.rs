//! Layer kinds and per-core hybrid attributes.

use std::fmt;

/// The closed enumeration of hardware layer kinds a [`crate::topology::Topology`]
/// can contain. Ordered outermost-to-innermost is a property of
/// [`crate::topology::Topology::types`], not of this enum's declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LayerKind {
    Socket,
    Die,
    Tile,
    Module,
    Numa,
    L3,
    L2,
    L1,
    Llc,
    Core,
    Thread,
    ProcGroup,
    Unknown,
}

impl LayerKind {
    /// Fixed drop-preference table used by radix-1 layer removal.
    /// Higher value means "kept in preference to a lower one".
    pub(crate) fn preference(self) -> u8 {
        use LayerKind::*;
        match self {
            Socket => 11,
            ProcGroup => 10,
            Core => 9,
            Thread => 8,
            Numa => 7,
            Die => 6,
            Tile => 5,
            Module => 4,
            L3 => 3,
            L2 => 2,
            L1 => 1,
            Llc => 0,
            Unknown => 0,
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LayerKind::Socket => "socket",
            LayerKind::Die => "die",
            LayerKind::Tile => "tile",
            LayerKind::Module => "module",
            LayerKind::Numa => "numa",
            LayerKind::L3 => "l3",
            LayerKind::L2 => "l2",
            LayerKind::L1 => "l1",
            LayerKind::Llc => "llc",
            LayerKind::Core => "core",
            LayerKind::Thread => "thread",
            LayerKind::ProcGroup => "proc_group",
            LayerKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A per-layer identifier. Most ids are plain integers; `Unknown` sorts last
/// in lexicographic thread comparisons, and `Multiple` is only valid in
/// aggregated (post-subset summary) views, never on a raw thread record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LayerId {
    Known(u32),
    Unknown,
    Multiple,
}

impl LayerId {
    pub fn as_known(self) -> Option<u32> {
        match self {
            LayerId::Known(v) => Some(v),
            _ => None,
        }
    }

    /// Sort key placing `Known` values first (ascending), then `Unknown`,
    /// then `Multiple` (unknown ids sort after any numeric id).
    pub(crate) fn sort_key(self) -> (u8, u32) {
        match self {
            LayerId::Known(v) => (0, v),
            LayerId::Unknown => (1, 0),
            LayerId::Multiple => (2, 0),
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerId::Known(v) => write!(f, "{v}"),
            LayerId::Unknown => f.write_str("?"),
            LayerId::Multiple => f.write_str("*"),
        }
    }
}

/// Core microarchitecture type observed at the core layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoreType {
    Atom,
    Core,
    Unknown,
    /// Sentinel used only in aggregated views spanning more than one type.
    Multiple,
}

impl fmt::Display for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoreType::Atom => "atom",
            CoreType::Core => "core",
            CoreType::Unknown => "unknown",
            CoreType::Multiple => "multiple",
        };
        f.write_str(s)
    }
}

/// Core efficiency class: a non-negative integer, higher meaning more
/// performant, or unknown/multiple as with [`CoreType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoreEfficiency {
    Known(u32),
    Unknown,
    Multiple,
}

/// Hybrid attributes attached to a hardware-thread record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoreAttrs {
    pub core_type: CoreType,
    pub efficiency: CoreEfficiency,
}

impl CoreAttrs {
    pub const UNKNOWN: CoreAttrs = CoreAttrs {
        core_type: CoreType::Unknown,
        efficiency: CoreEfficiency::Unknown,
    };

    pub fn is_known(&self) -> bool {
        !matches!(self.core_type, CoreType::Unknown | CoreType::Multiple)
    }
}

impl Default for CoreAttrs {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_table_ranks_socket_highest() {
        assert!(LayerKind::Socket.preference() > LayerKind::Core.preference());
        assert!(LayerKind::Core.preference() > LayerKind::Thread.preference());
        assert!(LayerKind::Thread.preference() > LayerKind::L1.preference());
    }

    #[test]
    fn layer_id_sort_key_orders_known_before_unknown_before_multiple() {
        let mut ids = vec![LayerId::Multiple, LayerId::Unknown, LayerId::Known(5), LayerId::Known(1)];
        ids.sort_by_key(|i| i.sort_key());
        assert_eq!(
            ids,
            vec![LayerId::Known(1), LayerId::Known(5), LayerId::Unknown, LayerId::Multiple]
        );
    }
}
