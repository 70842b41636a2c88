//! The `RawTopologySource` collaborator: raw platform input for the three
//! back-ends whose gathering step is true OS/vendor plumbing outside this
//! crate's stated scope (hwloc tree walking, AIX SRAD enumeration, Windows
//! processor-group enumeration). This crate implements the *pure
//! transformation* each back-end performs on that input; a surrounding
//! runtime supplies the input itself on platforms where it is available.

use crate::error::{Error, Result};
use crate::layer::LayerKind;

/// One node of an hwloc-style topology tree. Leaf nodes (processing units)
/// carry `os_id`; internal nodes carry the layer kind they represent.
#[derive(Debug, Clone)]
pub struct HwlocNode {
    pub kind: LayerKind,
    pub os_id: Option<usize>,
    pub children: Vec<HwlocNode>,
}

/// One AIX resource set (RAD) under the current SDL.
#[derive(Debug, Clone)]
pub struct AixResourceSet {
    pub rad_id: u32,
    pub os_ids: Vec<usize>,
}

/// One Windows processor group.
#[derive(Debug, Clone)]
pub struct WindowsGroupInfo {
    pub group_id: u32,
    pub os_ids: Vec<usize>,
}

/// Collaborator interface supplying raw input this crate cannot itself
/// gather in a portable way. The default implementation (used whenever no
/// runtime-specific source is wired in) reports every method unsupported,
/// which is correct on every platform except where the surrounding runtime
/// chooses to implement one.
pub trait RawTopologySource {
    fn hwloc_tree(&self) -> Result<HwlocNode> {
        Err(Error::Unsupported("no hwloc tree source configured".into()))
    }

    fn aix_srad_resource_sets(&self) -> Result<Vec<AixResourceSet>> {
        Err(Error::Unsupported("no AIX SRAD source configured".into()))
    }

    fn windows_processor_groups(&self) -> Result<Vec<WindowsGroupInfo>> {
        Err(Error::Unsupported("no Windows processor-group source configured".into()))
    }

    /// SMT threads per core, used to derive `(package, core, thread)` from
    /// AIX resource sets. Default of 1 degrades gracefully to one thread per
    /// OS id when the collaborator doesn't know better.
    fn aix_smt_threads(&self) -> usize {
        1
    }
}

/// The always-unsupported source used by the default discovery policy on
/// platforms with no runtime-supplied collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRawTopologySource;

impl RawTopologySource for NullRawTopologySource {}
