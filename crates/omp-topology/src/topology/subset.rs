//! The `HW_SUBSET` filter DSL: parsing, validation, and application against
//! a [`Topology`].

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::layer::{CoreType, LayerId, LayerKind};
use crate::mask::Mask;

use super::Topology;

/// `num` in a subset item: either a fixed count or `*` (`USE_ALL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsetCount {
    Use(u32),
    All,
}

/// A hybrid-core attribute predicate attached to a subset item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsetAttr {
    IntelCore,
    IntelAtom,
    Eff(u32),
}

/// One parsed `HW_SUBSET` item: `num ('@' offset)? layer (':' attrs)?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwSubsetItem {
    pub layer: LayerKind,
    pub num: SubsetCount,
    pub offset: u32,
    pub attrs: Vec<SubsetAttr>,
}

/// Maps an `HW_SUBSET`/`OMP_PLACES` layer keyword to its [`LayerKind`].
/// Shared with [`crate::grammar`]'s named-place parsing since both DSLs draw
/// from the same layer vocabulary.
pub(crate) fn layer_from_str(s: &str) -> Result<LayerKind> {
    Ok(match s {
        "sockets" => LayerKind::Socket,
        "dice" => LayerKind::Die,
        "modules" => LayerKind::Module,
        "tiles" => LayerKind::Tile,
        "numa_domains" => LayerKind::Numa,
        "l3_caches" => LayerKind::L3,
        "l2_caches" => LayerKind::L2,
        "l1_caches" => LayerKind::L1,
        "cores" => LayerKind::Core,
        "threads" => LayerKind::Thread,
        "proc_groups" => LayerKind::ProcGroup,
        other => return Err(Error::InvalidParameter(format!("unknown HW_SUBSET layer name {other:?}"))),
    })
}

fn attr_from_str(s: &str) -> Result<SubsetAttr> {
    let s = s.trim();
    if s == "intel_core" {
        return Ok(SubsetAttr::IntelCore);
    }
    if s == "intel_atom" {
        return Ok(SubsetAttr::IntelAtom);
    }
    if let Some(rest) = s.strip_prefix("eff") {
        let n: u32 = rest
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid efficiency attribute {s:?}")))?;
        return Ok(SubsetAttr::Eff(n));
    }
    Err(Error::InvalidParameter(format!("unknown HW_SUBSET attribute {s:?}")))
}

/// Items separated by top-level commas only; a comma is a new item's start
/// iff the text immediately following it begins with a digit or `*` (attrs
/// never do), otherwise it continues the previous item's attr list.
fn split_items(s: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for part in s.split(',') {
        let starts_new = part
            .trim_start()
            .chars()
            .next()
            .map(|c| c.is_ascii_digit() || c == '*')
            .unwrap_or(false);
        if starts_new || items.is_empty() {
            items.push(part.to_string());
        } else if let Some(last) = items.last_mut() {
            last.push(',');
            last.push_str(part);
        }
    }
    items
}

fn parse_item(raw: &str) -> Result<HwSubsetItem> {
    let raw = raw.trim();
    let (head, attr_str) = match raw.split_once(':') {
        Some((h, a)) => (h.trim(), Some(a.trim())),
        None => (raw, None),
    };

    let bytes = head.as_bytes();
    let mut i = 0usize;
    let num = if head.starts_with('*') {
        i += 1;
        SubsetCount::All
    } else {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(Error::InvalidParameter(format!("HW_SUBSET item {raw:?} is missing a count")));
        }
        let n: u32 = head[start..i]
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid count in HW_SUBSET item {raw:?}")))?;
        SubsetCount::Use(n)
    };

    let mut offset = 0u32;
    if i < bytes.len() && bytes[i] == b'@' {
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(Error::InvalidParameter(format!("HW_SUBSET item {raw:?} has an empty offset")));
        }
        offset = head[start..i]
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("invalid offset in HW_SUBSET item {raw:?}")))?;
    }

    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    let layer_str = head[i..].trim();
    if layer_str.is_empty() {
        return Err(Error::InvalidParameter(format!("HW_SUBSET item {raw:?} is missing a layer name")));
    }
    let layer = layer_from_str(layer_str)?;

    let attrs = match attr_str {
        None => Vec::new(),
        Some(a) => a.split(',').map(attr_from_str).collect::<Result<Vec<_>>>()?,
    };

    Ok(HwSubsetItem { layer, num, offset, attrs })
}

/// Parse a full `HW_SUBSET` string into its constituent items.
pub fn parse_hw_subset(s: &str) -> Result<Vec<HwSubsetItem>> {
    split_items(s).iter().map(|raw| parse_item(raw)).collect()
}

fn attrs_mutually_exclusive_ok(attrs: &[SubsetAttr]) -> bool {
    let has_type = attrs.iter().any(|a| matches!(a, SubsetAttr::IntelCore | SubsetAttr::IntelAtom));
    let has_eff = attrs.iter().any(|a| matches!(a, SubsetAttr::Eff(_)));
    !(has_type && has_eff)
}

fn attrs_match(attrs: &crate::layer::CoreAttrs, wanted: &[SubsetAttr]) -> bool {
    wanted.iter().all(|w| match w {
        SubsetAttr::IntelCore => attrs.core_type == CoreType::Core,
        SubsetAttr::IntelAtom => attrs.core_type == CoreType::Atom,
        SubsetAttr::Eff(n) => attrs.efficiency == crate::layer::CoreEfficiency::Known(*n),
    })
}

fn validate(topo: &Topology, items: &[HwSubsetItem]) -> Result<()> {
    let mut seen_classes = HashSet::new();
    let mut core_layer_attributed = false;
    let mut core_layer_plain = false;

    for item in items {
        let layer_idx = topo.layer_index(item.layer)?;
        let resolved = topo.resolve(item.layer);
        if !seen_classes.insert(resolved) {
            return Err(Error::InvalidParameter(format!(
                "HW_SUBSET references layer {:?} more than once (after equivalence resolution)",
                item.layer
            )));
        }

        if !attrs_mutually_exclusive_ok(&item.attrs) {
            return Err(Error::InvalidParameter(
                "HW_SUBSET item mixes core-type and core-efficiency attributes".into(),
            ));
        }

        if !item.attrs.is_empty() {
            if !topo.is_hybrid() {
                return Err(Error::InvalidParameter(
                    "HW_SUBSET core attributes are only valid on a hybrid topology".into(),
                ));
            }
            for attr in &item.attrs {
                let observed = match attr {
                    SubsetAttr::IntelCore => topo.core_types.contains(&CoreType::Core),
                    SubsetAttr::IntelAtom => topo.core_types.contains(&CoreType::Atom),
                    SubsetAttr::Eff(n) => topo
                        .threads
                        .iter()
                        .any(|t| t.attrs.efficiency == crate::layer::CoreEfficiency::Known(*n)),
                };
                if !observed {
                    return Err(Error::InvalidParameter(format!("HW_SUBSET attribute {attr:?} has no observed value in this topology")));
                }
            }
        }

        if resolved == topo.resolve(LayerKind::Core) {
            if item.attrs.is_empty() {
                core_layer_plain = true;
            } else {
                core_layer_attributed = true;
            }
        }

        if let SubsetCount::Use(n) = item.num {
            if (n as usize + item.offset as usize) > topo.ratio[layer_idx] {
                return Err(Error::InvalidParameter(format!(
                    "HW_SUBSET item for {:?} requests {n}@{} but only {} are available",
                    item.layer, item.offset, topo.ratio[layer_idx]
                )));
            }
        }
    }

    if core_layer_attributed && core_layer_plain {
        return Err(Error::InvalidParameter(
            "HW_SUBSET mixes an attributed and a non-attributed item at the core layer".into(),
        ));
    }

    Ok(())
}

/// Applies a parsed `HW_SUBSET` request to `topo` in place.
pub fn apply_subset(topo: &mut Topology, items: &[HwSubsetItem]) -> Result<()> {
    validate(topo, items)?;

    let mut sorted = items.to_vec();
    sorted.sort_by_key(|it| topo.layer_index(it.layer).unwrap_or(usize::MAX));

    let n = topo.threads.len();
    let mut scopes: Vec<Vec<usize>> = vec![(0..n).collect()];

    for item in &sorted {
        let layer_idx = topo.layer_index(item.layer)?;
        let mut new_scopes: Vec<Vec<usize>> = Vec::new();

        for scope in &scopes {
            let mut order: Vec<LayerId> = Vec::new();
            let mut groups: HashMap<LayerId, Vec<usize>> = HashMap::new();
            for &idx in scope {
                let id = topo.threads[idx].ids[layer_idx];
                if !groups.contains_key(&id) {
                    order.push(id);
                }
                groups.entry(id).or_default().push(idx);
            }

            if !item.attrs.is_empty() {
                order.retain(|id| {
                    groups[id].iter().all(|&idx| attrs_match(&topo.threads[idx].attrs, &item.attrs))
                });
            }

            let offset = item.offset as usize;
            let take_n = match item.num {
                SubsetCount::All => order.len().saturating_sub(offset),
                SubsetCount::Use(k) => k as usize,
            };
            for id in order.into_iter().skip(offset).take(take_n) {
                new_scopes.push(groups.remove(&id).unwrap_or_default());
            }
        }

        scopes = new_scopes;
    }

    let mut keep_os_ids: Vec<usize> = Vec::new();
    for scope in &scopes {
        for idx in scope {
            keep_os_ids.push(topo.threads[*idx].os_id);
        }
    }

    if keep_os_ids.is_empty() {
        log::warn!("HW_SUBSET filter cleared every processor; leaving topology unchanged");
        return Ok(());
    }

    let mask = Mask::from_ids(topo.num_os_id_masks(), keep_os_ids);
    restrict_to_mask(topo, &mask)
}

/// Compacts `topo.threads` down to those whose `os_id` is set in `mask`,
/// re-gathers enumeration/uniformity/sub-ids/leaders, and narrows the
/// process-wide full mask. A no-op when `mask` already equals the full mask.
pub fn restrict_to_mask(topo: &mut Topology, mask: &Mask) -> Result<()> {
    if mask.equal(&topo.full_mask) {
        return Ok(());
    }
    topo.threads.retain(|t| t.os_id < mask.end() && mask.test(t.os_id));
    if topo.threads.is_empty() {
        return Err(Error::InvalidParameter("restrict_to_mask would remove every processor".into()));
    }
    super::recompute_aggregates(topo);
    topo.full_mask = mask.clone();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::CoreAttrs;
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
    fn parses_offset_and_plain_items() {
        let items = parse_hw_subset("1@1 sockets, 4 cores").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].layer, LayerKind::Socket);
        assert_eq!(items[0].num, SubsetCount::Use(1));
        assert_eq!(items[0].offset, 1);
        assert_eq!(items[1].layer, LayerKind::Core);
        assert_eq!(items[1].num, SubsetCount::Use(4));
    }

    #[test]
    fn parses_use_all_and_attrs() {
        let items = parse_hw_subset("*sockets, 3cores:eff1").unwrap();
        assert_eq!(items[0].num, SubsetCount::All);
        assert_eq!(items[1].attrs, vec![SubsetAttr::Eff(1)]);
    }

    #[test]
    fn subset_second_socket_first_four_cores() {
        let mut topo = uniform_2x8x2();
        let items = parse_hw_subset("1@1 sockets, 4 cores").unwrap();
        apply_subset(&mut topo, &items).unwrap();
        assert_eq!(topo.num_threads(), 8);
        assert!(topo.uniform);
        assert_eq!(topo.count[topo.layer_index(LayerKind::Socket).unwrap()], 1);
        assert_eq!(topo.ratio[topo.layer_index(LayerKind::Core).unwrap()], 4);
        for t in &topo.threads {
            assert_eq!(t.ids[0], LayerId::Known(1));
        }
    }

    #[test]
    fn core_attribute_on_non_hybrid_topology_rejected() {
        let topo = uniform_2x8x2();
        let items = vec![
            HwSubsetItem { layer: LayerKind::Core, num: SubsetCount::Use(4), offset: 0, attrs: vec![] },
            HwSubsetItem { layer: LayerKind::Thread, num: SubsetCount::Use(1), offset: 0, attrs: vec![SubsetAttr::Eff(1)] },
        ];
        assert!(validate(&topo, &items).is_err());
    }
}
