//! `/proc/cpuinfo` back-end, native on Linux. Grounded on the teacher's
//! `platform::linux::cpu::proc` line-oriented parsing style and
//! `platform::linux::utils::{read_sysfs_value, parse_cpu_range_list}` for the
//! sysfs override path.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{DetectionFailure, Error, Result};
use crate::layer::{CoreAttrs, LayerId, LayerKind};
use crate::mask::Mask;
use crate::topology::{HwThread, Topology};

#[derive(Debug, Default, Clone)]
struct ProcRecord {
    processor: Option<usize>,
    physical_id: Option<u32>,
    core_id: Option<u32>,
    thread_id: Option<u32>,
    book_id: Option<u32>,
    drawer_id: Option<u32>,
    node_ids: Vec<u32>,
}

const MAX_LINE_LEN: usize = 4096;
const MAX_RECORDS: usize = 8192;

fn parse_node_field(key: &str) -> Option<()> {
    if key.starts_with("node_") && key.ends_with(" id") {
        Some(())
    } else {
        None
    }
}

/// Parses `/proc/cpuinfo` into one [`ProcRecord`] per processor block.
fn parse_proc_cpuinfo_records() -> Result<Vec<ProcRecord>> {
    let file = std::fs::File::open("/proc/cpuinfo")?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut current = ProcRecord::default();
    let mut any_field_seen = false;

    for line_res in reader.lines() {
        let line = line_res?;
        if line.len() > MAX_LINE_LEN {
            return Err(Error::Detection(DetectionFailure::LongLineCpuinfo));
        }
        if line.trim().is_empty() {
            if any_field_seen {
                records.push(std::mem::take(&mut current));
                any_field_seen = false;
                if records.len() > MAX_RECORDS {
                    return Err(Error::Detection(DetectionFailure::TooManyProcRecords));
                }
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim();
        let value = value.trim();
        any_field_seen = true;

        match key {
            "processor" | "cpu number" => current.processor = value.parse().ok(),
            "physical id" => current.physical_id = value.parse().ok(),
            "core id" => current.core_id = value.parse().ok(),
            "thread id" => current.thread_id = value.parse().ok(),
            "book_id" => current.book_id = value.parse().ok(),
            "drawer_id" => current.drawer_id = value.parse().ok(),
            _ if parse_node_field(key).is_some() => {
                if let Ok(id) = value.parse() {
                    current.node_ids.push(id);
                }
            }
            _ => {}
        }
    }
    if any_field_seen {
        records.push(current);
    }

    if records.is_empty() {
        return Err(Error::Detection(DetectionFailure::NoProcRecords));
    }
    Ok(records)
}

fn sysfs_topology_path(os_id: usize) -> PathBuf {
    PathBuf::from(format!("/sys/devices/system/cpu/cpu{os_id}/topology"))
}

fn read_sysfs_u32(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn parse_range_list(s: &str) -> Option<Vec<usize>> {
    let mut ids = Vec::new();
    for part in s.trim().split(',') {
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: usize = lo.parse().ok()?;
            let hi: usize = hi.parse().ok()?;
            ids.extend(lo..=hi);
        } else {
            ids.push(part.parse().ok()?);
        }
    }
    Some(ids)
}

fn sysfs_override(os_id: usize, record: &mut ProcRecord) {
    let base = sysfs_topology_path(os_id);
    if let Some(v) = read_sysfs_u32(&base.join("physical_package_id")) {
        record.physical_id = Some(v);
    }
    if let Some(v) = read_sysfs_u32(&base.join("core_id")) {
        record.core_id = Some(v);
    }
}

/// Reconstructs a missing `physical id` from the `core_siblings_list` sysfs
/// file: every OS CPU sharing the same sibling set is assigned the same
/// synthesized package id.
fn reconstruct_missing_package_ids(records: &mut [ProcRecord]) {
    let mut next_synth_id = 0u32;
    let mut sibling_to_pkg: HashMap<Vec<usize>, u32> = HashMap::new();

    for record in records.iter_mut() {
        if record.physical_id.is_some() {
            continue;
        }
        let Some(os_id) = record.processor else { continue };
        let siblings_path = sysfs_topology_path(os_id).join("core_siblings_list");
        let siblings = std::fs::read_to_string(&siblings_path).ok().and_then(|s| parse_range_list(&s));
        let key = siblings.unwrap_or_default();
        let pkg = *sibling_to_pkg.entry(key).or_insert_with(|| {
            let id = next_synth_id;
            next_synth_id += 1;
            id
        });
        record.physical_id = Some(pkg);
    }
}

/// Reassigns thread ids sequentially within `(package, core)` groups when
/// the source data produced duplicates.
fn fixup_duplicate_thread_ids(records: &mut [ProcRecord]) {
    let mut seen: HashMap<(u32, u32), HashSet<u32>> = HashMap::new();
    let mut needs_fixup: HashSet<(u32, u32)> = HashSet::new();

    for r in records.iter() {
        let key = (r.physical_id.unwrap_or(0), r.core_id.unwrap_or(0));
        let tid = r.thread_id.unwrap_or(0);
        if !seen.entry(key).or_default().insert(tid) {
            needs_fixup.insert(key);
        }
    }

    if needs_fixup.is_empty() {
        return;
    }

    let mut counters: HashMap<(u32, u32), u32> = HashMap::new();
    for r in records.iter_mut() {
        let key = (r.physical_id.unwrap_or(0), r.core_id.unwrap_or(0));
        if needs_fixup.contains(&key) {
            let counter = counters.entry(key).or_insert(0);
            r.thread_id = Some(*counter);
            *counter += 1;
        }
    }
}

/// Runs `/proc/cpuinfo`-based discovery, applying sysfs overrides and the
/// package-id/thread-id repair passes.
pub fn discover() -> Result<Topology> {
    let mut records = parse_proc_cpuinfo_records()?;

    for record in records.iter_mut() {
        if let Some(os_id) = record.processor {
            sysfs_override(os_id, record);
        }
    }
    reconstruct_missing_package_ids(&mut records);
    fixup_duplicate_thread_ids(&mut records);

    let has_numa = records.iter().any(|r| !r.node_ids.is_empty());
    let has_mainframe = records.iter().any(|r| r.book_id.is_some() || r.drawer_id.is_some());

    let mut types = vec![LayerKind::Socket];
    if has_numa {
        types.push(LayerKind::Numa);
    }
    types.push(LayerKind::Core);
    types.push(LayerKind::Thread);

    let mut threads = Vec::with_capacity(records.len());
    let mut all_os_ids = Vec::with_capacity(records.len());

    for (idx, r) in records.iter().enumerate() {
        let Some(os_id) = r.processor else {
            return Err(Error::Detection(DetectionFailure::MissingProcField("processor".into())));
        };

        let mut package = r.physical_id.unwrap_or(0);
        if has_mainframe {
            package |= r.book_id.unwrap_or(0) << 8;
            package |= r.drawer_id.unwrap_or(0) << 16;
        }

        let mut ids = vec![LayerId::Known(package)];
        if has_numa {
            let node = r.node_ids.first().copied();
            ids.push(node.map(LayerId::Known).unwrap_or(LayerId::Unknown));
        }
        ids.push(r.core_id.map(LayerId::Known).unwrap_or(LayerId::Unknown));
        ids.push(r.thread_id.map(LayerId::Known).unwrap_or(LayerId::Known(0)));

        threads.push(HwThread::new(os_id, idx, ids, CoreAttrs::default()));
        all_os_ids.push(os_id);
    }

    let capacity = all_os_ids.iter().max().map(|m| m + 1).unwrap_or(0);
    let full_mask = Mask::from_ids(capacity, all_os_ids);
    Ok(Topology::from_discovery(types, threads, full_mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixup_reassigns_duplicate_thread_ids_within_a_core() {
        let mut records = vec![
            ProcRecord { processor: Some(0), physical_id: Some(0), core_id: Some(0), thread_id: Some(0), ..Default::default() },
            ProcRecord { processor: Some(1), physical_id: Some(0), core_id: Some(0), thread_id: Some(0), ..Default::default() },
        ];
        fixup_duplicate_thread_ids(&mut records);
        let ids: HashSet<_> = records.iter().map(|r| r.thread_id.unwrap()).collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn reconstructs_package_id_from_sibling_grouping_fallback() {
        let mut records = vec![
            ProcRecord { processor: Some(0), physical_id: None, ..Default::default() },
            ProcRecord { processor: Some(1), physical_id: None, ..Default::default() },
        ];
        reconstruct_missing_package_ids(&mut records);
        assert!(records[0].physical_id.is_some());
        assert!(records[1].physical_id.is_some());
    }
}
