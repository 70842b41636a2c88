//! Opaque bitset over OS processor ids, generalized from the teacher's
//! `AffinityMask` into a full set-algebra type with a round-trippable
//! pretty-printer/parser pair.

use std::fmt;

use crate::error::{Error, Result};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// A set of OS processor ids in `[0, capacity)`.
///
/// Backed by a `Vec<u64>` word-packed bitset, exactly as the teacher's
/// `AffinityMask` is, but extended with `intersect`/`complement` and a
/// parser inverse of [`Mask::fmt`]'s pretty-printer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mask {
    bits: Vec<u64>,
    /// Number of addressable bits; `set`/`test` beyond this panic.
    capacity: usize,
    /// Populated only by back-ends that know about Windows processor
    /// groups; maps a bit index to its group id.
    #[cfg_attr(feature = "serde", serde(skip))]
    group_of_bit: Option<Vec<usize>>,
}

impl Mask {
    /// An empty mask with room for `capacity` processor ids.
    pub fn empty(capacity: usize) -> Self {
        let words = capacity.div_ceil(BITS_PER_WORD).max(1);
        Mask {
            bits: vec![0u64; words],
            capacity,
            group_of_bit: None,
        }
    }

    /// A mask with only `id` set.
    pub fn single(capacity: usize, id: usize) -> Self {
        let mut m = Self::empty(capacity);
        m.set(id);
        m
    }

    /// A mask containing every id in `ids`.
    pub fn from_ids<I: IntoIterator<Item = usize>>(capacity: usize, ids: I) -> Self {
        let mut m = Self::empty(capacity);
        for id in ids {
            m.set(id);
        }
        m
    }

    /// A full mask: every id in `[0, capacity)` set.
    pub fn full(capacity: usize) -> Self {
        let mut m = Self::empty(capacity);
        for i in 0..capacity {
            m.set(i);
        }
        m
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn attach_groups(&mut self, group_of_bit: Vec<usize>) {
        self.group_of_bit = Some(group_of_bit);
    }

    /// Returns the Windows processor group this mask lives entirely within,
    /// or `None` if the mask spans more than one group (or no group table
    /// is attached).
    pub fn group_of(&self) -> Option<usize> {
        let groups = self.group_of_bit.as_ref()?;
        let mut seen = None;
        for id in self.iter() {
            let g = groups.get(id).copied()?;
            match seen {
                None => seen = Some(g),
                Some(s) if s != g => return None,
                _ => {}
            }
        }
        seen
    }

    #[track_caller]
    fn check_index(&self, i: usize) {
        assert!(i < self.capacity, "processor id {i} out of range (capacity {})", self.capacity);
    }

    pub fn set(&mut self, i: usize) {
        self.check_index(i);
        self.bits[i / BITS_PER_WORD] |= 1u64 << (i % BITS_PER_WORD);
    }

    pub fn clear(&mut self, i: usize) {
        self.check_index(i);
        self.bits[i / BITS_PER_WORD] &= !(1u64 << (i % BITS_PER_WORD));
    }

    pub fn test(&self, i: usize) -> bool {
        self.check_index(i);
        (self.bits[i / BITS_PER_WORD] >> (i % BITS_PER_WORD)) & 1 != 0
    }

    pub fn union(&mut self, other: &Mask) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= b;
        }
    }

    pub fn intersect(&mut self, other: &Mask) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a &= b;
        }
    }

    /// In-place complement with respect to this mask's own capacity.
    pub fn complement(&mut self) {
        let bit_len = self.bits.len();
        for (idx, word) in self.bits.iter_mut().enumerate() {
            *word = !*word;
            if idx == bit_len - 1 {
                let rem = self.capacity % BITS_PER_WORD;
                if rem != 0 {
                    *word &= (1u64 << rem) - 1;
                }
            }
        }
    }

    pub fn equal(&self, other: &Mask) -> bool {
        self.bits == other.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }

    /// The next set bit strictly after `i`, or `None`.
    pub fn next(&self, i: usize) -> Option<usize> {
        self.iter().find(|&bit| bit > i)
    }

    pub fn end(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> MaskIter<'_> {
        MaskIter { mask: self, next: 0 }
    }

    pub fn as_words(&self) -> &[u64] {
        &self.bits
    }

    /// Parse the grammar produced by [`Mask`]'s `Display` impl:
    /// `"1,2,4-7,9"` or `"{<empty>}"`.
    pub fn parse(capacity: usize, s: &str) -> Result<Mask> {
        let s = s.trim();
        if s == "{<empty>}" {
            return Ok(Mask::empty(capacity));
        }
        let mut mask = Mask::empty(capacity);
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::InvalidParameter(format!("empty item in mask literal {s:?}")));
            }
            if let Some((lo, hi)) = part.split_once('-') {
                let lo: usize = lo
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidParameter(format!("invalid range start in {part:?}")))?;
                let hi: usize = hi
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidParameter(format!("invalid range end in {part:?}")))?;
                if lo > hi {
                    return Err(Error::InvalidParameter(format!("descending range {part:?}")));
                }
                for id in lo..=hi {
                    if id >= capacity {
                        return Err(Error::InvalidParameter(format!("id {id} exceeds mask capacity {capacity}")));
                    }
                    mask.set(id);
                }
            } else {
                let id: usize = part
                    .parse()
                    .map_err(|_| Error::InvalidParameter(format!("invalid id {part:?}")))?;
                if id >= capacity {
                    return Err(Error::InvalidParameter(format!("id {id} exceeds mask capacity {capacity}")));
                }
                mask.set(id);
            }
        }
        Ok(mask)
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("{<empty>}");
        }
        let mut parts = Vec::new();
        let mut ids = self.iter();
        let mut run_start = ids.next();
        let mut run_end = run_start;
        for id in ids {
            if Some(id) == run_end.map(|e| e + 1) {
                run_end = Some(id);
            } else {
                parts.push(format_run(run_start.unwrap(), run_end.unwrap()));
                run_start = Some(id);
                run_end = Some(id);
            }
        }
        if let (Some(s), Some(e)) = (run_start, run_end) {
            parts.push(format_run(s, e));
        }
        f.write_str(&parts.join(","))
    }
}

fn format_run(start: usize, end: usize) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

pub struct MaskIter<'a> {
    mask: &'a Mask,
    next: usize,
}

impl Iterator for MaskIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.next < self.mask.capacity {
            let i = self.next;
            self.next += 1;
            if self.mask.test(i) {
                return Some(i);
            }
        }
        None
    }
}

impl FromIterator<usize> for Mask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let ids: Vec<usize> = iter.into_iter().collect();
        let capacity = ids.iter().copied().max().map(|m| m + 1).unwrap_or(0);
        Mask::from_ids(capacity, ids)
    }
}

impl<'a> IntoIterator for &'a Mask {
    type Item = usize;
    type IntoIter = MaskIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_parse_round_trip() {
        let m = Mask::from_ids(16, [1, 2, 4, 5, 6, 7, 9]);
        let printed = m.to_string();
        assert_eq!(printed, "1,2,4-7,9");
        let parsed = Mask::parse(16, &printed).unwrap();
        assert!(m.equal(&parsed));
    }

    #[test]
    fn empty_mask_prints_placeholder() {
        let m = Mask::empty(8);
        assert_eq!(m.to_string(), "{<empty>}");
        assert!(Mask::parse(8, "{<empty>}").unwrap().is_empty());
    }

    #[test]
    fn union_intersect_complement() {
        let mut a = Mask::from_ids(8, [0, 1, 2]);
        let b = Mask::from_ids(8, [2, 3, 4]);
        let mut i = a.clone();
        i.intersect(&b);
        assert_eq!(i.count(), 1);
        assert!(i.test(2));

        a.union(&b);
        assert_eq!(a.count(), 5);

        let mut c = Mask::from_ids(8, [0]);
        c.complement();
        assert_eq!(c.count(), 7);
        assert!(!c.test(0));
    }

    #[test]
    fn out_of_range_index_panics() {
        let m = Mask::empty(4);
        let result = std::panic::catch_unwind(|| m.test(10));
        assert!(result.is_err());
    }

    #[test]
    fn group_of_detects_cross_group_spans() {
        let mut m = Mask::from_ids(8, [0, 1]);
        m.attach_groups(vec![0, 0, 1, 1, 1, 1, 1, 1]);
        assert_eq!(m.group_of(), Some(0));
        m.set(2);
        assert_eq!(m.group_of(), None);
    }
}
