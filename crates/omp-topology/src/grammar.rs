//! Place-list grammars (`proclist` and `OMP_PLACES`). Both parse straight
//! to a `Vec<Mask>`, one mask per place, in source order.

use crate::error::{Error, Result};
use crate::granularity::granularity_groups;
use crate::mask::Mask;
use crate::topology::subset::layer_from_str;
use crate::topology::Topology;

/// `(end - start) / stride` beyond which a strided range is rejected as
/// almost certainly a typo rather than a deliberate place list.
const MAX_STRIDE_SPAN: i64 = 65536;

/// Splits `s` on commas that are not nested inside `{}` (both grammars
/// allow braced subexpressions containing their own comma-separated lists).
fn split_top_level(s: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                items.push(s[start..i].to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(s[start..].to_string());
    items
}

/// `signed := int | '+' signed | '-' signed`: any run of leading `+`/`-`
/// characters, each flipping (`-`) or preserving (`+`) the sign.
fn parse_signed(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    let mut negate = false;
    let mut rest = trimmed;
    loop {
        if let Some(stripped) = rest.strip_prefix('-') {
            negate = !negate;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('+') {
            rest = stripped;
        } else {
            break;
        }
    }
    let v: i64 = rest
        .trim()
        .parse()
        .map_err(|_| Error::InvalidParameter(format!("not an integer: '{trimmed}'")))?;
    Ok(if negate { -v } else { v })
}

fn parse_intset(s: &str, capacity: usize) -> Result<Vec<usize>> {
    let mut out = Vec::new();
    for piece in s.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let id: usize = piece
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("not an integer: '{piece}'")))?;
        if id >= capacity {
            log::warn!("proc id {id} is out of range for this process; skipping");
            continue;
        }
        out.push(id);
    }
    Ok(out)
}

/// Parses a `proclist`: a comma-separated list of `{intset}` unions,
/// `int-int[:signed]` ranges, and bare `int`s, each yielding one place
/// except `{intset}` which collapses its whole set into a single place.
pub fn parse_proclist(s: &str, capacity: usize) -> Result<Vec<Mask>> {
    let mut places = Vec::new();
    for item in split_top_level(s) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if let Some(inner) = item.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            let ids = parse_intset(inner, capacity)?;
            if ids.is_empty() {
                continue;
            }
            places.push(Mask::from_ids(capacity, ids));
            continue;
        }
        if let Some(dash) = item.find('-') {
            // Leading '-' on the first number (a negative start) is not part
            // of this grammar; proc ids are never negative.
            let (lo, rest) = item.split_at(dash);
            let rest = &rest[1..];
            let lo: usize = lo
                .trim()
                .parse()
                .map_err(|_| Error::InvalidParameter(format!("not an integer: '{lo}'")))?;
            let (hi_str, stride) = match rest.split_once(':') {
                Some((hi, stride)) => (hi, parse_signed(stride)?),
                None => (rest, 1),
            };
            let hi: usize = hi_str
                .trim()
                .parse()
                .map_err(|_| Error::InvalidParameter(format!("not an integer: '{hi_str}'")))?;
            if stride == 0 {
                return Err(Error::InvalidParameter("range stride must not be zero".into()));
            }
            let span = (hi as i64 - lo as i64).abs() / stride.abs();
            if span > MAX_STRIDE_SPAN {
                return Err(Error::InvalidParameter(format!("range '{item}' spans too many elements")));
            }
            let mut id = lo as i64;
            loop {
                let in_range = if stride > 0 { id <= hi as i64 } else { id >= hi as i64 };
                if !in_range {
                    break;
                }
                if id >= 0 && (id as usize) < capacity {
                    places.push(Mask::single(capacity, id as usize));
                } else {
                    log::warn!("proc id {id} is out of range for this process; skipping");
                }
                id += stride;
            }
            continue;
        }
        let id: usize = item
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("not an integer: '{item}'")))?;
        if id >= capacity {
            log::warn!("proc id {id} is out of range for this process; skipping");
            continue;
        }
        places.push(Mask::single(capacity, id));
    }
    Ok(places)
}

/// Finds the first top-level `:` in `s` (depth-tracked on `{}` only -- the
/// generative suffix's own `()` around a named-place count does not nest a
/// `:`, so only braces need tracking) and splits the generative
/// `:count[:stride]` suffix off the base place expression.
fn split_generative_suffix(s: &str) -> Result<(&str, Option<(usize, i64)>)> {
    let mut depth = 0i32;
    let mut colon_at = None;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth -= 1,
            ':' if depth == 0 => {
                colon_at = Some(i);
                break;
            }
            _ => {}
        }
    }
    let Some(i) = colon_at else {
        return Ok((s, None));
    };
    let base = &s[..i];
    let suffix = &s[i + 1..];
    let (count_str, stride_str) = match suffix.split_once(':') {
        Some((c, st)) => (c, Some(st)),
        None => (suffix, None),
    };
    let count: usize = count_str
        .trim()
        .parse()
        .map_err(|_| Error::InvalidParameter(format!("not an integer: '{count_str}'")))?;
    let stride = match stride_str {
        Some(st) => parse_signed(st)?,
        None => 1,
    };
    Ok((base, Some((count, stride))))
}

/// Parses the comma-separated subplace list inside `{...}`: each
/// entry is `int[:count[:signed]]`, contributing `count` ids starting at
/// `int` and stepping by `signed` (default stride 1), all unioned together.
fn eval_subplaces(s: &str, capacity: usize) -> Result<Mask> {
    let mut mask = Mask::empty(capacity);
    for piece in s.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let mut parts = piece.splitn(3, ':');
        let base: i64 = parts
            .next()
            .unwrap()
            .trim()
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("not an integer: '{piece}'")))?;
        let count: i64 = match parts.next() {
            Some(c) => c
                .trim()
                .parse()
                .map_err(|_| Error::InvalidParameter(format!("not an integer: '{c}'")))?,
            None => 1,
        };
        let stride: i64 = match parts.next() {
            Some(st) => parse_signed(st)?,
            None => 1,
        };
        for k in 0..count {
            let id = base + k * stride;
            if id >= 0 && (id as usize) < capacity {
                mask.set(id as usize);
            } else {
                log::warn!("subplace id {id} is out of range for this process; skipping");
            }
        }
    }
    Ok(mask)
}

/// Evaluates a base place expression (no generative suffix): `!expr`
/// (complement each place of `expr` against the process full mask),
/// `{subplaces}` (one unioned place), a bare `int` (one single-id place),
/// or a named form `layer` / `layer(count)` (an abstract place name,
/// expanded via [`granularity_groups`] and truncated to `count` if given).
fn eval_base(s: &str, topo: &Topology, capacity: usize) -> Result<Vec<Mask>> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('!') {
        let base = eval_base(rest, topo, capacity)?;
        return Ok(base
            .into_iter()
            .map(|mut m| {
                m.complement();
                m.intersect(&topo.full_mask);
                m
            })
            .collect());
    }
    if let Some(inner) = s.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
        return Ok(vec![eval_subplaces(inner, capacity)?]);
    }
    if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() {
        let id: usize = s.parse().unwrap();
        if id >= capacity {
            log::warn!("proc id {id} is out of range for this process; skipping");
            return Ok(Vec::new());
        }
        return Ok(vec![Mask::single(capacity, id)]);
    }
    let (name, count) = match s.strip_suffix(')').and_then(|r| r.split_once('(')) {
        Some((name, count_str)) => {
            let count: usize = count_str
                .trim()
                .parse()
                .map_err(|_| Error::InvalidParameter(format!("not an integer: '{count_str}'")))?;
            (name.trim(), Some(count))
        }
        None => (s, None),
    };
    let kind = layer_from_str(name)?;
    let mut groups = granularity_groups(topo, kind)?;
    if let Some(count) = count {
        groups.truncate(count);
    }
    Ok(groups)
}

/// Evaluates one top-level `OMP_PLACES` item: a base expression,
/// optionally followed by a generative `:count[:stride]` suffix that steps
/// through the base expression's place list ("universe") starting at index
/// 0, dropping any out-of-range index silently except the last requested
/// one, which warns.
fn eval_place(s: &str, topo: &Topology, capacity: usize) -> Result<Vec<Mask>> {
    let (base_expr, suffix) = split_generative_suffix(s)?;
    let universe = eval_base(base_expr, topo, capacity)?;
    let Some((count, stride)) = suffix else {
        return Ok(universe);
    };
    if universe.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(count);
    let mut idx: i64 = 0;
    for k in 0..count {
        if idx >= 0 && (idx as usize) < universe.len() {
            out.push(universe[idx as usize].clone());
        } else {
            let msg = format!("generative place index {idx} is out of range");
            if k + 1 == count {
                log::warn!("{msg}");
            } else {
                log::debug!("{msg}");
            }
        }
        idx += stride;
    }
    Ok(out)
}

/// Parses an `OMP_PLACES` placelist: a comma-separated sequence of
/// place expressions, each possibly itself expanding to several places.
pub fn parse_omp_places(s: &str, topo: &Topology, capacity: usize) -> Result<Vec<Mask>> {
    let mut places = Vec::new();
    for item in split_top_level(s) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        places.extend(eval_place(item, topo, capacity)?);
    }
    Ok(places)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{CoreAttrs, LayerId, LayerKind};
    use crate::topology::{canonicalize, HwThread};

    fn uniform_2x4x2() -> Topology {
        let types = vec![LayerKind::Socket, LayerKind::Core, LayerKind::Thread];
        let mut threads = Vec::new();
        for socket in 0..2u32 {
            for core in 0..4u32 {
                for thread in 0..2u32 {
                    let os_id = (socket as usize * 8) + (core as usize * 2) + thread as usize;
                    threads.push(HwThread::new(
                        os_id,
                        os_id,
                        vec![LayerId::Known(socket), LayerId::Known(core), LayerId::Known(thread)],
                        CoreAttrs::default(),
                    ));
                }
            }
        }
        let mut topo = Topology::from_discovery(types, threads, Mask::full(16));
        canonicalize(&mut topo).unwrap();
        topo
    }

    #[test]
    fn parse_signed_handles_repeated_sign_runs() {
        assert_eq!(parse_signed("--2").unwrap(), 2);
        assert_eq!(parse_signed("-2").unwrap(), -2);
        assert_eq!(parse_signed("+-2").unwrap(), -2);
        assert_eq!(parse_signed("3").unwrap(), 3);
    }

    #[test]
    fn proclist_mixes_braced_unions_and_strided_singles() {
        // "{0,2,4},{1,3,5},6-11:2" -> two unions plus three single-id places
        // at stride 2 starting at 6 (6, 8, 10).
        let places = parse_proclist("{0,2,4},{1,3,5},6-11:2", 16).unwrap();
        assert_eq!(places.len(), 5);
        assert_eq!(places[0].count(), 3);
        assert!(places[0].test(0) && places[0].test(2) && places[0].test(4));
        assert_eq!(places[1].count(), 3);
        assert!(places[1].test(1) && places[1].test(3) && places[1].test(5));
        assert_eq!(places[2], Mask::single(16, 6));
        assert_eq!(places[3], Mask::single(16, 8));
        assert_eq!(places[4], Mask::single(16, 10));
    }

    #[test]
    fn proclist_out_of_range_ids_are_skipped() {
        let places = parse_proclist("2,100", 4).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0], Mask::single(4, 2));
    }

    #[test]
    fn omp_places_named_form_with_count() {
        let topo = uniform_2x4x2();
        let places = parse_omp_places("cores(3)", &topo, 16).unwrap();
        assert_eq!(places.len(), 3);
        assert_eq!(places[0].count(), 2);
    }

    #[test]
    fn omp_places_generative_suffix_steps_through_universe() {
        // "threads(8):4:2" -> 4 places stepping through the first 8 threads
        // at stride 2 (universe indices 0, 2, 4, 6), each a single thread.
        let topo = uniform_2x4x2();
        let places = parse_omp_places("threads(8):4:2", &topo, 16).unwrap();
        assert_eq!(places.len(), 4);
        for p in &places {
            assert_eq!(p.count(), 1);
        }
        let universe = granularity_groups(&topo, LayerKind::Thread).unwrap();
        assert_eq!(places[0], universe[0]);
        assert_eq!(places[1], universe[2]);
        assert_eq!(places[2], universe[4]);
        assert_eq!(places[3], universe[6]);
    }

    #[test]
    fn omp_places_braced_subplaces_with_stride() {
        let topo = uniform_2x4x2();
        let places = parse_omp_places("{0:2:4}", &topo, 16).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].count(), 2);
        assert!(places[0].test(0) && places[0].test(4));
    }

    #[test]
    fn omp_places_complement() {
        let topo = uniform_2x4x2();
        let places = parse_omp_places("!{0}", &topo, 16).unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].count(), 15);
        assert!(!places[0].test(0));
    }
}
