//! The binding engine: assigns place indices to threads identified by a
//! monotonically increasing `gtid`, and invokes the OS binder.

use std::cell::RefCell;

use crate::config::{AffinityConfig, AffinityType};
use crate::error::{Error, Result};
use crate::mask::Mask;
use crate::os_binder::OsBinder;

/// `gtid` values below this are the hidden-helper threads (the regular
/// primary and the helper-team main) that pass through without binding.
const HIDDEN_HELPER_GTIDS: usize = 2;

/// Per-thread binding state: lives in that thread's TLS, never behind a
/// shared lock, since each thread reads and writes only its own slot.
#[derive(Debug, Clone)]
pub struct ThreadBindState {
    pub mask: Option<Mask>,
    pub place: Option<usize>,
    pub first_place: usize,
    pub last_place: usize,
}

impl Default for ThreadBindState {
    fn default() -> Self {
        ThreadBindState { mask: None, place: None, first_place: 0, last_place: 0 }
    }
}

thread_local! {
    static BIND_STATE: RefCell<ThreadBindState> = RefCell::new(ThreadBindState::default());
}

fn is_modular_range(first: usize, last: usize, place: usize) -> bool {
    if first <= last {
        (first..=last).contains(&place)
    } else {
        place >= first || place <= last
    }
}

/// Computes the place index for `gtid`. Hidden-helper gtids (`< 2`) pass
/// through unbound (`None`); `proc_bind_off` forces place `0` with the
/// process full mask regardless of `config`.
fn compute_place(gtid: usize, offset: i64, num_masks: usize, proc_bind_off: bool) -> Option<usize> {
    if gtid < HIDDEN_HELPER_GTIDS {
        return None;
    }
    if proc_bind_off || num_masks == 0 {
        return Some(0);
    }
    let adjusted = (gtid - HIDDEN_HELPER_GTIDS) as i64 + offset;
    let n = num_masks as i64;
    Some((((adjusted % n) + n) % n) as usize)
}

/// Binds `gtid` for the first time: allocates the per-thread mask, copies in
/// the selected place, and records the `[first_place, last_place]`
/// partition. Invokes the OS binder, suppressing errors when `config.ty` is
/// `none`.
pub fn bind_init_mask(binder: &dyn OsBinder, config: &AffinityConfig, gtid: usize, proc_bind_off: bool) -> Result<()> {
    let place = compute_place(gtid, config.offset, config.num_masks, proc_bind_off);
    let Some(place) = place else {
        return Ok(());
    };

    let mask = if proc_bind_off || config.num_masks == 0 {
        config.full_mask.clone()
    } else {
        config.masks[place].clone()
    };

    let first_place = 0;
    let last_place = config.num_masks.saturating_sub(1);

    BIND_STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.mask = Some(mask.clone());
        state.place = Some(place);
        state.first_place = first_place;
        state.last_place = last_place;
    });

    let result = binder.set_system_affinity(&mask, false);
    if config.ty == AffinityType::None {
        Ok(())
    } else {
        result
    }
}

/// Rebinds the calling thread to `new_place`. Requires `new_place` to lie
/// within the thread's recorded `[first_place, last_place]` partition,
/// modular if the range wraps.
pub fn bind_place(binder: &dyn OsBinder, config: &AffinityConfig, new_place: usize) -> Result<()> {
    let (first, last) = BIND_STATE.with(|state| {
        let state = state.borrow();
        (state.first_place, state.last_place)
    });
    if !is_modular_range(first, last, new_place) {
        return Err(Error::InvalidParameter(format!(
            "place {new_place} is outside this thread's partition [{first}, {last}]"
        )));
    }
    if new_place >= config.masks.len() {
        return Err(Error::InvalidParameter(format!("place {new_place} does not exist")));
    }
    let mask = config.masks[new_place].clone();
    BIND_STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.mask = Some(mask.clone());
        state.place = Some(new_place);
    });
    let result = binder.set_system_affinity(&mask, false);
    if config.ty == AffinityType::None {
        Ok(())
    } else {
        result
    }
}

/// Reads the calling thread's current place index, if bound.
pub fn current_place() -> Option<usize> {
    BIND_STATE.with(|state| state.borrow().place)
}

/// Reads the calling thread's current per-thread mask, if bound.
pub fn current_mask() -> Option<Mask> {
    BIND_STATE.with(|state| state.borrow().mask.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerKind;

    struct RecordingBinder {
        calls: RefCell<Vec<Mask>>,
    }

    impl OsBinder for RecordingBinder {
        fn bind_thread(&self, _os_id: usize) -> Result<()> {
            Ok(())
        }
        fn set_system_affinity(&self, mask: &Mask, _enforce: bool) -> Result<()> {
            self.calls.borrow_mut().push(mask.clone());
            Ok(())
        }
        fn get_system_affinity(&self, capacity: usize) -> Result<Mask> {
            Ok(Mask::full(capacity))
        }
    }

    fn config_with_masks(n: usize) -> AffinityConfig {
        let mut config = AffinityConfig::new(AffinityType::Compact, LayerKind::Core);
        config.masks = (0..n).map(|i| Mask::single(n, i)).collect();
        config.num_masks = n;
        config.full_mask = Mask::full(n);
        config
    }

    #[test]
    fn hidden_helper_gtids_pass_through_unbound() {
        assert_eq!(compute_place(0, 0, 4, false), None);
        assert_eq!(compute_place(1, 0, 4, false), None);
    }

    #[test]
    fn place_assignment_is_deterministic() {
        let config = config_with_masks(4);
        let binder = RecordingBinder { calls: RefCell::new(Vec::new()) };
        bind_init_mask(&binder, &config, 2, false).unwrap();
        assert_eq!(current_place(), Some(0));
        bind_init_mask(&binder, &config, 5, false).unwrap();
        assert_eq!(current_place(), Some(3));
    }

    #[test]
    fn proc_bind_off_always_places_zero_with_full_mask() {
        assert_eq!(compute_place(10, 7, 4, true), Some(0));
    }

    #[test]
    fn proc_bind_off_binds_the_full_mask_not_place_zero() {
        let config = config_with_masks(4);
        let binder = RecordingBinder { calls: RefCell::new(Vec::new()) };
        bind_init_mask(&binder, &config, 2, true).unwrap();
        let bound = current_mask().unwrap();
        assert!(bound.equal(&config.full_mask));
        assert_ne!(bound, config.masks[0]);
    }

    #[test]
    fn rebind_outside_partition_is_rejected() {
        let config = config_with_masks(4);
        let binder = RecordingBinder { calls: RefCell::new(Vec::new()) };
        bind_init_mask(&binder, &config, 2, false).unwrap();
        assert!(bind_place(&binder, &config, 1).is_ok());
        let bad_config = config_with_masks(2);
        assert!(bind_place(&binder, &bad_config, 9).is_err());
    }
}
