//! Public aux entry points: small mask-mutation primitives that sit
//! alongside the binding engine rather than inside it.

use crate::binding::current_mask;
use crate::error::Result;
use crate::mask::Mask;
use crate::os_binder::OsBinder;

/// Copies `mask` into the calling thread's per-thread slot and installs it
/// as the OS affinity, resetting the place range. Fails if `mask` shares no
/// bit with `full_mask`; cross-processor-group rejection on Windows is left
/// to the `OsBinder` implementation, which has the group table.
pub fn set_affinity(binder: &dyn OsBinder, full_mask: &Mask, mask: &Mask) -> Result<()> {
    let mut intersected = mask.clone();
    intersected.intersect(full_mask);
    if intersected.is_empty() {
        return Err(crate::error::Error::InvalidParameter("mask does not intersect the process full mask".into()));
    }
    binder.set_system_affinity(mask, false)
}

/// Reads the calling thread's current OS affinity into a freshly allocated
/// mask (POSIX), falling back to the cached per-thread mask when the OS
/// binder cannot be queried directly (Windows/AIX collaborators may choose
/// to implement `get_system_affinity` that way).
pub fn get_affinity(binder: &dyn OsBinder, capacity: usize) -> Result<Mask> {
    match binder.get_system_affinity(capacity) {
        Ok(mask) => Ok(mask),
        Err(e) => current_mask().ok_or(e),
    }
}

/// Sets bit `proc` in the caller-supplied `mask`. Returns `-1` if `proc` is
/// out of range for `mask`'s capacity, `-2` if `proc` is not in
/// `full_mask`.
pub fn set_affinity_mask_proc(full_mask: &Mask, mask: &mut Mask, proc: usize) -> i32 {
    if proc >= mask.capacity() {
        return -1;
    }
    if !full_mask.test(proc) {
        return -2;
    }
    mask.set(proc);
    0
}

/// Clears bit `proc`; same error codes as [`set_affinity_mask_proc`].
pub fn unset_affinity_mask_proc(full_mask: &Mask, mask: &mut Mask, proc: usize) -> i32 {
    if proc >= mask.capacity() {
        return -1;
    }
    if !full_mask.test(proc) {
        return -2;
    }
    mask.clear(proc);
    0
}

/// Reads bit `proc` as `0`/`1`; same error codes as [`set_affinity_mask_proc`].
pub fn get_affinity_mask_proc(full_mask: &Mask, mask: &Mask, proc: usize) -> i32 {
    if proc >= mask.capacity() {
        return -1;
    }
    if !full_mask.test(proc) {
        return -2;
    }
    mask.test(proc) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopBinder;
    impl OsBinder for NoopBinder {
        fn bind_thread(&self, _os_id: usize) -> Result<()> {
            Ok(())
        }
        fn set_system_affinity(&self, _mask: &Mask, _enforce: bool) -> Result<()> {
            Ok(())
        }
        fn get_system_affinity(&self, capacity: usize) -> Result<Mask> {
            Ok(Mask::full(capacity))
        }
    }

    #[test]
    fn set_affinity_rejects_disjoint_mask() {
        let binder = NoopBinder;
        let full = Mask::from_ids(8, [0, 1, 2, 3]);
        let disjoint = Mask::from_ids(8, [4, 5]);
        assert!(set_affinity(&binder, &full, &disjoint).is_err());
    }

    #[test]
    fn set_affinity_mask_proc_rejects_out_of_range() {
        let full = Mask::full(4);
        let mut mask = Mask::empty(4);
        assert_eq!(set_affinity_mask_proc(&full, &mut mask, 10), -1);
    }

    #[test]
    fn set_affinity_mask_proc_rejects_proc_outside_full_mask() {
        let full = Mask::from_ids(4, [0, 1]);
        let mut mask = Mask::empty(4);
        assert_eq!(set_affinity_mask_proc(&full, &mut mask, 2), -2);
    }

    #[test]
    fn set_then_get_affinity_mask_proc_round_trips() {
        let full = Mask::full(4);
        let mut mask = Mask::empty(4);
        assert_eq!(set_affinity_mask_proc(&full, &mut mask, 1), 0);
        assert_eq!(get_affinity_mask_proc(&full, &mask, 1), 1);
        assert_eq!(unset_affinity_mask_proc(&full, &mut mask, 1), 0);
        assert_eq!(get_affinity_mask_proc(&full, &mask, 1), 0);
    }
}
