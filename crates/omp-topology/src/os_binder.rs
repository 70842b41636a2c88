//! The `OsBinder` collaborator: the three OS-affinity primitives the rest of
//! this crate consumes from the surrounding runtime.

use crate::error::Result;
use crate::mask::Mask;

/// Operations the discovery and binding engine need from the host OS.
/// Grounded on the teacher's `platform::linux::affinity` module; a
/// [`LinuxOsBinder`] implements it natively on Linux, other platforms get a
/// stub that reports [`crate::error::Error::Unsupported`].
pub trait OsBinder: Send + Sync {
    /// Pin the *calling* thread to a single OS processor. Used by discovery
    /// back-ends that must migrate onto each logical processor in turn to
    /// read per-processor state (APIC id, CPUID).
    fn bind_thread(&self, os_id: usize) -> Result<()>;

    /// Install `mask` as the calling thread's affinity. When `enforce` is
    /// set, also set the process-wide affinity (meaningful on Windows;
    /// a no-op elsewhere).
    fn set_system_affinity(&self, mask: &Mask, enforce: bool) -> Result<()>;

    /// Read the calling thread's current OS affinity into a freshly
    /// allocated mask of the given capacity.
    fn get_system_affinity(&self, capacity: usize) -> Result<Mask>;
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use crate::error::Error;

    /// `OsBinder` implementation grounded on the teacher's
    /// `platform::linux::affinity::set_thread_affinity`, which drives
    /// `libc::sched_setaffinity`/`sched_getaffinity` directly.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LinuxOsBinder;

    fn mask_to_cpu_set(mask: &Mask) -> libc::cpu_set_t {
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        unsafe { libc::CPU_ZERO(&mut set) };
        for id in mask.iter() {
            if id < libc::CPU_SETSIZE as usize {
                unsafe { libc::CPU_SET(id, &mut set) };
            }
        }
        set
    }

    impl OsBinder for LinuxOsBinder {
        fn bind_thread(&self, os_id: usize) -> Result<()> {
            let mask = Mask::single(os_id + 1, os_id);
            self.set_system_affinity(&mask, false)
        }

        fn set_system_affinity(&self, mask: &Mask, _enforce: bool) -> Result<()> {
            let set = mask_to_cpu_set(mask);
            let ret = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                return match err.raw_os_error() {
                    Some(libc::EPERM) => Err(Error::PermissionDenied(err.to_string())),
                    _ => Err(Error::Affinity(err.to_string())),
                };
            }
            Ok(())
        }

        fn get_system_affinity(&self, capacity: usize) -> Result<Mask> {
            let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
            let ret = unsafe { libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) };
            if ret != 0 {
                return Err(Error::Affinity(std::io::Error::last_os_error().to_string()));
            }
            let mut mask = Mask::empty(capacity);
            for id in 0..capacity.min(libc::CPU_SETSIZE as usize) {
                if unsafe { libc::CPU_ISSET(id, &set) } {
                    mask.set(id);
                }
            }
            Ok(mask)
        }
    }

    /// Binds the calling thread to `os_id` for the duration of the guard,
    /// restoring the thread's original affinity on every exit path.
    pub struct ThreadBindGuard<'a> {
        binder: &'a dyn OsBinder,
        original: Mask,
    }

    impl<'a> ThreadBindGuard<'a> {
        pub fn new(binder: &'a dyn OsBinder, os_id: usize, capacity: usize) -> Result<Self> {
            let original = binder.get_system_affinity(capacity)?;
            binder.bind_thread(os_id)?;
            Ok(ThreadBindGuard { binder, original })
        }
    }

    impl Drop for ThreadBindGuard<'_> {
        fn drop(&mut self) {
            let _ = self.binder.set_system_affinity(&self.original, false);
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::{LinuxOsBinder, ThreadBindGuard};

#[cfg(not(target_os = "linux"))]
mod fallback {
    use super::*;
    use crate::error::Error;

    /// Stub `OsBinder` for platforms this crate does not natively drive
    /// beyond this abstract interface. A surrounding runtime may supply its
    /// own.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UnsupportedOsBinder;

    impl OsBinder for UnsupportedOsBinder {
        fn bind_thread(&self, _os_id: usize) -> Result<()> {
            Err(Error::Unsupported("thread binding is not implemented on this platform".into()))
        }

        fn set_system_affinity(&self, _mask: &Mask, _enforce: bool) -> Result<()> {
            Err(Error::Unsupported("setting system affinity is not implemented on this platform".into()))
        }

        fn get_system_affinity(&self, _capacity: usize) -> Result<Mask> {
            Err(Error::Unsupported("reading system affinity is not implemented on this platform".into()))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use fallback::UnsupportedOsBinder;

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn get_then_set_current_affinity_round_trips() {
        let binder = LinuxOsBinder;
        let cap = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let before = binder.get_system_affinity(cap).unwrap();
        binder.set_system_affinity(&before, false).unwrap();
        let after = binder.get_system_affinity(cap).unwrap();
        assert!(before.equal(&after));
    }
}
