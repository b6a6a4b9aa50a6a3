//! Native thread-creation attributes.
//!
//! Thin RAII wrapper over `pthread_attr_t`. The only tunable is the stack
//! size; requests are clamped to the platform minimum and rounded up to a
//! whole number of pages before being applied to the native buffer.
//!
//! Attribute init/destroy failure means OS resource exhaustion or API
//! misuse the library cannot continue past, so those paths assert on the
//! native return code instead of returning an error.

use std::mem::MaybeUninit;

/// Clamp a requested stack size to the platform minimum and round it up to
/// a whole number of pages.
///
/// Pure so the arithmetic is testable independent of the host's page size.
/// Callers handle the `requested == 0` (platform default) case themselves.
#[must_use]
pub fn normalize_stack_size(requested: usize, page_size: usize, platform_min: usize) -> usize {
    let clamped = requested.max(platform_min);
    clamped.div_ceil(page_size) * page_size
}

fn page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    assert!(size > 0, "sysconf(_SC_PAGESIZE) failed");
    size as usize
}

fn platform_min_stack() -> usize {
    // Newer glibc makes PTHREAD_STACK_MIN dynamic; prefer the sysconf value
    // and fall back to the compile-time constant.
    // SAFETY: sysconf with a valid name has no preconditions.
    let min = unsafe { libc::sysconf(libc::_SC_THREAD_STACK_MIN) };
    if min > 0 {
        min as usize
    } else {
        libc::PTHREAD_STACK_MIN
    }
}

/// Builder for native thread-creation parameters.
///
/// Owns a `pthread_attr_t` for its whole lifetime; consumed (by reference)
/// only at [`launch`](crate::thread::control::launch) time.
pub struct ThreadAttributes {
    raw: libc::pthread_attr_t,
}

impl ThreadAttributes {
    #[must_use]
    pub fn new() -> Self {
        let mut raw = MaybeUninit::<libc::pthread_attr_t>::uninit();
        // SAFETY: raw points to writable storage for a pthread_attr_t.
        let rc = unsafe { libc::pthread_attr_init(raw.as_mut_ptr()) };
        assert_eq!(rc, 0, "pthread_attr_init failed");
        Self {
            // SAFETY: pthread_attr_init returned 0, so raw is initialized.
            raw: unsafe { raw.assume_init() },
        }
    }

    /// Request a stack size in bytes. `0` is a no-op (platform default);
    /// anything else is normalized per [`normalize_stack_size`] before
    /// being applied.
    pub fn set_stack_size(&mut self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let size = normalize_stack_size(bytes, page_size(), platform_min_stack());
        // SAFETY: self.raw is an initialized pthread_attr_t and size meets
        // the platform minimum.
        let rc = unsafe { libc::pthread_attr_setstacksize(&mut self.raw, size) };
        assert_eq!(rc, 0, "pthread_attr_setstacksize failed");
    }

    /// The currently effective stack size in bytes.
    #[must_use]
    pub fn stack_size(&self) -> usize {
        let mut size = 0usize;
        // SAFETY: self.raw is an initialized pthread_attr_t; size is a
        // valid out-pointer.
        let rc = unsafe { libc::pthread_attr_getstacksize(&self.raw, &mut size) };
        assert_eq!(rc, 0, "pthread_attr_getstacksize failed");
        size
    }

    pub(crate) fn native(&self) -> *const libc::pthread_attr_t {
        &self.raw
    }
}

impl Default for ThreadAttributes {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadAttributes {
    fn drop(&mut self) {
        // SAFETY: self.raw was initialized in new() and not destroyed since.
        let rc = unsafe { libc::pthread_attr_destroy(&mut self.raw) };
        assert_eq!(rc, 0, "pthread_attr_destroy failed");
    }
}
