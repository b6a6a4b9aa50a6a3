//! Thread-local cleanup registry.
//!
//! Each control block carries a map from an opaque slot key to a
//! (cleanup-callback, value) pair. Entries are set and read by the owning
//! thread; at thread exit every remaining entry's cleanup runs with its
//! value, each live entry exactly once. Traversal order across distinct
//! keys is unspecified.
//!
//! Cleanup callbacks may themselves register new entries; teardown
//! re-drains the map up to [`TLS_TEARDOWN_PASSES`] times, then drops
//! whatever is left without running its cleanup. Exit callbacks
//! registered via [`register_callback_at_exit`] share the same drain:
//! each pass runs pending callbacks most-recent-first, then the TLS
//! cleanups.
//!
//! [`register_callback_at_exit`]: ThreadControlBlock::register_callback_at_exit

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::thread::control::ThreadControlBlock;
use crate::thread::current;

/// Maximum teardown passes over the map when cleanups keep registering
/// new entries (the POSIX destructor-iterations bound).
pub const TLS_TEARDOWN_PASSES: usize = 4;

/// A value stored in a thread's registry.
pub type TlsValue = Arc<dyn Any + Send + Sync>;

/// Cleanup callback invoked with the entry's value at thread exit.
pub type TlsCleanup = Box<dyn FnOnce(TlsValue) + Send>;

/// Opaque, process-unique identity of a TLS slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlsKey(u64);

impl TlsKey {
    /// Mint a fresh key. Keys are never reused within a process.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct TlsEntry {
    pub(crate) cleanup: Option<TlsCleanup>,
    pub(crate) value: TlsValue,
}

impl ThreadControlBlock {
    /// Insert or replace the entry for `key`.
    ///
    /// Replacing an existing entry does **not** invoke the previous
    /// entry's cleanup; the old value is simply dropped.
    pub fn tls_set(&self, key: TlsKey, value: TlsValue, cleanup: Option<TlsCleanup>) {
        self.exit.lock().tls.insert(key, TlsEntry { cleanup, value });
    }

    /// The current value for `key`, or `None` if absent.
    #[must_use]
    pub fn tls_get(&self, key: TlsKey) -> Option<TlsValue> {
        self.exit.lock().tls.get(&key).map(|entry| Arc::clone(&entry.value))
    }

    /// Drain exit callbacks and the registry, running each live entry's
    /// cleanup exactly once. Callbacks registered mid-drain are picked up
    /// by the next pass, up to the pass bound.
    pub(crate) fn run_exit_cleanup(&self) {
        for _ in 0..TLS_TEARDOWN_PASSES {
            let (callbacks, entries) = {
                let mut exit = self.exit.lock();
                if exit.callbacks.is_empty() && exit.tls.is_empty() {
                    return;
                }
                let entries: Vec<TlsEntry> = exit.tls.drain().map(|(_, entry)| entry).collect();
                (std::mem::take(&mut exit.callbacks), entries)
            };
            // Both run outside the registry lock so they can register new
            // entries or callbacks.
            for callback in callbacks.into_iter().rev() {
                callback();
            }
            for entry in entries {
                if let Some(cleanup) = entry.cleanup {
                    cleanup(entry.value);
                }
            }
        }
        let mut exit = self.exit.lock();
        exit.callbacks.clear();
        exit.tls.clear();
    }
}

/// Set `key` on the calling thread's registry. Returns `false` on a
/// thread the library does not manage.
pub fn set(key: TlsKey, value: TlsValue, cleanup: Option<TlsCleanup>) -> bool {
    match current::current() {
        Some(tcb) => {
            tcb.tls_set(key, value, cleanup);
            true
        }
        None => false,
    }
}

/// The calling thread's value for `key`, or `None` if absent or the
/// thread is not library-managed.
#[must_use]
pub fn get(key: TlsKey) -> Option<TlsValue> {
    current::current().and_then(|tcb| tcb.tls_get(key))
}

// ---------------------------------------------------------------------------
// Typed slot facade
// ---------------------------------------------------------------------------

/// A typed view over one registry slot.
///
/// A `ThreadSlot` owns a fresh [`TlsKey`]; each library-managed thread that
/// sets the slot gets its own value, cleaned up at that thread's exit if a
/// cleanup was supplied at construction.
pub struct ThreadSlot<T: Send + Sync + 'static> {
    key: TlsKey,
    cleanup: Option<Arc<dyn Fn(Arc<T>) + Send + Sync>>,
}

impl<T: Send + Sync + 'static> ThreadSlot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            key: TlsKey::next(),
            cleanup: None,
        }
    }

    /// A slot whose per-thread values are passed to `cleanup` at exit.
    #[must_use]
    pub fn with_cleanup(cleanup: impl Fn(Arc<T>) + Send + Sync + 'static) -> Self {
        Self {
            key: TlsKey::next(),
            cleanup: Some(Arc::new(cleanup)),
        }
    }

    #[must_use]
    pub fn key(&self) -> TlsKey {
        self.key
    }

    /// Set the calling thread's value. Returns `false` on a thread the
    /// library does not manage.
    pub fn set(&self, value: T) -> bool {
        let cleanup = self.cleanup.clone().map(|run| -> TlsCleanup {
            Box::new(move |value: TlsValue| {
                if let Ok(typed) = value.downcast::<T>() {
                    run(typed);
                }
            })
        });
        set(self.key, Arc::new(value), cleanup)
    }

    /// The calling thread's value, if set.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        get(self.key).and_then(|value| value.downcast::<T>().ok())
    }
}

impl<T: Send + Sync + 'static> Default for ThreadSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
