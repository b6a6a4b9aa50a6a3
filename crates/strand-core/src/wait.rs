//! Wait points: the mutex/condvar pairs the library blocks on.
//!
//! Every blocking spot in the subsystem waits on a [`WaitPoint`] — a
//! `parking_lot` mutex guarding the wait's predicate state, paired with a
//! condvar. Wait points are held in `Arc` so a thread's control block can
//! keep a type-erased strong reference ([`WakeTarget`]) to the point it is
//! currently blocked on, and so exit-time notification can outlive the
//! registering frame.
//!
//! [`ResultSlot`] is the deferred result cell marked ready during the
//! exit drain: the value is stored early via `fulfill` but observers see
//! nothing until `mark_ready` publishes it.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// Wake target
// ---------------------------------------------------------------------------

/// Type-erased handle to a wait point: lock the paired mutex, wake everyone.
///
/// Acquiring the mutex before notifying is load-bearing: a waiter that has
/// registered itself but not yet parked still holds the mutex, so the wake
/// cannot land in the gap between "about to wait" and "waiting".
pub trait WakeTarget: Send + Sync {
    fn wake(&self);
}

// ---------------------------------------------------------------------------
// Wait point
// ---------------------------------------------------------------------------

/// A mutex/condvar pair guarding predicate state of type `T`.
pub struct WaitPoint<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> WaitPoint<T> {
    pub const fn new(value: T) -> Self {
        Self {
            mutex: Mutex::new(value),
            condvar: Condvar::new(),
        }
    }

    /// Lock the predicate state.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock()
    }

    /// Block on the condvar until notified (or a spurious wakeup).
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>) {
        self.condvar.wait(guard);
    }

    /// Block on the condvar with a timeout. Returns `true` if the wait
    /// timed out rather than being notified.
    pub fn wait_for(&self, guard: &mut MutexGuard<'_, T>, timeout: Duration) -> bool {
        self.condvar.wait_for(guard, timeout).timed_out()
    }

    /// Wake one waiter. Returns whether a waiter was woken.
    pub fn notify_one(&self) -> bool {
        self.condvar.notify_one()
    }

    /// Wake every waiter. Returns the number of threads woken.
    pub fn notify_all(&self) -> usize {
        self.condvar.notify_all()
    }
}

impl<T: Send> WakeTarget for WaitPoint<T> {
    fn wake(&self) {
        // Lock-then-notify: see the trait docs for why the lock matters.
        drop(self.mutex.lock());
        self.condvar.notify_all();
    }
}

impl<T: Default> Default for WaitPoint<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// ---------------------------------------------------------------------------
// Result slot
// ---------------------------------------------------------------------------

/// Marker trait for slots publishable during the exit drain.
pub trait ReadyAtExit: Send + Sync {
    /// Publish the slot. Idempotent; only the first call has an effect.
    fn mark_ready(&self);
}

struct SlotState<T> {
    value: Option<T>,
    ready: bool,
}

/// A deferred result cell.
///
/// The producing thread stores a value with [`fulfill`](Self::fulfill) at
/// any time; the value stays invisible until [`mark_ready`](Self::mark_ready)
/// publishes it — typically via [`register_ready_at_exit`], which defers
/// publication to the thread's exit drain.
///
/// [`register_ready_at_exit`]: crate::thread::control::ThreadControlBlock::register_ready_at_exit
pub struct ResultSlot<T> {
    state: WaitPoint<SlotState<T>>,
}

impl<T: Send> ResultSlot<T> {
    pub const fn new() -> Self {
        Self {
            state: WaitPoint::new(SlotState {
                value: None,
                ready: false,
            }),
        }
    }

    /// Store a value without publishing it. Returns any displaced value.
    pub fn fulfill(&self, value: T) -> Option<T> {
        self.state.lock().value.replace(value)
    }

    /// Whether the slot has been published.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Take the value if the slot is published; `None` otherwise (not yet
    /// ready, or the value was already taken).
    pub fn try_take(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.ready { state.value.take() } else { None }
    }

    /// Block until the slot is published, then take the value.
    pub fn take_blocking(&self) -> Option<T> {
        let mut state = self.state.lock();
        while !state.ready {
            self.state.wait(&mut state);
        }
        state.value.take()
    }

    /// Block until the slot is published or `timeout` elapses. Returns the
    /// value if the slot became ready in time and still held one.
    pub fn take_for(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.ready {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.state.wait_for(&mut state, deadline - now);
        }
        state.value.take()
    }
}

impl<T: Send> ReadyAtExit for ResultSlot<T> {
    fn mark_ready(&self) {
        let mut state = self.state.lock();
        if !state.ready {
            state.ready = true;
            drop(state);
            self.state.notify_all();
        }
    }
}

impl<T: Send> Default for ResultSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn wait_point_roundtrip() {
        let point = Arc::new(WaitPoint::new(0u32));
        let waiter = {
            let point = Arc::clone(&point);
            std::thread::spawn(move || {
                let mut guard = point.lock();
                while *guard == 0 {
                    point.wait(&mut guard);
                }
                *guard
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        *point.lock() = 7;
        point.notify_all();
        assert_eq!(waiter.join().unwrap(), 7);
    }

    #[test]
    fn wake_reaches_a_parked_waiter() {
        let point = Arc::new(WaitPoint::new(false));
        let waiter = {
            let point = Arc::clone(&point);
            std::thread::spawn(move || {
                let mut guard = point.lock();
                while !*guard {
                    point.wait(&mut guard);
                }
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        *point.lock() = true;
        let target: Arc<dyn WakeTarget> = Arc::clone(&point) as Arc<dyn WakeTarget>;
        target.wake();
        waiter.join().unwrap();
    }

    #[test]
    fn wait_for_times_out() {
        let point = WaitPoint::new(());
        let mut guard = point.lock();
        let start = Instant::now();
        assert!(point.wait_for(&mut guard, Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn slot_value_invisible_until_ready() {
        let slot = ResultSlot::new();
        assert_eq!(slot.fulfill(42), None);
        assert!(!slot.is_ready());
        assert_eq!(slot.try_take(), None);
        slot.mark_ready();
        assert!(slot.is_ready());
        assert_eq!(slot.try_take(), Some(42));
        assert_eq!(slot.try_take(), None);
    }

    #[test]
    fn slot_mark_ready_is_idempotent() {
        let slot: ResultSlot<u8> = ResultSlot::new();
        slot.mark_ready();
        slot.mark_ready();
        assert!(slot.is_ready());
    }

    #[test]
    fn slot_fulfill_replaces_unpublished_value() {
        let slot = ResultSlot::new();
        assert_eq!(slot.fulfill(1), None);
        assert_eq!(slot.fulfill(2), Some(1));
        slot.mark_ready();
        assert_eq!(slot.try_take(), Some(2));
    }

    #[test]
    fn slot_take_blocking_wakes_on_publish() {
        let slot = Arc::new(ResultSlot::new());
        let taker = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || slot.take_blocking())
        };
        std::thread::sleep(Duration::from_millis(20));
        slot.fulfill("done");
        slot.mark_ready();
        assert_eq!(taker.join().unwrap(), Some("done"));
    }

    #[test]
    fn slot_take_for_times_out_when_never_published() {
        let slot: ResultSlot<u8> = ResultSlot::new();
        let start = Instant::now();
        assert_eq!(slot.take_for(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
