//! The interruption checker: a scoped guard around every blocking wait.
//!
//! Constructed immediately before blocking on a [`WaitPoint`], the guard
//! makes "check interruption, then block" atomic with respect to
//! concurrent [`request_interruption`] calls:
//!
//! - a request already pending at construction aborts the scope before the
//!   wait ever starts;
//! - a request arriving after construction finds the wait point registered
//!   in the control block and wakes it, and because the requester acquires
//!   the wait mutex before notifying, the wake cannot slip into the gap
//!   between registration and parking.
//!
//! Lock ordering: the control block's data lock is always taken before the
//! wait point's mutex, and never while the wait mutex is held (the guard
//! releases the wait mutex before clearing its registration on drop).
//!
//! [`request_interruption`]: crate::thread::control::ThreadControlBlock::request_interruption

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::MutexGuard;

use crate::errors::ThreadError;
use crate::thread::control::ThreadControlBlock;
use crate::thread::current;
use crate::wait::{WaitPoint, WakeTarget};

/// Scoped interruptible wait on a [`WaitPoint`].
///
/// Holds the wait point's mutex for its whole lifetime; dereferences to
/// the guarded predicate state. Waits return on notification, timeout, or
/// spuriously — callers re-check their predicate and observe pending
/// interruption via [`current::interruption_point`] after the scope ends.
pub struct InterruptibleWait<'a, T: Send + 'static> {
    point: &'a WaitPoint<T>,
    /// `Some` only when interruption bookkeeping is armed for this scope.
    tcb: Option<Arc<ThreadControlBlock>>,
    guard: Option<MutexGuard<'a, T>>,
}

impl<'a, T: Send + 'static> InterruptibleWait<'a, T> {
    /// Open an interruptible wait scope on `point`.
    ///
    /// On a foreign thread, or while interruption is disabled, this just
    /// acquires the mutex. Otherwise a pending request aborts with
    /// `Err(Interrupted)` before the wait begins; if none is pending the
    /// point is registered as the thread's current wait.
    pub fn begin(point: &'a Arc<WaitPoint<T>>) -> Result<Self, ThreadError> {
        if let Some(tcb) = current::current() {
            let mut data = tcb.data.lock();
            if data.enabled {
                if data.requested {
                    data.requested = false;
                    return Err(ThreadError::Interrupted);
                }
                data.current_wait = Some(Arc::clone(point) as Arc<dyn WakeTarget>);
                // Wait mutex acquired while the data lock is held; the
                // requester nests the same way.
                let guard = point.lock();
                drop(data);
                return Ok(Self {
                    point,
                    tcb: Some(tcb),
                    guard: Some(guard),
                });
            }
        }
        Ok(Self {
            point,
            tcb: None,
            guard: Some(point.lock()),
        })
    }

    fn guard_mut(&mut self) -> &mut MutexGuard<'a, T> {
        self.guard
            .as_mut()
            .expect("wait mutex held for the life of the scope")
    }

    /// Block until notified (or a spurious wakeup).
    pub fn wait(&mut self) {
        let point = self.point;
        point.wait(self.guard_mut());
    }

    /// Block with a timeout. Returns `true` if the wait timed out.
    pub fn wait_for(&mut self, timeout: Duration) -> bool {
        let point = self.point;
        point.wait_for(self.guard_mut(), timeout)
    }

    /// Block until `condition` returns `false`.
    pub fn wait_while(&mut self, mut condition: impl FnMut(&mut T) -> bool) {
        while condition(&mut **self.guard_mut()) {
            self.wait();
        }
    }
}

impl<T: Send + 'static> Deref for InterruptibleWait<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard
            .as_ref()
            .expect("wait mutex held for the life of the scope")
    }
}

impl<T: Send + 'static> DerefMut for InterruptibleWait<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut **self.guard_mut()
    }
}

impl<T: Send + 'static> Drop for InterruptibleWait<'_, T> {
    fn drop(&mut self) {
        // Release the wait mutex first; the data lock is never taken while
        // the wait mutex is held.
        self.guard = None;
        if let Some(tcb) = self.tcb.take() {
            tcb.data.lock().current_wait = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::ThreadAttributes;
    use crate::thread::control::launch;
    use crate::wait::{ReadyAtExit, ResultSlot};
    use std::time::Instant;

    #[test]
    fn foreign_thread_scope_is_a_plain_lock() {
        let point = Arc::new(WaitPoint::new(0u32));
        let mut scope = InterruptibleWait::begin(&point).expect("foreign scope");
        assert_eq!(*scope, 0);
        *scope = 5;
        assert!(scope.wait_for(Duration::from_millis(10)), "nothing wakes it");
        drop(scope);
        assert_eq!(*point.lock(), 5);
    }

    #[test]
    fn pending_request_aborts_scope_before_waiting() {
        let point = Arc::new(WaitPoint::new(()));
        let outcome = Arc::new(ResultSlot::new());
        let tcb = ThreadControlBlock::new({
            let point = Arc::clone(&point);
            let outcome = Arc::clone(&outcome);
            move || {
                while !current::interruption_requested() {
                    std::thread::yield_now();
                }
                let start = Instant::now();
                let result = InterruptibleWait::begin(&point).map(|_| ());
                outcome.fulfill((result, start.elapsed()));
            }
        });
        tcb.register_ready_at_exit(Arc::clone(&outcome) as Arc<dyn ReadyAtExit>);
        launch(&tcb, &ThreadAttributes::new()).expect("launch");
        tcb.request_interruption();
        tcb.join().expect("join");
        let (result, elapsed) = outcome.try_take().expect("outcome recorded");
        assert_eq!(result, Err(ThreadError::Interrupted));
        assert!(elapsed < Duration::from_millis(100), "no blocking before abort");
    }

    #[test]
    fn scope_registers_and_clears_current_wait() {
        let observed = Arc::new(ResultSlot::new());
        let tcb = ThreadControlBlock::new({
            let observed = Arc::clone(&observed);
            move || {
                let me = current::current().expect("managed thread");
                let point = Arc::new(WaitPoint::new(()));
                let before = me.data.lock().current_wait.is_some();
                let scope = InterruptibleWait::begin(&point).expect("scope");
                let during = me.data.lock().current_wait.is_some();
                drop(scope);
                let after = me.data.lock().current_wait.is_some();
                observed.fulfill((before, during, after));
            }
        });
        tcb.register_ready_at_exit(Arc::clone(&observed) as Arc<dyn ReadyAtExit>);
        launch(&tcb, &ThreadAttributes::new()).expect("launch");
        tcb.join().expect("join");
        assert_eq!(observed.try_take(), Some((false, true, false)));
    }

    #[test]
    fn disabled_interruption_skips_bookkeeping() {
        let observed = Arc::new(ResultSlot::new());
        let tcb = ThreadControlBlock::new({
            let observed = Arc::clone(&observed);
            move || {
                let me = current::current().expect("managed thread");
                let masked = current::DisableInterruption::new();
                let point = Arc::new(WaitPoint::new(()));
                let scope = InterruptibleWait::begin(&point).expect("masked scope");
                let registered = me.data.lock().current_wait.is_some();
                drop(scope);
                drop(masked);
                observed.fulfill(registered);
            }
        });
        tcb.register_ready_at_exit(Arc::clone(&observed) as Arc<dyn ReadyAtExit>);
        launch(&tcb, &ThreadAttributes::new()).expect("launch");
        tcb.join().expect("join");
        assert_eq!(observed.try_take(), Some(false));
    }

    #[test]
    fn request_wakes_a_blocked_scope() {
        let point = Arc::new(WaitPoint::new(()));
        let outcome = Arc::new(ResultSlot::new());
        let tcb = ThreadControlBlock::new({
            let point = Arc::clone(&point);
            let outcome = Arc::clone(&outcome);
            move || {
                let start = Instant::now();
                let result = (|| -> Result<(), ThreadError> {
                    let mut scope = InterruptibleWait::begin(&point)?;
                    scope.wait_for(Duration::from_secs(30));
                    drop(scope);
                    current::interruption_point()
                })();
                outcome.fulfill((result, start.elapsed()));
            }
        });
        tcb.register_ready_at_exit(Arc::clone(&outcome) as Arc<dyn ReadyAtExit>);
        launch(&tcb, &ThreadAttributes::new()).expect("launch");
        std::thread::sleep(Duration::from_millis(50));
        tcb.request_interruption();
        tcb.join().expect("join");
        let (result, elapsed) = outcome.try_take().expect("outcome recorded");
        assert_eq!(result, Err(ThreadError::Interrupted));
        assert!(elapsed < Duration::from_secs(30), "woken well before timeout");
    }
}
