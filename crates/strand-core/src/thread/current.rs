//! Current-thread handle and checkpoint utilities.
//!
//! Every library-managed thread carries a thread-local reference to its
//! own control block, installed before the entry callable runs and
//! cleared after the exit drain. Threads the library did not launch have
//! no control block; interruption bookkeeping is skipped for them.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::ThreadError;
use crate::thread::control::ThreadControlBlock;
use crate::thread::interrupt::InterruptibleWait;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadControlBlock>>> = const { RefCell::new(None) };
}

pub(crate) fn set_current(tcb: Option<Arc<ThreadControlBlock>>) {
    CURRENT.with(|slot| *slot.borrow_mut() = tcb);
}

/// The calling thread's control block, if the library launched it.
#[must_use]
pub fn current() -> Option<Arc<ThreadControlBlock>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Explicit interruption checkpoint: consume a pending request.
///
/// Returns `Err(Interrupted)` if a request was pending and interruption
/// is enabled; otherwise `Ok(())`. Foreign threads always pass.
pub fn interruption_point() -> Result<(), ThreadError> {
    if let Some(tcb) = current() {
        let mut data = tcb.data.lock();
        if data.enabled && data.requested {
            data.requested = false;
            return Err(ThreadError::Interrupted);
        }
    }
    Ok(())
}

/// Whether an interruption request is pending for the calling thread.
#[must_use]
pub fn interruption_requested() -> bool {
    current().is_some_and(|tcb| {
        let data = tcb.data.lock();
        data.enabled && data.requested
    })
}

/// Whether the calling thread currently observes interruption requests.
/// Foreign threads report `true` (nothing masks them; nothing interrupts
/// them either).
#[must_use]
pub fn interruption_enabled() -> bool {
    current().is_none_or(|tcb| tcb.data.lock().enabled)
}

/// Scoped mask for interruption delivery.
///
/// While alive, pending requests stay pending but are not observable at
/// checkpoints; dropping the guard restores the previous setting, so a
/// request received under the mask is delivered at the next checkpoint
/// after unmasking.
pub struct DisableInterruption {
    tcb: Option<Arc<ThreadControlBlock>>,
    previous: bool,
}

impl DisableInterruption {
    #[must_use]
    pub fn new() -> Self {
        let tcb = current();
        let previous = match &tcb {
            Some(tcb) => {
                let mut data = tcb.data.lock();
                let previous = data.enabled;
                data.enabled = false;
                previous
            }
            None => true,
        };
        Self { tcb, previous }
    }
}

impl Default for DisableInterruption {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisableInterruption {
    fn drop(&mut self) {
        if let Some(tcb) = &self.tcb {
            tcb.data.lock().enabled = self.previous;
        }
    }
}

/// Register a wake target on the calling thread's notify-at-exit list.
/// Returns `false` on a foreign thread.
pub fn notify_at_exit(target: Arc<dyn crate::wait::WakeTarget>) -> bool {
    match current() {
        Some(tcb) => {
            tcb.register_notify_at_exit(target);
            true
        }
        None => false,
    }
}

/// Register a result slot on the calling thread's ready-at-exit list.
/// Returns `false` on a foreign thread.
pub fn ready_at_exit(slot: Arc<dyn crate::wait::ReadyAtExit>) -> bool {
    match current() {
        Some(tcb) => {
            tcb.register_ready_at_exit(slot);
            true
        }
        None => false,
    }
}

/// Register a callback run when the calling thread exits, before its
/// completion becomes observable. Returns `false` on a foreign thread.
pub fn at_exit(callback: impl FnOnce() + Send + 'static) -> bool {
    match current() {
        Some(tcb) => {
            tcb.register_callback_at_exit(Box::new(callback));
            true
        }
        None => false,
    }
}

/// Interruptible sleep until `deadline`.
///
/// Waits on the control block's dedicated sleep point, one interruptible
/// scope per wakeup, with a checkpoint between scopes; an interruption
/// request before or during the window surfaces as `Err(Interrupted)`.
/// Foreign threads get a plain uninterruptible sleep.
pub fn sleep_until(deadline: Instant) -> Result<(), ThreadError> {
    let Some(tcb) = current() else {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        return Ok(());
    };
    let point = Arc::clone(&tcb.sleep_point);
    loop {
        interruption_point()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        let mut scope = InterruptibleWait::begin(&point)?;
        scope.wait_for(deadline - now);
    }
}

/// Interruptible sleep for `duration`. See [`sleep_until`].
pub fn sleep_for(duration: Duration) -> Result<(), ThreadError> {
    sleep_until(Instant::now() + duration)
}

/// Yield the processor to another ready thread.
pub fn yield_now() {
    std::thread::yield_now();
}
