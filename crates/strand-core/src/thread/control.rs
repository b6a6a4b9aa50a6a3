//! The per-thread control block and its lifecycle.
//!
//! A [`ThreadControlBlock`] is created before launch and shared between the
//! launching code and the running thread. While the native thread runs, the
//! block holds a strong reference to itself (the keep-alive), so the
//! launcher is free to drop its handle early; the block is reclaimed only
//! after the exit drain completes and the last holder lets go.
//!
//! ## Exit drain
//!
//! When the entry callable returns — normally or via an unwind captured at
//! the boundary — the running thread performs, exactly once and in this
//! order:
//!
//! 1. wake every notify-at-exit registration, in registration order;
//! 2. publish every ready-at-exit result slot, in registration order;
//! 3. run exit callbacks and thread-local cleanup callbacks;
//! 4. set `done` under the completion lock and broadcast to joiners;
//! 5. release the keep-alive reference.
//!
//! Steps 1–3 run strictly before `done` becomes observable, so a joiner can
//! never see completion without the registered side effects.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex};

use crate::attr::ThreadAttributes;
use crate::errors::ThreadError;
use crate::thread::current;
use crate::thread::tls::{TlsEntry, TlsKey};
use crate::wait::{ReadyAtExit, WaitPoint, WakeTarget};

/// Native identity of a launched thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandle(libc::pthread_t);

/// Interruption bookkeeping, guarded by the block's data mutex.
pub(crate) struct InterruptData {
    pub(crate) enabled: bool,
    pub(crate) requested: bool,
    /// The wait point the owning thread is currently blocked on. `Some`
    /// only while that thread is inside an interruptible-wait scope.
    pub(crate) current_wait: Option<Arc<dyn WakeTarget>>,
}

struct Completion {
    done: bool,
    join_started: bool,
    joined: bool,
}

/// Callback run during the exit drain, in the same phase as TLS cleanup.
pub type ExitCallback = Box<dyn FnOnce() + Send>;

/// Registries drained at thread exit. Touched only by the owning thread
/// while it runs (the launcher may register before launch); the mutex is
/// uncontended by construction.
pub(crate) struct ExitRegistry {
    pub(crate) tls: HashMap<TlsKey, TlsEntry>,
    pub(crate) callbacks: Vec<ExitCallback>,
    notify: Vec<Arc<dyn WakeTarget>>,
    ready: Vec<Arc<dyn ReadyAtExit>>,
    keep_alive: Option<Arc<ThreadControlBlock>>,
}

/// The central per-thread record: identity, completion state, interruption
/// flags, the cleanup registry, and the exit-time notification lists.
pub struct ThreadControlBlock {
    launched: AtomicBool,
    handle: OnceLock<NativeHandle>,
    pub(crate) data: Mutex<InterruptData>,
    completion: Mutex<Completion>,
    completion_cond: Condvar,
    pub(crate) exit: Mutex<ExitRegistry>,
    /// Dedicated wait point for interruptible sleeps.
    pub(crate) sleep_point: Arc<WaitPoint<()>>,
    entry: Mutex<Option<Box<dyn FnOnce() + Send + 'static>>>,
}

impl ThreadControlBlock {
    /// Build a control block around the callable the native thread will run.
    pub fn new(entry: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            launched: AtomicBool::new(false),
            handle: OnceLock::new(),
            data: Mutex::new(InterruptData {
                enabled: true,
                requested: false,
                current_wait: None,
            }),
            completion: Mutex::new(Completion {
                done: false,
                join_started: false,
                joined: false,
            }),
            completion_cond: Condvar::new(),
            exit: Mutex::new(ExitRegistry {
                tls: HashMap::new(),
                callbacks: Vec::new(),
                notify: Vec::new(),
                ready: Vec::new(),
                keep_alive: None,
            }),
            sleep_point: Arc::new(WaitPoint::new(())),
            entry: Mutex::new(Some(Box::new(entry))),
        })
    }

    /// Native identity, once launched.
    #[must_use]
    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.handle.get().copied()
    }

    /// Whether the thread has completed its exit drain.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completion.lock().done
    }

    /// Whether a join has completed. Implies [`is_done`](Self::is_done).
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.completion.lock().joined
    }

    /// Append a wake target to the notify-at-exit list. Side effect only;
    /// nothing is signaled until the exit drain.
    pub fn register_notify_at_exit(&self, target: Arc<dyn WakeTarget>) {
        self.exit.lock().notify.push(target);
    }

    /// Append a result slot to the ready-at-exit list. Side effect only.
    pub fn register_ready_at_exit(&self, slot: Arc<dyn ReadyAtExit>) {
        self.exit.lock().ready.push(slot);
    }

    /// Append a callback run during the exit drain, after notify/ready
    /// dispatch. Callbacks run most-recent-first, in the same bounded
    /// fixed-point phase as TLS cleanup.
    pub fn register_callback_at_exit(&self, callback: ExitCallback) {
        self.exit.lock().callbacks.push(callback);
    }

    /// Wait until the thread completes. Single-winner: the first caller to
    /// start a join owns it; every later caller gets `AlreadyJoined`.
    pub fn join(&self) -> Result<(), ThreadError> {
        let mut state = self.completion.lock();
        if state.join_started {
            return Err(ThreadError::AlreadyJoined);
        }
        state.join_started = true;
        while !state.done {
            self.completion_cond.wait(&mut state);
        }
        state.joined = true;
        Ok(())
    }

    /// Ask the thread to stop at its next interruption checkpoint.
    ///
    /// Sets the pending flag; if the thread is currently blocked inside an
    /// interruptible-wait scope, additionally wakes the registered wait
    /// point so the request is observed without waiting out the block.
    pub fn request_interruption(&self) {
        let mut data = self.data.lock();
        data.requested = true;
        if let Some(target) = data.current_wait.clone() {
            // Acquires the wait point's mutex while the data lock is held;
            // same order as the scope guard's registration path.
            target.wake();
        }
    }

    /// Run the exit drain. Called exactly once, by the owning thread.
    pub(crate) fn finish(&self) {
        let (notify, ready) = {
            let mut exit = self.exit.lock();
            (std::mem::take(&mut exit.notify), std::mem::take(&mut exit.ready))
        };
        for target in notify {
            target.wake();
        }
        for slot in ready {
            slot.mark_ready();
        }
        self.run_exit_cleanup();
        {
            let mut state = self.completion.lock();
            state.done = true;
        }
        self.completion_cond.notify_all();
        // Releasing the keep-alive is the last step: it is what allows the
        // block to be reclaimed once the launcher's handle is gone too.
        let keep_alive = self.exit.lock().keep_alive.take();
        drop(keep_alive);
    }
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

struct StartPayload {
    tcb: Arc<ThreadControlBlock>,
}

extern "C" fn thread_trampoline(raw: *mut libc::c_void) -> *mut libc::c_void {
    // SAFETY: raw came from Box::into_raw in launch(); ownership transfers
    // here exactly once.
    let payload = unsafe { Box::from_raw(raw.cast::<StartPayload>()) };
    // Join is the condvar protocol on the control block, never a native
    // join, so the native thread reclaims its own resources.
    // SAFETY: pthread_self() is the calling thread's own valid handle.
    let rc = unsafe { libc::pthread_detach(libc::pthread_self()) };
    assert_eq!(rc, 0, "pthread_detach failed");
    run_on_thread(payload.tcb);
    std::ptr::null_mut()
}

fn run_on_thread(tcb: Arc<ThreadControlBlock>) {
    current::set_current(Some(Arc::clone(&tcb)));
    let entry = tcb.entry.lock().take();
    if let Some(entry) = entry {
        // An unwinding entry still gets the full exit drain.
        let _ = panic::catch_unwind(AssertUnwindSafe(entry));
    }
    tcb.finish();
    current::set_current(None);
}

/// Create the native thread for a control block.
///
/// The keep-alive self-reference is installed before creation and released
/// at the end of the exit drain, so the block outlives the launcher's
/// handle if that is dropped first. Creation failure is recoverable and
/// reported with the native errno.
pub fn launch(
    tcb: &Arc<ThreadControlBlock>,
    attrs: &ThreadAttributes,
) -> Result<NativeHandle, ThreadError> {
    if tcb.launched.swap(true, Ordering::AcqRel) {
        return Err(ThreadError::AlreadyLaunched);
    }
    tcb.exit.lock().keep_alive = Some(Arc::clone(tcb));

    let payload = Box::into_raw(Box::new(StartPayload {
        tcb: Arc::clone(tcb),
    }));
    let mut native: libc::pthread_t = 0;
    // SAFETY: attrs owns an initialized pthread_attr_t; the trampoline has
    // the signature pthread_create expects; payload stays valid until the
    // trampoline reclaims it (or we reclaim it below on failure).
    let rc = unsafe {
        libc::pthread_create(&mut native, attrs.native(), thread_trampoline, payload.cast())
    };
    if rc != 0 {
        // SAFETY: the thread was never created, so ownership of payload is
        // still ours.
        drop(unsafe { Box::from_raw(payload) });
        tcb.exit.lock().keep_alive = None;
        // Spawn failure is recoverable; the block may be launched again.
        tcb.launched.store(false, Ordering::Release);
        return Err(ThreadError::SpawnFailed(rc));
    }
    let handle = NativeHandle(native);
    let _ = tcb.handle.set(handle);
    Ok(handle)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::ResultSlot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn spawn(entry: impl FnOnce() + Send + 'static) -> Arc<ThreadControlBlock> {
        let tcb = ThreadControlBlock::new(entry);
        launch(&tcb, &ThreadAttributes::new()).expect("launch");
        tcb
    }

    #[test]
    fn join_observes_completion() {
        let ran = Arc::new(AtomicUsize::new(0));
        let tcb = spawn({
            let ran = Arc::clone(&ran);
            move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }
        });
        tcb.join().expect("join");
        assert!(tcb.is_done());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_join_reports_misuse() {
        let tcb = spawn(|| {});
        tcb.join().expect("first join");
        assert_eq!(tcb.join(), Err(ThreadError::AlreadyJoined));
    }

    #[test]
    fn joined_implies_done() {
        let tcb = spawn(|| {});
        assert!(!tcb.is_joined());
        tcb.join().expect("join");
        assert!(tcb.is_joined());
        assert!(tcb.is_done());
    }

    #[test]
    fn double_launch_reports_misuse() {
        let tcb = spawn(|| {});
        assert_eq!(
            launch(&tcb, &ThreadAttributes::new()),
            Err(ThreadError::AlreadyLaunched)
        );
        tcb.join().expect("join");
    }

    #[test]
    fn native_handle_set_once_at_launch() {
        let tcb = ThreadControlBlock::new(|| {});
        assert!(tcb.native_handle().is_none());
        let handle = launch(&tcb, &ThreadAttributes::new()).expect("launch");
        assert_eq!(tcb.native_handle(), Some(handle));
        tcb.join().expect("join");
    }

    #[test]
    fn panicking_entry_still_drains() {
        let slot = Arc::new(ResultSlot::<i32>::new());
        let tcb = ThreadControlBlock::new(|| panic!("entry failed"));
        tcb.register_ready_at_exit(Arc::clone(&slot) as Arc<dyn ReadyAtExit>);
        launch(&tcb, &ThreadAttributes::new()).expect("launch");
        tcb.join().expect("join");
        assert!(slot.is_ready());
    }

    #[test]
    fn ready_slot_published_at_exit_with_value() {
        let slot = Arc::new(ResultSlot::new());
        let tcb = ThreadControlBlock::new({
            let slot = Arc::clone(&slot);
            move || {
                slot.fulfill(99);
            }
        });
        tcb.register_ready_at_exit(Arc::clone(&slot) as Arc<dyn ReadyAtExit>);
        launch(&tcb, &ThreadAttributes::new()).expect("launch");
        assert_eq!(slot.take_blocking(), Some(99));
        tcb.join().expect("join");
    }

    #[test]
    fn launcher_can_drop_handle_before_thread_finishes() {
        let slot = Arc::new(ResultSlot::new());
        {
            let tcb = ThreadControlBlock::new({
                let slot = Arc::clone(&slot);
                move || {
                    std::thread::sleep(Duration::from_millis(50));
                    slot.fulfill(1);
                }
            });
            tcb.register_ready_at_exit(Arc::clone(&slot) as Arc<dyn ReadyAtExit>);
            launch(&tcb, &ThreadAttributes::new()).expect("launch");
            // tcb dropped here; the keep-alive keeps the block alive.
        }
        assert_eq!(slot.take_blocking(), Some(1));
    }

    #[test]
    fn concurrent_joins_have_one_winner() {
        let tcb = spawn(|| std::thread::sleep(Duration::from_millis(30)));
        let contender = {
            let tcb = Arc::clone(&tcb);
            std::thread::spawn(move || tcb.join())
        };
        let local = tcb.join();
        let remote = contender.join().expect("joiner thread");
        match (local, remote) {
            (Ok(()), Err(ThreadError::AlreadyJoined))
            | (Err(ThreadError::AlreadyJoined), Ok(())) => {}
            other => panic!("expected exactly one winner, got {other:?}"),
        }
    }

    #[test]
    fn request_interruption_outside_wait_only_sets_flag() {
        // No wait registered: the request must not signal anything, just
        // leave the pending flag for the next checkpoint.
        let tcb = ThreadControlBlock::new(|| {});
        tcb.request_interruption();
        let data = tcb.data.lock();
        assert!(data.requested);
        assert!(data.current_wait.is_none());
    }
}
