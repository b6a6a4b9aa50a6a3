//! Scenario implementations and their evidence records.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use strand_core::thread::{self, ThreadSlot};
use strand_core::{
    ReadyAtExit, ResultSlot, ThreadAttributes, ThreadControlBlock, ThreadError, WakeTarget, launch,
};

use crate::HarnessError;

/// One observed property inside a scenario run.
#[derive(Debug, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Evidence record for a single scenario run.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub passed: bool,
    pub elapsed_ms: u128,
    pub checks: Vec<Check>,
}

/// Names of every available scenario, in run order.
pub const SCENARIOS: &[&str] = &["spawn-join", "interrupt-storm", "notify-order", "tls-cleanup"];

/// Run one scenario by name.
pub fn run(name: &str) -> Result<ScenarioReport, HarnessError> {
    let start = Instant::now();
    let checks = match name {
        "spawn-join" => spawn_join(),
        "interrupt-storm" => interrupt_storm(),
        "notify-order" => notify_order(),
        "tls-cleanup" => tls_cleanup(),
        other => return Err(HarnessError::UnknownScenario(other.to_owned())),
    };
    Ok(ScenarioReport {
        scenario: name.to_owned(),
        passed: checks.iter().all(|check| check.passed),
        elapsed_ms: start.elapsed().as_millis(),
        checks,
    })
}

/// Run every scenario.
pub fn run_all() -> Result<Vec<ScenarioReport>, HarnessError> {
    SCENARIOS.iter().map(|name| run(name)).collect()
}

// ---------------------------------------------------------------------------
// spawn-join
// ---------------------------------------------------------------------------

fn spawn_join() -> Vec<Check> {
    let slot = Arc::new(ResultSlot::new());
    let tcb = ThreadControlBlock::new({
        let slot = Arc::clone(&slot);
        move || {
            slot.fulfill(6 * 7);
        }
    });
    tcb.register_ready_at_exit(Arc::clone(&slot) as Arc<dyn ReadyAtExit>);

    let mut attrs = ThreadAttributes::new();
    attrs.set_stack_size(512 * 1024);

    let mut checks = Vec::new();
    match launch(&tcb, &attrs) {
        Ok(_) => checks.push(Check::new("launch", true, "native thread created")),
        Err(err) => {
            checks.push(Check::new("launch", false, err.to_string()));
            return checks;
        }
    }
    let joined = tcb.join();
    checks.push(Check::new("join", joined.is_ok(), format!("{joined:?}")));
    let second = tcb.join();
    checks.push(Check::new(
        "second-join-refused",
        second == Err(ThreadError::AlreadyJoined),
        format!("{second:?}"),
    ));
    let value = slot.try_take();
    checks.push(Check::new(
        "result-published",
        value == Some(42),
        format!("{value:?}"),
    ));
    checks
}

// ---------------------------------------------------------------------------
// interrupt-storm
// ---------------------------------------------------------------------------

fn interrupt_storm() -> Vec<Check> {
    const WORKERS: usize = 8;
    let interrupted = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut workers: Vec<Arc<ThreadControlBlock>> = Vec::with_capacity(WORKERS);
    for _ in 0..WORKERS {
        let interrupted = Arc::clone(&interrupted);
        let tcb = ThreadControlBlock::new(move || {
            if thread::sleep_for(Duration::from_secs(30)) == Err(ThreadError::Interrupted) {
                interrupted.fetch_add(1, Ordering::SeqCst);
            }
        });
        if let Err(err) = launch(&tcb, &ThreadAttributes::new()) {
            for tcb in &workers {
                tcb.request_interruption();
                let _ = tcb.join();
            }
            return vec![Check::new("launch", false, err.to_string())];
        }
        workers.push(tcb);
    }

    std::thread::sleep(Duration::from_millis(50));
    for tcb in &workers {
        tcb.request_interruption();
    }
    for tcb in &workers {
        let _ = tcb.join();
    }

    let woken = interrupted.load(Ordering::SeqCst);
    let elapsed = start.elapsed();
    vec![
        Check::new(
            "all-interrupted",
            woken == WORKERS,
            format!("{woken}/{WORKERS} workers interrupted"),
        ),
        Check::new(
            "woken-early",
            elapsed < Duration::from_secs(30),
            format!("storm settled in {elapsed:?}"),
        ),
    ]
}

// ---------------------------------------------------------------------------
// notify-order
// ---------------------------------------------------------------------------

struct OrderProbe {
    id: usize,
    log: Arc<Mutex<Vec<usize>>>,
}

impl WakeTarget for OrderProbe {
    fn wake(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.push(self.id);
        }
    }
}

fn notify_order() -> Vec<Check> {
    const TARGETS: usize = 5;
    let log = Arc::new(Mutex::new(Vec::new()));

    let tcb = ThreadControlBlock::new(|| {});
    for id in 0..TARGETS {
        let probe = Arc::new(OrderProbe {
            id,
            log: Arc::clone(&log),
        });
        tcb.register_notify_at_exit(probe as Arc<dyn WakeTarget>);
    }
    if let Err(err) = launch(&tcb, &ThreadAttributes::new()) {
        return vec![Check::new("launch", false, err.to_string())];
    }
    let _ = tcb.join();

    let order = log.lock().map(|log| log.clone()).unwrap_or_default();
    vec![Check::new(
        "registration-order",
        order == (0..TARGETS).collect::<Vec<_>>(),
        format!("wake order {order:?}"),
    )]
}

// ---------------------------------------------------------------------------
// tls-cleanup
// ---------------------------------------------------------------------------

fn tls_cleanup() -> Vec<Check> {
    const KEYS: usize = 6;
    let cleaned = Arc::new(AtomicUsize::new(0));
    let callback_ran = Arc::new(AtomicUsize::new(0));
    let slots: Arc<Vec<ThreadSlot<usize>>> = Arc::new(
        (0..KEYS)
            .map(|_| {
                let cleaned = Arc::clone(&cleaned);
                ThreadSlot::with_cleanup(move |_| {
                    cleaned.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect(),
    );
    let readback_ok = Arc::new(ResultSlot::new());

    let tcb = ThreadControlBlock::new({
        let slots = Arc::clone(&slots);
        let readback_ok = Arc::clone(&readback_ok);
        let callback_ran = Arc::clone(&callback_ran);
        move || {
            let mut all_ok = true;
            for (i, slot) in slots.iter().enumerate() {
                all_ok &= slot.set(i);
                all_ok &= slot.get().as_deref() == Some(&i);
            }
            all_ok &= thread::at_exit(move || {
                callback_ran.fetch_add(1, Ordering::SeqCst);
            });
            readback_ok.fulfill(all_ok);
        }
    });
    tcb.register_ready_at_exit(Arc::clone(&readback_ok) as Arc<dyn ReadyAtExit>);
    if let Err(err) = launch(&tcb, &ThreadAttributes::new()) {
        return vec![Check::new("launch", false, err.to_string())];
    }
    let _ = tcb.join();

    let total = cleaned.load(Ordering::SeqCst);
    vec![
        Check::new(
            "readback",
            readback_ok.try_take() == Some(true),
            "per-thread values visible to the owning thread",
        ),
        Check::new(
            "cleanups-exactly-once",
            total == KEYS,
            format!("{total}/{KEYS} cleanups ran"),
        ),
        Check::new(
            "exit-callback",
            callback_ran.load(Ordering::SeqCst) == 1,
            "at-exit callback ran exactly once",
        ),
    ]
}
