//! Thread control blocks, interruption, and thread-local cleanup.

#[allow(unsafe_code)]
pub mod control;
pub mod current;
pub mod interrupt;
pub mod tls;

pub use control::{ExitCallback, NativeHandle, ThreadControlBlock, launch};
pub use current::{
    DisableInterruption, at_exit, current, interruption_enabled, interruption_point,
    interruption_requested, notify_at_exit, ready_at_exit, sleep_for, sleep_until, yield_now,
};
pub use interrupt::InterruptibleWait;
pub use tls::{ThreadSlot, TlsCleanup, TlsKey, TlsValue};
