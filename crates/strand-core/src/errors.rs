//! Error taxonomy for the thread subsystem.
//!
//! Three kinds of outcome cross the public boundary: misuse (double join,
//! double launch), cooperative interruption, and resource exhaustion at
//! spawn time. Native-primitive failures on objects we own (attribute
//! init/destroy) are invariant violations and abort instead of surfacing
//! here.

use thiserror::Error;

/// Recoverable outcomes of thread-lifecycle operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// Another thread already won the join race for this control block.
    #[error("thread already joined")]
    AlreadyJoined,

    /// The control block was already handed to a native thread.
    #[error("thread already launched")]
    AlreadyLaunched,

    /// A pending interruption request was consumed at a checkpoint.
    ///
    /// Not a failure: the cooperative-cancellation outcome. Callers decide
    /// whether to unwind their own work or keep going.
    #[error("thread interrupted")]
    Interrupted,

    /// Native thread creation failed (resource exhaustion).
    #[error("thread spawn failed (errno {0})")]
    SpawnFailed(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(ThreadError::AlreadyJoined.to_string(), "thread already joined");
        assert_eq!(ThreadError::Interrupted.to_string(), "thread interrupted");
        assert_eq!(
            ThreadError::SpawnFailed(11).to_string(),
            "thread spawn failed (errno 11)"
        );
    }
}
