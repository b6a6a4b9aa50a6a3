//! Conformance scenario harness for strand.
//!
//! Each scenario exercises one contract of the thread subsystem end to end
//! on real OS threads and emits a structured evidence record, so behavior
//! can be checked on a target machine without running the test suite.

pub mod scenarios;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
