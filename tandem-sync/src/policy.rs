//! Failure taxonomy and the single recovery policy table.
//!
//! The orchestrator and the debouncer consult [`policy_for`] instead of
//! deciding retry/fallback behavior at each call site.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The sandbox never became ready.
    Readiness,
    /// An upload, download, removal or sandbox command failed.
    Transport,
    /// The baseline commit is unknown to the sandbox (history lost).
    HistoryInconsistency,
    /// Both sides changed the same path since the baseline.
    Conflict,
    /// The baseline could not be persisted or read.
    Persistence,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureClass::Readiness => "readiness",
            FailureClass::Transport => "transport",
            FailureClass::HistoryInconsistency => "history inconsistency",
            FailureClass::Conflict => "conflict",
            FailureClass::Persistence => "persistence",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// The pass stops and reports failure.
    pub aborts_pass: bool,
    /// The previous baseline stays authoritative.
    pub keeps_baseline: bool,
    /// Re-running the same pass is safe and may succeed.
    pub retryable: bool,
    /// The debouncer may fall back to a full redeploy.
    pub escalate_to_redeploy: bool,
}

pub const fn policy_for(class: FailureClass) -> FailurePolicy {
    match class {
        FailureClass::Readiness => FailurePolicy {
            aborts_pass: true,
            keeps_baseline: true,
            retryable: true,
            escalate_to_redeploy: false,
        },
        FailureClass::Transport => FailurePolicy {
            aborts_pass: true,
            keeps_baseline: true,
            retryable: true,
            escalate_to_redeploy: true,
        },
        FailureClass::HistoryInconsistency => FailurePolicy {
            aborts_pass: false,
            keeps_baseline: false,
            retryable: false,
            escalate_to_redeploy: false,
        },
        FailureClass::Conflict => FailurePolicy {
            aborts_pass: false,
            keeps_baseline: false,
            retryable: false,
            escalate_to_redeploy: false,
        },
        FailureClass::Persistence => FailurePolicy {
            aborts_pass: true,
            keeps_baseline: true,
            retryable: true,
            escalate_to_redeploy: false,
        },
    }
}
