//! Pending signals delivered to tasks at their next suspension point.

use crate::error::{Fault, InterruptKind, ScopeInterrupt};
use crate::types::ScopeId;

/// An asynchronous signal queued on a task record.
///
/// Signals are observed only when the target task reaches a suspension
/// point; the hibernation future checks for them before anything else and
/// surfaces the highest-priority one as an `Err`.
#[derive(Debug, Clone)]
pub(crate) enum Signal {
    /// Teardown of this task (cancel, scope close).
    Cancel(Fault),
    /// The guard notification of an `until` scope owned by this task fired.
    Guard(ScopeId),
    /// A child of a scope owned by this task failed.
    ChildFailed(ScopeId),
}

impl Signal {
    pub(crate) const fn priority(&self) -> u8 {
        match self {
            Self::Cancel(_) => 2,
            Self::Guard(_) => 1,
            Self::ChildFailed(_) => 0,
        }
    }

    pub(crate) fn into_fault(self) -> Fault {
        match self {
            Self::Cancel(fault) => fault,
            Self::Guard(scope) => Fault::Interrupt(ScopeInterrupt {
                scope,
                kind: InterruptKind::Guard,
            }),
            Self::ChildFailed(scope) => Fault::Interrupt(ScopeInterrupt {
                scope,
                kind: InterruptKind::ChildFailed,
            }),
        }
    }
}
