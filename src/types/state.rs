//! Task lifecycle states.

use core::fmt;

/// The lifecycle state of a task.
///
/// ```text
/// Created -> Running -> (Waiting <-> Running) -> {Success, Failed, Cancelled}
/// ```
///
/// Terminal states are sticky; once reached, the task's payload is readable
/// and further transitions are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Scheduled but not resumed yet.
    Created,
    /// Currently executing its body.
    Running,
    /// Suspended on a notification.
    Waiting,
    /// Finished due to cancellation or scope teardown.
    Cancelled,
    /// Finished due to an unhandled failure.
    Failed,
    /// Finished normally.
    Success,
}

impl TaskState {
    /// Returns true once the task has stopped for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Failed | Self::Success)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Success => "success",
        };
        f.write_str(name)
    }
}
