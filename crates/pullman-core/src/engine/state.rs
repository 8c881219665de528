//! Task lifecycle states

use crate::error::PullmanError;
use pullman_types::{Progress, ResumeToken};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Internal state of a task.
///
/// `Finished`, `Canceled` and `Failed` are terminal.
#[derive(Debug, Clone)]
pub enum TaskState {
    /// Waiting to be started, optionally with data to resume from
    Queued(Option<ResumeToken>),
    /// Paused with the data needed to resume
    Suspended(ResumeToken),
    /// Handed over to the transport
    Downloading(Progress),
    /// Body received at a temporary path, being moved into place
    Completed { temp_path: PathBuf },
    /// Resource stored at its final path
    Finished { final_path: PathBuf },
    Canceled,
    Failed(Arc<PullmanError>),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished { .. } | TaskState::Canceled | TaskState::Failed(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskState::Queued(_) => "queued",
            TaskState::Suspended(_) => "suspended",
            TaskState::Downloading(_) => "downloading",
            TaskState::Completed { .. } => "completed",
            TaskState::Finished { .. } => "finished",
            TaskState::Canceled => "canceled",
            TaskState::Failed(_) => "failed",
        }
    }

    pub fn progress(&self) -> Option<Progress> {
        match self {
            TaskState::Downloading(progress) => Some(*progress),
            _ => None,
        }
    }

    pub fn resume_token(&self) -> Option<&ResumeToken> {
        match self {
            TaskState::Queued(token) => token.as_ref(),
            TaskState::Suspended(token) => Some(token),
            _ => None,
        }
    }

    /// Temporary or final file path, once the body has been received
    pub fn path(&self) -> Option<&Path> {
        match self {
            TaskState::Completed { temp_path } => Some(temp_path),
            TaskState::Finished { final_path } => Some(final_path),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PullmanError> {
        match self {
            TaskState::Failed(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

// Failures compare equal regardless of the error
impl PartialEq for TaskState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TaskState::Queued(a), TaskState::Queued(b)) => a == b,
            (TaskState::Suspended(a), TaskState::Suspended(b)) => a == b,
            (TaskState::Downloading(a), TaskState::Downloading(b)) => a == b,
            (TaskState::Completed { temp_path: a }, TaskState::Completed { temp_path: b }) => a == b,
            (TaskState::Finished { final_path: a }, TaskState::Finished { final_path: b }) => a == b,
            (TaskState::Canceled, TaskState::Canceled) => true,
            (TaskState::Failed(_), TaskState::Failed(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Queued(Some(_)) => f.write_str("Queued with resume data"),
            TaskState::Queued(None) => f.write_str("Queued"),
            TaskState::Suspended(_) => f.write_str("Suspended"),
            TaskState::Downloading(progress) => write!(f, "Downloading with progress {}", progress),
            TaskState::Completed { temp_path } => {
                write!(f, "Completed at temporary path {}", temp_path.display())
            }
            TaskState::Finished { final_path } => write!(f, "Finished at {}", final_path.display()),
            TaskState::Canceled => f.write_str("Canceled"),
            TaskState::Failed(error) => write!(f, "Failed: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Queued(None).is_terminal());
        assert!(!TaskState::Downloading(Progress::ZERO).is_terminal());
        assert!(!TaskState::Completed { temp_path: "/tmp/a".into() }.is_terminal());
        assert!(TaskState::Finished { final_path: "/tmp/a".into() }.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Failed(Arc::new(PullmanError::Cancelled)).is_terminal());
    }

    #[test]
    fn test_failures_compare_equal() {
        let a = TaskState::Failed(Arc::new(PullmanError::Server { status: 500 }));
        let b = TaskState::Failed(Arc::new(PullmanError::ResumeTokenUnavailable));
        assert_eq!(a, b);
        assert_ne!(a, TaskState::Canceled);
    }

    #[test]
    fn test_display() {
        let state = TaskState::Downloading(Progress::new(250, 1000));
        assert_eq!(state.to_string(), "Downloading with progress 25/100");
        assert_eq!(state.progress(), Some(Progress::new(250, 1000)));
        assert_eq!(TaskState::Queued(None).name(), "queued");
    }
}
