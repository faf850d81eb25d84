//! Stage and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed with complete data.
    Success,
    /// Stage completed but degraded (some data missing or a fallback used).
    Partial,
    /// Stage could not produce a usable result.
    Failed,
    /// Stage was not run.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the stage produced a payload downstream stages may use.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// The final state of a whole job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded.
    Success,
    /// Nothing failed, but some stage was degraded or skipped.
    Partial,
    /// At least one stage failed.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RunStatus {
    /// Folds a sequence of stage statuses into a run status.
    pub fn from_stages<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = StageStatus>,
    {
        let mut degraded = false;
        for status in statuses {
            match status {
                StageStatus::Failed => return Self::Failed,
                StageStatus::Partial | StageStatus::Skipped => degraded = true,
                StageStatus::Success => {}
            }
        }
        if degraded {
            Self::Partial
        } else {
            Self::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::Success.to_string(), "success");
        assert_eq!(StageStatus::Partial.to_string(), "partial");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
        assert_eq!(StageStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_stage_status_usable() {
        assert!(StageStatus::Success.is_usable());
        assert!(StageStatus::Partial.is_usable());
        assert!(!StageStatus::Failed.is_usable());
        assert!(!StageStatus::Skipped.is_usable());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Partial).unwrap();
        assert_eq!(json, r#""partial""#);

        let deserialized: StageStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, StageStatus::Partial);
    }

    #[test]
    fn test_run_status_folding() {
        use StageStatus::*;
        assert_eq!(RunStatus::from_stages([Success, Success]), RunStatus::Success);
        assert_eq!(RunStatus::from_stages([Success, Partial]), RunStatus::Partial);
        assert_eq!(RunStatus::from_stages([Success, Skipped]), RunStatus::Partial);
        assert_eq!(RunStatus::from_stages([Partial, Failed, Skipped]), RunStatus::Failed);
        assert_eq!(RunStatus::from_stages(std::iter::empty()), RunStatus::Success);
    }
}
