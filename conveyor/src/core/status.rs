//! Instance status and severity ordering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ConveyorError;

/// Lifecycle status shared by every instance kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, not yet reachable by execution.
    New,
    /// Reachable: an action waiting for a worker, or a container about to run.
    Ready,
    /// Running.
    InProgress,
    /// Finished successfully.
    Success,
    /// Finished with a failure.
    Failed,
    /// Canceled before finishing.
    Canceled,
    /// Finished with warnings.
    Warning,
    /// Finished, outcome not known.
    Unknown,
}

impl Default for Status {
    fn default() -> Self {
        Self::New
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = ConveyorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.name() == normalized)
            .ok_or_else(|| ConveyorError::UnknownStatus(s.to_string()))
    }
}

impl Status {
    /// Every status, in persisted id order.
    pub const ALL: [Self; 8] = [
        Self::New,
        Self::Ready,
        Self::InProgress,
        Self::Success,
        Self::Failed,
        Self::Canceled,
        Self::Warning,
        Self::Unknown,
    ];

    /// Returns the canonical upper snake case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Ready => "READY",
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
            Self::Warning => "WARNING",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Severity rank used for aggregation.
    ///
    /// Ranks are unique so that `worse_of` is commutative. Terminal statuses
    /// order as `Success < Warning < Unknown < Canceled < Failed`.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Ready => 1,
            Self::InProgress => 2,
            Self::Success => 10,
            Self::Warning => 20,
            Self::Unknown => 25,
            Self::Canceled => 30,
            Self::Failed => 40,
        }
    }

    /// Returns true if the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::New | Self::Ready | Self::InProgress)
    }

    /// Returns the status with the higher severity rank; ties keep `self`.
    #[must_use]
    pub const fn worse_of(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    /// Persisted status id.
    #[must_use]
    pub const fn status_id(self) -> u8 {
        match self {
            Self::New => 1,
            Self::Ready => 2,
            Self::InProgress => 3,
            Self::Success => 4,
            Self::Failed => 5,
            Self::Canceled => 6,
            Self::Warning => 7,
            Self::Unknown => 8,
        }
    }

    /// Looks up a status by its persisted id.
    #[must_use]
    pub fn from_status_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.status_id() == id)
    }
}

/// Returns the severity rank of a status.
#[must_use]
pub const fn rank(status: Status) -> u8 {
    status.rank()
}

/// Returns true if the status is terminal.
#[must_use]
pub const fn is_terminal(status: Status) -> bool {
    status.is_terminal()
}

/// Returns the worse of two statuses; ties keep `a`.
#[must_use]
pub const fn worse_of(a: Status, b: Status) -> Status {
    a.worse_of(b)
}

/// Folds `worse_of` over a set of statuses. An empty set aggregates to `Success`.
pub fn aggregate<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    statuses.into_iter().fold(Status::Success, Status::worse_of)
}
