//! Multi-resource transactions with compensating undo
//!
//! Used where the underlying store cannot provide atomicity across the
//! involved resources (task cancellation with all dependents, coordinated
//! external + local updates). Each [`Operation`] carries an explicit
//! `undo`; on the first failure during commit, previously executed
//! operations are undone in reverse insertion order and the original
//! error is surfaced.

mod manager;
mod operation;

pub use manager::{Transaction, TransactionError, TransactionInfo, TransactionManager};
pub use operation::Operation;

use serde::{Deserialize, Serialize};

/// Transaction lifecycle
///
/// `pending → active → committing → committed`, or
/// `{pending, active} → rolling_back → rolled_back`, or terminal
/// `failed` / `timed_out`. Terminal statuses are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Active,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
    TimedOut,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack | Self::Failed | Self::TimedOut
        )
    }

    /// Whether operations may still be added
    pub fn accepts_operations(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
