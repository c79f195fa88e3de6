use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Method-agnostic lifecycle state every provider status is collapsed into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Created,
    Pending,
    RequiresAction,
    Succeeded,
    Failed,
    Expired,
    Canceled,
}

impl CanonicalStatus {
    pub const ALL: [CanonicalStatus; 7] = [
        CanonicalStatus::Created,
        CanonicalStatus::Pending,
        CanonicalStatus::RequiresAction,
        CanonicalStatus::Succeeded,
        CanonicalStatus::Failed,
        CanonicalStatus::Expired,
        CanonicalStatus::Canceled,
    ];

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalStatus::Succeeded
                | CanonicalStatus::Failed
                | CanonicalStatus::Expired
                | CanonicalStatus::Canceled
        )
    }

    /// True for the states a caller should render as "still in progress".
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalStatus::Created => "created",
            CanonicalStatus::Pending => "pending",
            CanonicalStatus::RequiresAction => "requires_action",
            CanonicalStatus::Succeeded => "succeeded",
            CanonicalStatus::Failed => "failed",
            CanonicalStatus::Expired => "expired",
            CanonicalStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CanonicalStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        CanonicalStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value.trim().to_lowercase())
            .ok_or(PaymentError::ValidationError {
                message: format!("unknown canonical status: {}", value),
                field: Some("status".to_string()),
            })
    }
}
