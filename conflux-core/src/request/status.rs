//! Request status state machine.

use crate::error::AiError;
use crate::types::{RequestId, ResponseEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a tracked request.
///
/// ```text
/// Pending ──> Executing ──> Completed | Failed | Cancelled
///    └──────────────────────────────────────────> Cancelled
/// ```
///
/// Terminal states are final. While executing, progress may be reported
/// with a strictly increasing fraction.
#[derive(Debug, Clone)]
pub enum RequestStatus {
    Pending,
    Executing { progress: Option<f32> },
    Completed(ResponseEnvelope),
    Failed(AiError),
    Cancelled,
}

impl RequestStatus {
    /// Whether no further transition can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed(_) | RequestStatus::Failed(_) | RequestStatus::Cancelled
        )
    }

    /// Get the state without its payload
    pub fn kind(&self) -> StatusKind {
        match self {
            RequestStatus::Pending => StatusKind::Pending,
            RequestStatus::Executing { .. } => StatusKind::Executing,
            RequestStatus::Completed(_) => StatusKind::Completed,
            RequestStatus::Failed(_) => StatusKind::Failed,
            RequestStatus::Cancelled => StatusKind::Cancelled,
        }
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: &RequestStatus) -> bool {
        match (self, next) {
            (RequestStatus::Pending, RequestStatus::Executing { progress: None }) => true,
            (RequestStatus::Pending, RequestStatus::Cancelled) => true,
            (
                RequestStatus::Executing { progress: current },
                RequestStatus::Executing { progress: Some(next) },
            ) => current.map_or(true, |current| *next > current),
            (RequestStatus::Executing { .. }, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Payload-free request state, used for statistics and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusKind::Pending => "pending",
            StatusKind::Executing => "executing",
            StatusKind::Completed => "completed",
            StatusKind::Failed => "failed",
            StatusKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A status change of one request, as seen on the manager-wide feed
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub request_id: RequestId,
    pub status: RequestStatus,
}
