//! Request lifecycle tracking.

mod manager;
mod status;

pub use manager::{ManagerConfig, RequestManager, RequestStatistics, StatusStream};
pub use status::{RequestStatus, StatusEvent, StatusKind};
