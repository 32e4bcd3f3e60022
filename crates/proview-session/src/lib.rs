//! ProView session crate - the session registry and the background janitor
//! that evicts idle sessions together with their stored documents.

pub mod janitor;
pub mod registry;

pub use janitor::{CleanupFailure, CleanupReport, Janitor};
pub use registry::{SessionPurge, SessionRegistry};
