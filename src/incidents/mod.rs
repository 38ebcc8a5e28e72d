//! Incident Record Manager.

pub mod lifecycle;
pub mod manager;
pub mod store;

#[cfg(test)]
mod tests;

pub use lifecycle::{replay, Rejection};
pub use manager::{EvidenceUpload, IncidentManager, LiveDetection, Submission, SubmissionReceipt};
pub use store::{IncidentStore, MemoryIncidentStore};
