pub mod engine;
pub mod queue;
pub mod scoring;

pub use engine::HotspotEngine;
pub use queue::RecomputeQueue;
