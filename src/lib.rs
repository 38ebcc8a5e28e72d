//! Campus incident intelligence.
//!
//! Reports and live detections become incident records; evidence is analyzed
//! and redacted in the background; hotspots and emergency alerts are derived
//! from the incident set.

pub mod access;
pub mod alerts;
pub mod analyzer;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod hotspots;
pub mod incidents;
pub mod intelligence;
pub mod messaging;
pub mod models;
pub mod pipeline;
pub mod redactor;
pub mod security;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineParts};
