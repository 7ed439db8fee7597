//! Admission pipeline: engine, rejection handler, queue reaper and batch driver

pub mod batch;
pub mod engine;
pub mod reaper;
pub mod rejection;

pub use engine::AdmissionEngine;
pub use rejection::truncate_error;
