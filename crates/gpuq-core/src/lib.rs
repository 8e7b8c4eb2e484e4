//! gpuq-core: Core types for the gpuq job scheduler
//!
//! This crate provides the fundamental types used throughout the gpuq system:
//! - Task records and the task state machine
//! - GPU inventory records and occupancy views
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod gpu;
pub mod task;

pub use config::*;
pub use error::*;
pub use gpu::*;
pub use task::*;
