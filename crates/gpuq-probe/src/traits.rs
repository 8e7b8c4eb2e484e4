//! Probe trait definition

use async_trait::async_trait;
use gpuq_core::{GpuRecord, GpuqResult};

/// Source of GPU inventory snapshots
///
/// Every scheduling tick queries fresh; implementations must not cache.
/// Failure means "inventory unknown" and the caller skips the tick.
#[async_trait]
pub trait GpuProbe: Send + Sync {
    /// Take one inventory snapshot, in stable device order
    async fn snapshot(&self) -> GpuqResult<Vec<GpuRecord>>;
}
