//! Session runner trait definition

use async_trait::async_trait;
use gpuq_core::GpuqResult;
use std::path::Path;

/// Minimal contract over the terminal multiplexer
///
/// Three operations, no others. Deliberately small so tests can fake it.
#[async_trait]
pub trait SessionRunner: Send + Sync {
    /// Launch a detached session named `name` running `bash <script>`
    ///
    /// Errors if a session with that name already exists, the multiplexer is
    /// absent, or the script is missing.
    async fn start(&self, name: &str, script: &Path) -> GpuqResult<()>;

    /// Cheap liveness probe
    async fn exists(&self, name: &str) -> GpuqResult<bool>;

    /// Terminate the session and all its processes
    async fn kill(&self, name: &str) -> GpuqResult<()>;
}
