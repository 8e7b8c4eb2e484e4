//! tmux-backed session runner

use async_trait::async_trait;
use gpuq_core::{GpuqError, GpuqResult};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::traits::SessionRunner;

/// Session runner over a tmux binary
pub struct TmuxRunner {
    binary: String,
}

impl TmuxRunner {
    pub fn new() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for TmuxRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRunner for TmuxRunner {
    async fn start(&self, name: &str, script: &Path) -> GpuqResult<()> {
        if !script.is_file() {
            return Err(GpuqError::Launch(format!(
                "session script {} does not exist",
                script.display()
            )));
        }
        if self.exists(name).await? {
            return Err(GpuqError::Launch(format!(
                "session '{}' already exists",
                name
            )));
        }

        let output = Command::new(&self.binary)
            .args(["new-session", "-d", "-s", name, "bash"])
            .arg(script)
            .output()
            .await
            .map_err(|e| GpuqError::Launch(format!("failed to invoke {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GpuqError::Launch(format!(
                "{} new-session exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        debug!(session = name, script = %script.display(), "Started session");
        Ok(())
    }

    async fn exists(&self, name: &str) -> GpuqResult<bool> {
        let result = Command::new(&self.binary)
            .args(["has-session", "-t", name])
            .output()
            .await;

        match result {
            Ok(output) => Ok(output.status.success()),
            // No multiplexer binary means no sessions can be alive
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GpuqError::Io(e)),
        }
    }

    async fn kill(&self, name: &str) -> GpuqResult<()> {
        let output = Command::new(&self.binary)
            .args(["kill-session", "-t", name])
            .output()
            .await
            .map_err(|e| GpuqError::Internal(format!("failed to invoke {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GpuqError::Internal(format!(
                "{} kill-session exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        debug!(session = name, "Killed session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_means_no_sessions() {
        let runner = TmuxRunner::with_binary("definitely-not-a-real-multiplexer");
        let exists = runner.exists("task_1").await.unwrap();
        assert!(!exists);
    }

    #[tokio::test]
    async fn test_start_rejects_missing_script() {
        let runner = TmuxRunner::with_binary("definitely-not-a-real-multiplexer");
        let err = runner
            .start("task_1", Path::new("/nonexistent/run.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, GpuqError::Launch(_)));
    }
}
