//! nvidia-smi backed probe implementation

use async_trait::async_trait;
use gpuq_core::{GpuRecord, GpuqError, GpuqResult};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::traits::GpuProbe;

const QUERY_FIELDS: &str = "index,uuid,name,memory.total,memory.used,utilization.gpu";

/// Probe that shells out to nvidia-smi and parses its CSV output
pub struct NvidiaSmiProbe {
    binary: String,
    timeout: Duration,
}

impl NvidiaSmiProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "nvidia-smi".to_string(),
            timeout,
        }
    }

    /// Override the probe binary, mainly for wrapper scripts
    pub fn with_binary(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    async fn snapshot(&self) -> GpuqResult<Vec<GpuRecord>> {
        let output = Command::new(&self.binary)
            .arg(format!("--query-gpu={}", QUERY_FIELDS))
            .arg("--format=csv,noheader,nounits")
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| {
                GpuqError::ProbeUnavailable(format!(
                    "{} timed out after {:?}",
                    self.binary, self.timeout
                ))
            })?
            .map_err(|e| {
                GpuqError::ProbeUnavailable(format!("failed to invoke {}: {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GpuqError::ProbeUnavailable(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        Ok(parse_snapshot(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse nvidia-smi CSV rows into GPU records
///
/// Row format: `index, uuid, name, memory.total, memory.used, utilization.gpu`
/// with `,nounits`. Missing or `[N/A]` values become `None`; rows without a
/// parseable index are dropped.
pub fn parse_snapshot(raw: &str) -> Vec<GpuRecord> {
    let mut records = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let index = match fields.first().and_then(|v| parse_u64(v)) {
            Some(idx) => idx as u32,
            None => {
                debug!(line, "Skipping unparseable probe row");
                continue;
            }
        };
        records.push(GpuRecord {
            index,
            uuid: fields.get(1).and_then(|v| non_empty(v)),
            name: fields.get(2).and_then(|v| non_empty(v)),
            memory_total: fields.get(3).and_then(|v| parse_u64(v)),
            memory_used: fields.get(4).and_then(|v| parse_u64(v)),
            utilization: fields.get(5).and_then(|v| parse_u64(v)).map(|v| v as u32),
        });
    }
    records
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == "N/A" || value == "[N/A]" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || value == "N/A" || value == "[N/A]" {
        return None;
    }
    // nvidia-smi occasionally emits floats for memory figures
    value
        .parse::<u64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|v| v as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_rows() {
        let raw = "\
0, GPU-11111111-aaaa, NVIDIA A100 80GB, 81920, 512, 3
1, GPU-22222222-bbbb, NVIDIA A100 80GB, 81920, 40960, 97
";
        let records = parse_snapshot(raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, 0);
        assert_eq!(records[0].name.as_deref(), Some("NVIDIA A100 80GB"));
        assert_eq!(records[0].memory_total, Some(81920));
        assert_eq!(records[1].memory_used, Some(40960));
        assert_eq!(records[1].utilization, Some(97));
    }

    #[test]
    fn test_parse_preserves_probe_order() {
        let raw = "2, u2, RTX 4090, 24564, 0, 0\n0, u0, RTX 4090, 24564, 0, 0\n";
        let records = parse_snapshot(raw);
        assert_eq!(records[0].index, 2);
        assert_eq!(records[1].index, 0);
    }

    #[test]
    fn test_parse_missing_values_become_none() {
        let raw = "0, GPU-1, NVIDIA H100, [N/A], N/A, \n";
        let records = parse_snapshot(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].memory_total, None);
        assert_eq!(records[0].memory_used, None);
        assert_eq!(records[0].utilization, None);
        assert!(records[0].is_schedulable());
    }

    #[test]
    fn test_parse_missing_name_is_unschedulable() {
        let raw = "0, GPU-1, [N/A], 81920, 0, 0\n";
        let records = parse_snapshot(raw);
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_schedulable());
    }

    #[test]
    fn test_parse_drops_garbage_rows() {
        let raw = "\
not-a-row
0, GPU-1, NVIDIA A100 80GB, 81920, 512, 3

garbage, more garbage
";
        let records = parse_snapshot(raw);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].index, 0);
    }

    #[test]
    fn test_parse_float_memory() {
        let raw = "0, GPU-1, NVIDIA T4, 15360.0, 102.5, 7\n";
        let records = parse_snapshot(raw);
        assert_eq!(records[0].memory_total, Some(15360));
        assert_eq!(records[0].memory_used, Some(102));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_snapshot("").is_empty());
        assert!(parse_snapshot("\n\n").is_empty());
    }
}
