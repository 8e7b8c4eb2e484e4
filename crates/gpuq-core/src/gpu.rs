//! GPU inventory records and occupancy views

use serde::{Deserialize, Serialize};

/// One GPU as reported by the probe
///
/// Fields other than the index may be absent when the probe tool reports
/// `[N/A]` for them. Memory figures are MiB, utilization is a percentage;
/// both exist for display only and never influence admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuRecord {
    /// Device index
    pub index: u32,
    /// Device UUID
    pub uuid: Option<String>,
    /// Device model name, the admission matching key
    pub name: Option<String>,
    /// Total memory in MiB
    pub memory_total: Option<u64>,
    /// Used memory in MiB
    pub memory_used: Option<u64>,
    /// Utilization percentage (0-100)
    pub utilization: Option<u32>,
}

impl GpuRecord {
    /// A GPU without a model name can never match a task requirement
    pub fn is_schedulable(&self) -> bool {
        self.name.is_some()
    }
}

/// A probe record augmented with scheduler occupancy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuStatusView {
    pub index: u32,
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub memory_total: Option<u64>,
    pub memory_used: Option<u64>,
    pub utilization: Option<u32>,
    /// Id of the running task holding this index, if any
    pub assigned_task_id: Option<i64>,
    /// True iff no running task holds this index
    pub is_free: bool,
}

impl GpuStatusView {
    pub fn from_record(record: GpuRecord, assigned_task_id: Option<i64>) -> Self {
        Self {
            index: record.index,
            uuid: record.uuid,
            name: record.name,
            memory_total: record.memory_total,
            memory_used: record.memory_used,
            utilization: record.utilization,
            assigned_task_id,
            is_free: assigned_task_id.is_none(),
        }
    }
}

/// Best-effort GPU occupancy report
///
/// When the probe fails the list is empty and `error` carries the reason;
/// the endpoint still answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuStatusReport {
    pub gpus: Vec<GpuStatusView>,
    pub error: Option<String>,
}
