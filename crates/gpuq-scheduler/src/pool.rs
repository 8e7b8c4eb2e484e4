//! Free-GPU pool grouped by model name

use gpuq_core::GpuRecord;
use std::collections::{HashMap, HashSet};

/// Unheld GPUs of one snapshot, grouped by model in probe order
///
/// Probe order is the admission tie-break: a task takes the first k free
/// indices of its model exactly as the probe reported them.
pub struct FreePool {
    by_model: HashMap<String, Vec<u32>>,
}

impl FreePool {
    /// Build the pool from a snapshot, excluding held indices
    ///
    /// GPUs without a model name are unschedulable and never enter the pool.
    pub fn from_snapshot(snapshot: &[GpuRecord], held: &HashSet<u32>) -> Self {
        let mut by_model: HashMap<String, Vec<u32>> = HashMap::new();
        for gpu in snapshot {
            if held.contains(&gpu.index) {
                continue;
            }
            if let Some(name) = &gpu.name {
                by_model.entry(name.clone()).or_default().push(gpu.index);
            }
        }
        Self { by_model }
    }

    /// Free units of a model
    pub fn available(&self, model: &str) -> usize {
        self.by_model.get(model).map_or(0, Vec::len)
    }

    /// Consume the first `count` free indices of a model
    pub fn take(&mut self, model: &str, count: usize) -> Option<Vec<u32>> {
        let free = self.by_model.get_mut(model)?;
        if free.len() < count {
            return None;
        }
        Some(free.drain(..count).collect())
    }

    /// Put indices back at the head of their model's free list
    ///
    /// Used when a launch fails after its GPUs were taken; the restored
    /// indices keep their probe-order priority.
    pub fn restore(&mut self, model: &str, indices: Vec<u32>) {
        let free = self.by_model.entry(model.to_string()).or_default();
        let mut restored = indices;
        restored.extend(free.drain(..));
        *free = restored;
    }
}
