//! gpuq-probe: GPU inventory acquisition for gpuq
//!
//! The scheduler only ever sees the [`GpuProbe`] trait; production wires the
//! nvidia-smi implementation, tests wire deterministic fakes.

pub mod nvidia_smi;
pub mod traits;

pub use nvidia_smi::NvidiaSmiProbe;
pub use traits::GpuProbe;
