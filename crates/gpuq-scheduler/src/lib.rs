//! gpuq-scheduler: the scheduling core of gpuq
//!
//! Owns the in-memory queue and running-set, the periodic scheduling tick
//! (snapshot, admission, reconciliation), the launch protocol, and the
//! cancellation protocol. Everything external (GPU inventory, the session
//! runner, the durable store) arrives through injected collaborators.

pub mod pool;
pub mod scheduler;

pub use pool::FreePool;
pub use scheduler::{Scheduler, TaskLogs};
