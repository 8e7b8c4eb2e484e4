//! gpuq-runner: session runner and work trees for gpuq
//!
//! Two concerns live here:
//! - [`SessionRunner`]: the three-operation contract over the terminal
//!   multiplexer, with [`TmuxRunner`] as the production implementation
//! - [`WorkTree`]: the per-task directory of scripts, log, and exit-code file

pub mod tmux;
pub mod traits;
pub mod workdir;

pub use tmux::TmuxRunner;
pub use traits::SessionRunner;
pub use workdir::{TaskPaths, WorkTree};
