//! gpuq-store: durable task persistence for gpuq
//!
//! A single `tasks` table in an embedded SQLite database. The pool is capped
//! at one connection so every operation serializes; only the scheduler talks
//! to the store. Task history is never deleted.

pub mod store;

pub use store::{TaskPatch, TaskStore};
