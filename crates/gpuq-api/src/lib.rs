//! gpuq-api: REST surface over the scheduler
//!
//! A thin façade: request parsing, status-code mapping, CORS. Every
//! operation calls straight into [`gpuq_scheduler::Scheduler`].

pub mod rest;

pub use rest::create_router;
