//! Application layer orchestrating the default lifecycle.
//!
//! `DefaultProcessor` runs the nightly sweep, the deferred notification pass
//! and the dashboard status query; `scheduler` fires them at fixed local hours.

pub mod config;
pub mod exclusive;
pub mod processor;
pub mod report;
pub mod scheduler;
