//! Core domain models for the scheduling engine.
//!
//! This module contains tasks, workers and the dependency graph utility
//! shared by validation, sequencing and layering.

pub mod dag;
pub mod task;
pub mod worker;

pub use dag::TaskGraph;
pub use task::{Priority, Task, TaskId, TaskSpec, TaskStatus};
pub use worker::{Worker, WorkerId, WorkerStatus};
