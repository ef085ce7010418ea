//! Task decomposition and capability-aware scheduling.
//!
//! A project-analysis document goes in; an ordered, dependency-safe stream
//! of worker assignments comes out, kept valid while workers fail and tasks
//! complete or fail.

pub mod config;
pub mod core;
pub mod decompose;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod util;

pub use error::{Error, Result};
