//! Integration test suite for taskloom.
//!
//! These tests drive the public API from a raw request document through
//! validation, sequencing, layering, assignment, recovery and monitoring,
//! using the in-memory collaborators.
//!
//! # Test Categories
//!
//! - `decomposition`: Validation, sequencing and layering
//! - `assignment`: Scoring strategies and the concurrency ceiling
//! - `recovery`: Bounded reassignment after worker and task failures
//! - `monitor`: Signal-driven execution tracking

mod fixtures;

mod assignment;
mod decomposition;
mod monitor;
mod recovery;
