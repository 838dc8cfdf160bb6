//! Workload implementations for the periodic load generator
//!
//! This module provides the workload specification, the periodic step that
//! burns CPU time, the replica launcher and the run plan that coordinates them.

pub mod launcher;
pub mod periodic;
pub mod plan;
pub mod spec;
