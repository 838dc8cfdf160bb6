//! Periodic CPU workload synthesizer for scheduler testing.
//!
//! Each workload forks one process per replica. A replica wakes every period
//! and burns a fixed amount of CPU time, optionally pinned to a CPU and running
//! under a chosen scheduling policy.

pub mod util;
pub mod workloads;
