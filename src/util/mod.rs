//! Operating system utilities: clocks, scheduling attributes and child processes.

pub mod child;
pub mod clock;
pub mod sched;
