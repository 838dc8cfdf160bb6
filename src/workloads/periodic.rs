//! Periodic workload implementation.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use anyhow::bail;
use log::debug;

use crate::util::clock::ThreadCpuClock;
use crate::util::clock::Timespec;
use crate::util::sched::Sched;
use crate::workloads::spec::WorkloadSpec;

/// Run one period: sleep for the idle part, then burn `exec_ms` of CPU time.
///
/// The burn polls the thread CPU clock rather than sleeping, so the calling
/// thread really consumes the budget even when it is preempted part way.
///
/// # Arguments
///
/// * `period_ms` - The length of the period
/// * `exec_ms` - The CPU time to consume, must not exceed `period_ms`
///
/// # Returns
///
/// The CPU time consumed by the busy loop, which is never less than `exec_ms`.
pub fn step(period_ms: u32, exec_ms: u32) -> Result<Duration> {
    let Some(idle_ms) = period_ms.checked_sub(exec_ms) else {
        bail!("exec {exec_ms}ms exceeds period {period_ms}ms");
    };
    thread::sleep(Duration::from_millis(u64::from(idle_ms)));

    let start = ThreadCpuClock::now()?;
    let target = start + Timespec::from_millis(exec_ms);
    let mut now = ThreadCpuClock::now()?;
    while !now.is_after(&target) {
        now = ThreadCpuClock::now()?;
    }
    Ok((now - start).to_duration().unwrap_or_default())
}

/// Summary of a finished worker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub iterations: u64,
    pub consumed: Duration,
}

/// A single replica of a workload.
pub struct PeriodicWorker {
    spec: WorkloadSpec,
    iterations: u64,
}

impl PeriodicWorker {
    pub fn new(spec: WorkloadSpec, iterations: u64) -> Self {
        Self { spec, iterations }
    }

    /// Apply the scheduling attributes and run every iteration on the calling
    /// thread.
    pub fn run(&self) -> Result<WorkerReport> {
        let applied = Sched::apply(self.spec.cpu(), self.spec.policy());
        let policy = Sched::current_policy().unwrap_or(-1);
        debug!("worker {}: applied {:?}, policy {}", self.spec, applied, policy);

        let mut report = WorkerReport::default();
        for _ in 0..self.iterations {
            report.consumed += step(self.spec.period_ms(), self.spec.exec_ms())?;
            report.iterations += 1;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use more_asserts::assert_ge;
    use more_asserts::assert_le;

    use super::*;
    use crate::util::child::Child;
    use crate::util::sched::Policy;

    /// Allowance for clock granularity and polling overhead.
    const EPSILON: Duration = Duration::from_millis(5);

    #[test]
    fn test_step_budget() -> Result<()> {
        let before = ThreadCpuClock::now()?;
        let consumed = step(100, 30)?;
        let measured = (ThreadCpuClock::now()? - before).to_duration().unwrap();

        assert_ge!(consumed, Duration::from_millis(30));
        assert_le!(consumed, Duration::from_millis(30) + EPSILON);
        assert_ge!(measured, Duration::from_millis(30));
        assert_le!(measured, Duration::from_millis(30) + EPSILON);
        Ok(())
    }

    #[test]
    fn test_step_sleeps_idle_time() -> Result<()> {
        let start = Instant::now();
        step(60, 10)?;
        assert_ge!(start.elapsed(), Duration::from_millis(60));
        Ok(())
    }

    #[test]
    fn test_step_zero_exec() -> Result<()> {
        let consumed = step(5, 0)?;
        assert_le!(consumed, EPSILON);
        Ok(())
    }

    #[test]
    fn test_step_rejects_overrun() {
        assert!(step(10, 20).is_err());
    }

    #[test]
    fn test_worker_iterations() -> Result<()> {
        let spec = WorkloadSpec::new(20, 5)?;
        let report = PeriodicWorker::new(spec, 4).run()?;
        assert_eq!(report.iterations, 4);
        assert_ge!(report.consumed, Duration::from_millis(20));
        assert_le!(report.consumed, Duration::from_millis(20) + 4 * EPSILON);
        Ok(())
    }

    #[test]
    fn test_worker_applies_policy() -> Result<()> {
        let mut child = Child::run(|| {
            let spec = WorkloadSpec::new(10, 2)?.with_policy(Policy::Batch);
            PeriodicWorker::new(spec, 2).run()?;
            if Sched::current_policy()? != Policy::Batch.as_raw() {
                bail!("worker did not run under batch");
            }
            Ok(())
        })?;
        child.wait()
    }
}
