//! Replica launcher.

use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::info;

use crate::util::child::Child;
use crate::util::sched::Sched;
use crate::workloads::periodic::PeriodicWorker;
use crate::workloads::spec::WorkloadSpec;

/// Fork one child process per replica of `spec`.
///
/// Each child applies the spec's scheduling attributes once, runs
/// `iterations` periods and exits. The children share nothing with each other
/// or with the parent.
///
/// If a fork fails, the error is returned and every child already created for
/// this spec is killed as the partial vector is dropped.
///
/// # Returns
///
/// Handles to the launched children, one per replica.
pub fn launch(spec: &WorkloadSpec, iterations: u64) -> Result<Vec<Child>> {
    let mut children = Vec::with_capacity(spec.replicas());
    for replica in 0..spec.replicas() {
        let worker = PeriodicWorker::new(*spec, iterations);
        let child = Child::run(move || {
            let report = worker.run()?;
            debug!(
                "replica {replica}: {} iterations, {:?} consumed",
                report.iterations, report.consumed
            );
            if let Ok(stats) = Sched::get_current_thread_stats() {
                debug!(
                    "replica {replica}: {} voluntary, {} involuntary switches, {} migrations, \
                     user {:?}, system {:?}",
                    stats.nr_voluntary_switches,
                    stats.nr_involuntary_switches,
                    stats.nr_migrations,
                    stats.user_time,
                    stats.system_time
                );
            }
            Ok(())
        })
        .with_context(|| format!("unable to launch replica {replica} of {spec}"))?;
        info!("launched replica {replica} of {spec} as pid {}", child.pid());
        children.push(child);
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use std::time::Instant;

    use more_asserts::assert_ge;
    use more_asserts::assert_lt;
    use nix::sys::signal::Signal;

    use super::*;

    #[test]
    fn test_launch_replicas() -> Result<()> {
        let spec = WorkloadSpec::new(50, 10)?.with_replicas(4)?;
        let mut children = launch(&spec, 4)?;
        assert_eq!(children.len(), 4);
        for child in children.iter_mut() {
            child.wait()?;
        }
        Ok(())
    }

    #[test]
    fn test_launch_zero_iterations() -> Result<()> {
        let spec = WorkloadSpec::new(1000, 500)?.with_replicas(2)?;
        let start = Instant::now();
        let mut children = launch(&spec, 0)?;
        for child in children.iter_mut() {
            child.wait()?;
        }
        assert_lt!(start.elapsed(), Duration::from_millis(500));
        Ok(())
    }

    #[test]
    fn test_replicas_run_in_parallel() -> Result<()> {
        // Mostly idle periods overlap, so four replicas take about as long as one.
        let spec = WorkloadSpec::new(100, 1)?.with_replicas(4)?;
        let start = Instant::now();
        let mut children = launch(&spec, 5)?;
        for child in children.iter_mut() {
            child.wait()?;
        }
        assert_lt!(start.elapsed(), Duration::from_millis(4 * 500));
        Ok(())
    }

    #[test]
    fn test_killed_replica_does_not_block_siblings() -> Result<()> {
        let spec = WorkloadSpec::new(20, 5)?.with_replicas(4)?;
        let iterations = 5;
        let start = Instant::now();
        let mut children = launch(&spec, iterations)?;
        children[0].kill(Signal::SIGKILL)?;
        assert!(children[0].wait().is_err());

        // A sibling only exits cleanly after finishing every iteration.
        for child in children[1..].iter_mut() {
            child.wait()?;
        }
        assert_ge!(start.elapsed(), Duration::from_millis(20 * iterations));
        Ok(())
    }

    #[test]
    fn test_drop_kills_replicas() -> Result<()> {
        let spec = WorkloadSpec::new(1000, 1)?.with_replicas(2)?;
        let children = launch(&spec, 100)?;
        let start = Instant::now();
        drop(children);
        assert_lt!(start.elapsed(), Duration::from_secs(5));
        Ok(())
    }
}
