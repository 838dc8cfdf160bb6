//! Run plans and the coordinator that executes them.

use anyhow::Result;
use anyhow::bail;
use log::info;
use log::warn;

use crate::util::child::Child;
use crate::workloads::launcher::launch;
use crate::workloads::spec::WorkloadSpec;

/// Outcome of a completed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Number of child processes launched.
    pub launched: usize,
    /// Number of child processes that exited with an error.
    pub failed: usize,
}

/// A set of workloads to run for a fixed duration.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    duration_s: u32,
    specs: Vec<WorkloadSpec>,
}

impl RunPlan {
    /// The maximum number of workload specs in a plan.
    pub const MAX_WORKLOADS: usize = 20;

    pub fn new(duration_s: u32) -> Self {
        Self {
            duration_s,
            specs: Vec::new(),
        }
    }

    pub fn duration_s(&self) -> u32 {
        self.duration_s
    }

    pub fn specs(&self) -> &[WorkloadSpec] {
        &self.specs
    }

    /// Append a spec, failing once the plan is full.
    pub fn push(&mut self, spec: WorkloadSpec) -> Result<()> {
        if self.specs.len() >= Self::MAX_WORKLOADS {
            bail!("reached the max workloads {}", Self::MAX_WORKLOADS);
        }
        self.specs.push(spec);
        Ok(())
    }

    /// The diagnostic line printed before a spec is launched.
    pub fn describe(spec: &WorkloadSpec, iterations: u64) -> String {
        let cpu = spec.cpu().map_or(-1, |cpu| cpu as i64);
        let policy = spec.policy().map_or(-1, |policy| policy.as_raw());
        format!(
            "period {}ms, exec {}ms, loop {}, cpu {}, policy {}, num {}",
            spec.period_ms(),
            spec.exec_ms(),
            iterations,
            cpu,
            policy,
            spec.replicas()
        )
    }

    /// Launch every workload and wait for all of them to finish.
    ///
    /// Workloads are launched in the order they were added. A failure to
    /// create a child aborts the run: the error is returned and the children
    /// launched so far are killed. A child that fails after starting is only
    /// counted.
    pub fn run(&self) -> Result<RunOutcome> {
        self.run_with(launch)
    }

    fn run_with<L>(&self, mut launch: L) -> Result<RunOutcome>
    where
        L: FnMut(&WorkloadSpec, u64) -> Result<Vec<Child>>,
    {
        let mut children: Vec<Child> = Vec::new();
        for spec in &self.specs {
            let iterations = spec.iterations(self.duration_s);
            println!("{}", Self::describe(spec, iterations));
            // On failure `children` is dropped, killing every earlier replica.
            children.extend(launch(spec, iterations)?);
        }

        let mut outcome = RunOutcome {
            launched: children.len(),
            failed: 0,
        };
        for child in children.iter_mut() {
            if let Err(e) = child.wait() {
                warn!("replica pid {} failed: {e:#}", child.pid());
                outcome.failed += 1;
            }
        }
        info!(
            "all {} replicas finished, {} failed",
            outcome.launched, outcome.failed
        );
        Ok(outcome)
    }
}
