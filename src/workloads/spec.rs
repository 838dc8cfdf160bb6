//! Workload specifications.

use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use anyhow::Error;
use anyhow::Result;
use anyhow::bail;

use crate::util::sched::Policy;

/// One requested periodic load profile.
///
/// A spec is validated on construction and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadSpec {
    period_ms: u32,
    exec_ms: u32,
    cpu: Option<usize>,
    policy: Option<Policy>,
    replicas: usize,
}

impl WorkloadSpec {
    /// Create a single-replica spec that inherits affinity and policy.
    ///
    /// # Arguments
    ///
    /// * `period_ms` - The wake interval, must be non-zero
    /// * `exec_ms` - The CPU time to consume per period, must not exceed the period
    pub fn new(period_ms: u32, exec_ms: u32) -> Result<Self> {
        if period_ms == 0 {
            bail!("period must be greater than zero");
        }
        if exec_ms > period_ms {
            bail!("exec {exec_ms}ms exceeds period {period_ms}ms");
        }
        Ok(Self {
            period_ms,
            exec_ms,
            cpu: None,
            policy: None,
            replicas: 1,
        })
    }

    /// Pin every replica to the given CPU.
    pub fn with_cpu(mut self, cpu: usize) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Run every replica under the given policy.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the number of replicas, which must be at least one.
    pub fn with_replicas(mut self, replicas: usize) -> Result<Self> {
        if replicas == 0 {
            bail!("replica count must be at least one");
        }
        self.replicas = replicas;
        Ok(self)
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn exec_ms(&self) -> u32 {
        self.exec_ms
    }

    pub fn cpu(&self) -> Option<usize> {
        self.cpu
    }

    pub fn policy(&self) -> Option<Policy> {
        self.policy
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Number of whole periods that fit in `duration_s` seconds.
    pub fn iterations(&self, duration_s: u32) -> u64 {
        u64::from(duration_s) * 1000 / u64::from(self.period_ms)
    }
}

impl fmt::Display for WorkloadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.period_ms, self.exec_ms)?;
        match self.cpu {
            Some(cpu) => write!(f, "{cpu}:")?,
            None => write!(f, "-:")?,
        }
        match self.policy {
            Some(policy) => write!(f, "{policy}:")?,
            None => write!(f, "-:")?,
        }
        write!(f, "{}", self.replicas)
    }
}

/// Parses `period:exec:cpu:policy:num`.
///
/// Trailing fields may be omitted, and a field starting with `-` keeps its
/// default. Unknown policy names fall back to `Policy::Other`.
impl FromStr for WorkloadSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').filter(|f| !f.is_empty()).collect();
        if fields.len() > 5 {
            bail!("too many fields in workload spec {s:?}");
        }
        let period = fields
            .first()
            .with_context(|| format!("missing period in workload spec {s:?}"))?;
        let exec = fields
            .get(1)
            .with_context(|| format!("missing exec in workload spec {s:?}"))?;
        let period: u32 = period
            .parse()
            .with_context(|| format!("invalid period {period:?}"))?;
        let exec: u32 = exec.parse().with_context(|| format!("invalid exec {exec:?}"))?;
        let mut spec = WorkloadSpec::new(period, exec)?;

        let given = |idx: usize| fields.get(idx).copied().filter(|f| !f.starts_with('-'));
        if let Some(cpu) = given(2) {
            spec = spec.with_cpu(cpu.parse().with_context(|| format!("invalid cpu {cpu:?}"))?);
        }
        if let Some(policy) = given(3) {
            spec = spec.with_policy(Policy::from_token(policy));
        }
        if let Some(num) = given(4) {
            spec = spec.with_replicas(
                num.parse()
                    .with_context(|| format!("invalid replica count {num:?}"))?,
            )?;
        }
        Ok(spec)
    }
}
