use std::fmt;
use std::fs;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use log::warn;
use nix::sched::CpuSet;
use nix::sched::sched_setaffinity;
use nix::unistd::Pid;
use procfs::process::Process;
use procfs::ticks_per_second;

/// A scheduling policy that can be requested for a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Other,
    Batch,
    Idle,
    Fifo,
    RoundRobin,
}

impl Policy {
    /// Recognized tokens and the number of leading characters that must match.
    const TOKENS: [(&'static str, usize, Policy); 5] = [
        ("other", 5, Policy::Other),
        ("batch", 5, Policy::Batch),
        ("idle", 4, Policy::Idle),
        ("fifo", 4, Policy::Fifo),
        ("rr", 2, Policy::RoundRobin),
    ];

    /// Map a user supplied token to a policy.
    ///
    /// Matching is a case-insensitive prefix comparison. Anything that is not
    /// recognized falls back to `Policy::Other`.
    pub fn from_token(token: &str) -> Policy {
        let token = token.as_bytes();
        for (name, len, policy) in Self::TOKENS {
            if token.len() >= len && token[..len].eq_ignore_ascii_case(&name.as_bytes()[..len]) {
                return policy;
            }
        }
        Policy::Other
    }

    /// The numeric identifier used by the kernel.
    pub fn as_raw(&self) -> i32 {
        match self {
            Policy::Other => libc::SCHED_OTHER,
            Policy::Batch => libc::SCHED_BATCH,
            Policy::Idle => libc::SCHED_IDLE,
            Policy::Fifo => libc::SCHED_FIFO,
            Policy::RoundRobin => libc::SCHED_RR,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Policy::Other => "other",
            Policy::Batch => "batch",
            Policy::Idle => "idle",
            Policy::Fifo => "fifo",
            Policy::RoundRobin => "rr",
        };
        f.write_str(name)
    }
}

/// Which scheduling attributes took effect in `Sched::apply`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub affinity: bool,
    pub policy: bool,
}

/// Scheduler statistics for a thread.
#[derive(Debug, Default, Clone)]
pub struct SchedStats {
    pub system_time: Duration,
    pub user_time: Duration,
    pub total_time: Duration,

    pub nr_migrations: u64,
    pub nr_voluntary_switches: u64,
    pub nr_involuntary_switches: u64,
}

impl SchedStats {
    /// Fill the counters from the contents of a `/proc/<tid>/sched` file.
    ///
    /// Lines without an integer value (the `se.*` runtimes are fractional) are
    /// skipped.
    fn parse_sched(&mut self, content: &str) {
        for line in content.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<u64>() else {
                continue;
            };
            match key.trim() {
                "se.nr_migrations" | "nr_migrations" => self.nr_migrations = value,
                "nr_voluntary_switches" => self.nr_voluntary_switches = value,
                "nr_involuntary_switches" => self.nr_involuntary_switches = value,
                _ => {}
            }
        }
    }
}

/// Scheduler utilities for setting process scheduling parameters.
pub struct Sched;

impl Sched {
    /// Apply CPU affinity and scheduling policy to the calling thread.
    ///
    /// Neither attribute is required for a workload to run, so failures are
    /// reported as warnings and the thread keeps whatever attributes it had.
    ///
    /// # Arguments
    ///
    /// * `cpu` - The CPU to pin to, or `None` to keep the current affinity
    /// * `policy` - The policy to run under at its maximum priority, or `None`
    ///   to keep the current policy
    ///
    /// # Returns
    ///
    /// The attributes that were applied.
    pub fn apply(cpu: Option<usize>, policy: Option<Policy>) -> Applied {
        let mut applied = Applied::default();
        if let Some(cpu) = cpu {
            match Self::set_affinity(cpu) {
                Ok(()) => applied.affinity = true,
                Err(e) => warn!("set cpu affinity failed, cpu {cpu}: {e:#}"),
            }
        }
        if let Some(policy) = policy {
            let result =
                Self::max_priority(policy).and_then(|prio| Self::set_scheduler(policy, prio));
            match result {
                Ok(()) => applied.policy = true,
                Err(e) => warn!("set scheduler failed, policy {}: {e:#}", policy.as_raw()),
            }
        }
        applied
    }

    /// Restrict the calling thread to a single CPU.
    pub fn set_affinity(cpu: usize) -> Result<()> {
        let mut cpus = CpuSet::new();
        cpus.set(cpu)
            .with_context(|| format!("cpu {cpu} is outside the supported range"))?;
        sched_setaffinity(Pid::from_raw(0), &cpus)
            .with_context(|| format!("failed to set affinity to cpu {cpu}"))?;
        Ok(())
    }

    /// Get the highest priority value supported by the given policy.
    pub fn max_priority(policy: Policy) -> Result<i32> {
        let prio = unsafe { libc::sched_get_priority_max(policy.as_raw()) };
        if prio < 0 {
            let err = std::io::Error::last_os_error();
            return Err(anyhow!("failed to query max priority for {policy}: {}", err));
        }
        Ok(prio)
    }

    /// Set the scheduler policy and priority for the calling thread.
    ///
    /// # Arguments
    ///
    /// * `policy` - The scheduler policy to set
    /// * `priority` - The priority to set
    ///
    /// # Returns
    ///
    /// A Result indicating success or failure.
    pub fn set_scheduler(policy: Policy, priority: i32) -> Result<()> {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let rc = unsafe { libc::sched_setscheduler(0, policy.as_raw(), &param) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            return Err(anyhow!("failed to set scheduler policy: {}", err));
        }
        Ok(())
    }

    /// Get the numeric policy of the calling thread.
    pub fn current_policy() -> Result<i32> {
        let policy = unsafe { libc::sched_getscheduler(0) };
        if policy < 0 {
            let err = std::io::Error::last_os_error();
            return Err(anyhow!("failed to query scheduler policy: {}", err));
        }
        Ok(policy)
    }

    /// Get scheduler statistics for the current thread.
    ///
    /// Only meaningful for single-threaded processes, since CPU times are read
    /// from the process-wide `stat` file.
    pub fn get_current_thread_stats() -> Result<SchedStats> {
        let path = "/proc/thread-self/sched";
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scheduler stats file: {path}"))?;

        let mut stats = SchedStats::default();
        stats.parse_sched(&content);

        let proc = Process::myself().with_context(|| "Failed to get process information")?;
        let stat = proc
            .stat()
            .with_context(|| "Failed to read process stat information")?;
        let ticks_per_sec = ticks_per_second();
        stats.system_time = Duration::from_secs_f64(stat.stime as f64 / ticks_per_sec as f64);
        stats.user_time = Duration::from_secs_f64(stat.utime as f64 / ticks_per_sec as f64);
        stats.total_time = stats.system_time + stats.user_time;

        Ok(stats)
    }
}
