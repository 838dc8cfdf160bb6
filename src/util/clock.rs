//! Clock and time arithmetic utilities.

use std::ops::Add;
use std::ops::Sub;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use nix::sys::time::TimeSpec;
use nix::time::ClockId;
use nix::time::clock_gettime;

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const MILLIS_PER_SEC: u32 = 1_000;

/// A point or span of time as whole seconds plus nanoseconds.
///
/// Values produced by this module are normalized, meaning `0 <= nanos < 1e9`.
/// The seconds field may be negative after subtracting a later value from an
/// earlier one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timespec {
    secs: i64,
    nanos: i64,
}

impl Timespec {
    /// The zero value.
    pub const ZERO: Timespec = Timespec { secs: 0, nanos: 0 };

    /// Create a value from raw parts, carrying any excess nanoseconds.
    pub fn new(secs: i64, nanos: i64) -> Self {
        Self { secs, nanos }.normalize()
    }

    /// Convert a millisecond count.
    pub fn from_millis(ms: u32) -> Self {
        Self {
            secs: i64::from(ms / MILLIS_PER_SEC),
            nanos: i64::from(ms % MILLIS_PER_SEC) * NANOS_PER_MILLI,
        }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> i64 {
        self.nanos
    }

    /// Returns true iff `self` is strictly later than `other`.
    pub fn is_after(&self, other: &Timespec) -> bool {
        self.secs > other.secs || (self.secs == other.secs && self.nanos > other.nanos)
    }

    /// Convert to a `Duration`, or `None` if the value is negative.
    pub fn to_duration(&self) -> Option<Duration> {
        if self.secs < 0 {
            return None;
        }
        Some(Duration::new(self.secs as u64, self.nanos as u32))
    }

    fn normalize(self) -> Self {
        // Any number of whole seconds may be pending in `nanos`.
        Self {
            secs: self.secs + self.nanos.div_euclid(NANOS_PER_SEC),
            nanos: self.nanos.rem_euclid(NANOS_PER_SEC),
        }
    }
}

impl Add for Timespec {
    type Output = Timespec;

    fn add(self, rhs: Timespec) -> Timespec {
        Timespec {
            secs: self.secs + rhs.secs,
            nanos: self.nanos + rhs.nanos,
        }
        .normalize()
    }
}

impl Sub for Timespec {
    type Output = Timespec;

    fn sub(self, rhs: Timespec) -> Timespec {
        if self.nanos < rhs.nanos {
            Timespec {
                secs: self.secs - rhs.secs - 1,
                nanos: self.nanos + NANOS_PER_SEC - rhs.nanos,
            }
        } else {
            Timespec {
                secs: self.secs - rhs.secs,
                nanos: self.nanos - rhs.nanos,
            }
        }
    }
}

impl From<TimeSpec> for Timespec {
    fn from(ts: TimeSpec) -> Self {
        Timespec::new(i64::from(ts.tv_sec()), i64::from(ts.tv_nsec()))
    }
}

/// The CPU time consumed by the calling thread.
///
/// This clock only advances while the thread is running, so it measures work
/// done rather than wall time elapsed.
pub struct ThreadCpuClock;

impl ThreadCpuClock {
    /// Sample the clock.
    ///
    /// # Returns
    ///
    /// The CPU time consumed by the calling thread so far.
    pub fn now() -> Result<Timespec> {
        let ts = clock_gettime(ClockId::CLOCK_THREAD_CPUTIME_ID)
            .with_context(|| "unable to read thread CPU clock")?;
        Ok(ts.into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use more_asserts::assert_ge;
    use more_asserts::assert_lt;

    use super::*;

    const SAMPLES: [u32; 9] = [0, 1, 999, 1_000, 1_001, 1_500, 59_999, 86_400_000, u32::MAX];

    #[test]
    fn test_from_millis() {
        assert_eq!(Timespec::from_millis(0), Timespec::ZERO);
        let ts = Timespec::from_millis(1_500);
        assert_eq!(ts.secs(), 1);
        assert_eq!(ts.nanos(), 500_000_000);
        let ts = Timespec::from_millis(999);
        assert_eq!(ts.secs(), 0);
        assert_eq!(ts.nanos(), 999_000_000);
    }

    #[test]
    fn test_round_trip() {
        for d1 in SAMPLES {
            for d2 in SAMPLES {
                let a = Timespec::from_millis(d1);
                let b = Timespec::from_millis(d2);
                assert_eq!((a + b) - b, a, "d1={d1} d2={d2}");
            }
        }
    }

    #[test]
    fn test_ordering() {
        for d1 in SAMPLES {
            let a = Timespec::from_millis(d1);
            assert!(!a.is_after(&a));
            for d2 in SAMPLES.iter().copied().filter(|&d2| d2 > d1) {
                let b = Timespec::from_millis(d2);
                assert!(b.is_after(&a), "{d2} should be after {d1}");
                assert!(!a.is_after(&b), "{d1} should not be after {d2}");
            }
        }
    }

    #[test]
    fn test_multi_carry() {
        // Unnormalized inputs carry several seconds at once.
        let ts = Timespec::new(1, 3 * NANOS_PER_SEC + 7);
        assert_eq!(ts, Timespec::new(4, 7));

        let step = Timespec::from_millis(999);
        let mut total = Timespec::ZERO;
        for _ in 0..10_000 {
            total = total + step;
            assert_ge!(total.nanos(), 0);
            assert_lt!(total.nanos(), NANOS_PER_SEC);
        }
        assert_eq!(total, Timespec::new(9_990, 0));
    }

    #[test]
    fn test_sub_borrow() {
        let a = Timespec::new(2, 100);
        let b = Timespec::new(1, 200);
        assert_eq!(a - b, Timespec::new(0, NANOS_PER_SEC - 100));

        // Earlier minus later goes negative in the seconds field.
        let diff = b - a;
        assert_eq!(diff.secs(), -1);
        assert!(diff.to_duration().is_none());
    }

    #[test]
    fn test_from_timespec() {
        let ts = Timespec::from(TimeSpec::new(3, 250_000_000));
        assert_eq!(ts.secs(), 3);
        assert_eq!(ts.nanos(), 250_000_000);
    }

    #[test]
    fn test_thread_clock_advances() -> Result<()> {
        let start = ThreadCpuClock::now()?;
        let wall = Instant::now();
        while wall.elapsed() < Duration::from_millis(20) {
            std::hint::spin_loop();
        }
        let end = ThreadCpuClock::now()?;
        assert!(end.is_after(&start));
        Ok(())
    }

    #[test]
    fn test_thread_clock_ignores_sleep() -> Result<()> {
        let start = ThreadCpuClock::now()?;
        std::thread::sleep(Duration::from_millis(50));
        let spent = (ThreadCpuClock::now()? - start).to_duration().unwrap();
        assert_lt!(spent, Duration::from_millis(20));
        Ok(())
    }
}
