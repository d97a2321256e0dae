use std::ops::{Add, Sub};

use crate::{Duration, global_clock::global_clock_not_mocked};

/// An absolute point on the monotonic clock, expressed in nanoseconds since an
/// unspecified but fixed epoch (the process start, on most platforms). Used to express
/// deadlines and timeouts to blocking calls without exposing callers to wall-clock
/// adjustments.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq)]
#[repr(C)]
pub struct Deadline(pub u64);

impl Deadline {
    /// A deadline so far in the future that it is effectively "wait forever".
    pub const NEVER: Self = Self(u64::MAX);
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn now() -> Self {
        Deadline(global_clock_not_mocked().raw())
    }

    /// A deadline `d` from now.
    #[inline]
    pub fn after(d: Duration) -> Self {
        Self::now() + d
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        Self::now().saturating_sub(*self)
    }

    #[inline]
    pub fn is_past(&self) -> bool {
        *self != Self::NEVER && Self::now() >= *self
    }

    #[inline]
    pub fn saturating_sub(&self, other: Deadline) -> Duration {
        Duration(self.0.saturating_sub(other.0))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<Duration> for Deadline {
    type Output = Deadline;
    fn add(self, rhs: Duration) -> Self::Output {
        Deadline(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Duration> for Deadline {
    type Output = Deadline;
    fn sub(self, rhs: Duration) -> Self::Output {
        Deadline(self.0.saturating_sub(rhs.0))
    }
}

impl Sub for Deadline {
    type Output = Duration;
    fn sub(self, rhs: Deadline) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_always_in_the_future() {
        assert!(!Deadline::NEVER.is_past());
    }

    #[test]
    fn zero_is_always_past() {
        assert!(Deadline::ZERO.is_past());
    }

    #[test]
    fn after_orders_correctly() {
        let a = Deadline::now();
        let b = a + Duration::from_millis(5);
        assert!(b > a);
    }
}
