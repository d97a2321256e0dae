use std::sync::{Condvar, Mutex as StdMutex};

use telegraph_timing::Deadline;

/// An edge-buffered condition: `notify()` is never lost even if no thread is
/// waiting yet. It increments a pending count instead of just waking a waiter,
/// so a `notify()` that lands before the matching `wait()` is still observed.
pub struct WaitCondition {
    pending: StdMutex<u64>,
    cond: Condvar,
}

impl WaitCondition {
    pub fn new() -> Self {
        Self { pending: StdMutex::new(0), cond: Condvar::new() }
    }

    /// Buffers `increase_by` notifications and wakes one waiter.
    pub fn notify(&self, increase_by: u64) {
        let mut pending = self.pending.lock().unwrap();
        *pending = pending.saturating_add(increase_by);
        self.cond.notify_one();
    }

    /// Waits until a pending notification is available or `deadline` passes,
    /// returning the number of notifications consumed. Returns `None` on
    /// timeout. A notification already pending is consumed immediately without
    /// blocking, even if it arrived before this call.
    pub fn wait(&self, deadline: Deadline) -> Option<u64> {
        let mut pending = self.pending.lock().unwrap();
        loop {
            if *pending > 0 {
                let count = *pending;
                *pending = 0;
                return Some(count);
            }
            if deadline == Deadline::NEVER {
                pending = self.cond.wait(pending).unwrap();
                continue;
            }
            let now = Deadline::now();
            if now.is_past() || now >= deadline {
                return None;
            }
            let timeout = deadline.saturating_sub(now).into();
            let (guard, result) = self.cond.wait_timeout(pending, timeout).unwrap();
            pending = guard;
            if result.timed_out() && *pending == 0 {
                return None;
            }
        }
    }

    /// True if a notification is already pending, without consuming it.
    pub fn is_pending(&self) -> bool {
        *self.pending.lock().unwrap() > 0
    }
}

impl Default for WaitCondition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use telegraph_timing::Duration;

    #[test]
    fn notify_before_wait_is_not_lost() {
        let wc = WaitCondition::new();
        wc.notify(1);
        assert!(wc.is_pending());
        assert_eq!(wc.wait(Deadline::NEVER), Some(1));
    }

    #[test]
    fn wait_times_out_without_notification() {
        let wc = WaitCondition::new();
        let deadline = Deadline::after(Duration::from_millis(10));
        assert_eq!(wc.wait(deadline), None);
    }

    #[test]
    fn notify_wakes_a_blocked_waiter() {
        let wc = Arc::new(WaitCondition::new());
        let other = Arc::clone(&wc);
        let handle = thread::spawn(move || other.wait(Deadline::NEVER));
        thread::sleep(std::time::Duration::from_millis(20));
        wc.notify(1);
        assert_eq!(handle.join().unwrap(), Some(1));
    }

    #[test]
    fn repeated_notify_accumulates_into_one_wait() {
        let wc = WaitCondition::new();
        wc.notify(1);
        wc.notify(2);
        assert_eq!(wc.wait(Deadline::NEVER), Some(3));
    }
}
