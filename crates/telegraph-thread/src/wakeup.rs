use telegraph_sync::WaitCondition;
use telegraph_timing::Deadline;

/// Notifies a waiting side that a queue it cares about may have changed. One
/// instance guards one direction of one [`crate::Thread`]'s message traffic.
///
/// The socket-pair flavor is for callers that want to fold the wakeup into a
/// `poll()`/`select()` loop alongside real sockets; the wait-condition flavor
/// costs less but can only be waited on directly.
pub trait WakeupChannel: Send + Sync {
    fn signal(&self);

    /// Blocks until signaled or `deadline` passes. Returns `true` if signaled.
    fn wait(&self, deadline: Deadline) -> bool;
}

/// A wakeup channel backed by an OS-level socket pair, so its readable end can
/// be folded into a `poll()` loop that's also watching real I/O sockets.
pub struct SocketPairWakeup {
    read_fd: libc::c_int,
    write_fd: libc::c_int,
}

impl SocketPairWakeup {
    pub fn new() -> std::io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { read_fd: fds[0], write_fd: fds[1] })
    }

    /// The file descriptor a caller's own `poll()`/`select()` loop can watch
    /// for readability.
    pub fn readable_fd(&self) -> libc::c_int {
        self.read_fd
    }
}

impl WakeupChannel for SocketPairWakeup {
    fn signal(&self) {
        let byte: u8 = 1;
        unsafe {
            libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }

    fn wait(&self, deadline: Deadline) -> bool {
        let timeout_ms = if deadline == Deadline::NEVER {
            -1
        } else {
            let now = Deadline::now();
            if now >= deadline {
                0
            } else {
                deadline.saturating_sub(now).as_millis() as libc::c_int
            }
        };
        let mut pollfd = libc::pollfd { fd: self.read_fd, events: libc::POLLIN, revents: 0 };
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc <= 0 {
            return false;
        }
        let mut drain = [0u8; 64];
        unsafe {
            libc::read(self.read_fd, drain.as_mut_ptr() as *mut libc::c_void, drain.len());
        }
        true
    }
}

impl Drop for SocketPairWakeup {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

unsafe impl Send for SocketPairWakeup {}
unsafe impl Sync for SocketPairWakeup {}

/// A wakeup channel backed by an edge-buffered [`WaitCondition`]. Cheaper than
/// a socket pair but can't be folded into a `poll()` loop.
pub struct WaitConditionWakeup(WaitCondition);

impl WaitConditionWakeup {
    pub fn new() -> Self {
        Self(WaitCondition::new())
    }
}

impl Default for WaitConditionWakeup {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeupChannel for WaitConditionWakeup {
    fn signal(&self) {
        self.0.notify(1);
    }

    fn wait(&self, deadline: Deadline) -> bool {
        self.0.wait(deadline).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use telegraph_timing::Duration;

    #[test]
    fn socket_pair_wakes_waiter() {
        let wc = Arc::new(SocketPairWakeup::new().unwrap());
        let other = Arc::clone(&wc);
        let handle = thread::spawn(move || other.wait(Deadline::after(Duration::from_secs(2))));
        thread::sleep(std::time::Duration::from_millis(20));
        wc.signal();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn socket_pair_times_out() {
        let wc = SocketPairWakeup::new().unwrap();
        assert!(!wc.wait(Deadline::after(Duration::from_millis(10))));
    }

    #[test]
    fn wait_condition_wakeup_round_trips() {
        let wc = WaitConditionWakeup::new();
        wc.signal();
        assert!(wc.wait(Deadline::NEVER));
    }
}
