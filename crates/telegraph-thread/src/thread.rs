use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use telegraph_core::Message;
use telegraph_timing::Deadline;
use telegraph_utils::{ThreadPriority, thread_boot};

use crate::error::{ThreadError, ThreadResult};
use crate::wakeup::{WaitConditionWakeup, WakeupChannel};

/// What the internal thread pulled off its inbox: a real message, the request
/// to shut down (the `None`-message sentinel), or nothing before the deadline.
pub enum Incoming {
    Message(Message),
    Shutdown,
    TimedOut,
}

struct Queue {
    items: Mutex<VecDeque<Option<Message>>>,
    wakeup: Arc<dyn WakeupChannel>,
}

impl Queue {
    fn new(wakeup: Arc<dyn WakeupChannel>) -> Self {
        Self { items: Mutex::new(VecDeque::new()), wakeup }
    }

    fn push(&self, item: Option<Message>) {
        self.items.lock().unwrap().push_back(item);
        self.wakeup.signal();
    }

    fn recv(&self, deadline: Deadline) -> Incoming {
        loop {
            if let Some(item) = self.items.lock().unwrap().pop_front() {
                return match item {
                    Some(msg) => Incoming::Message(msg),
                    None => Incoming::Shutdown,
                };
            }
            if deadline == Deadline::NEVER {
                self.wakeup.wait(Deadline::NEVER);
                continue;
            }
            let now = Deadline::now();
            if now >= deadline {
                return Incoming::TimedOut;
            }
            if !self.wakeup.wait(deadline) {
                return Incoming::TimedOut;
            }
        }
    }

    fn try_pop(&self) -> Option<Message> {
        loop {
            match self.items.lock().unwrap().pop_front() {
                Some(Some(msg)) => return Some(msg),
                Some(None) => continue, // a shutdown sentinel belongs on the inbox, not here
                None => return None,
            }
        }
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

/// Handed to the running [`ThreadBody`] so it can pull inbound messages and
/// push replies without touching the owner-side handle directly.
pub struct InternalThreadContext {
    inbox: Arc<Queue>,
    outbox: Arc<Queue>,
}

impl InternalThreadContext {
    pub fn recv(&self, deadline: Deadline) -> Incoming {
        self.inbox.recv(deadline)
    }

    pub fn reply(&self, msg: Message) {
        self.outbox.push(Some(msg));
    }
}

/// Implements the body that runs on a [`Thread`]'s internal OS thread. The
/// default shutdown path is simply returning from `run` once `ctx.recv`
/// reports [`Incoming::Shutdown`].
pub trait ThreadBody: Send + 'static {
    fn run(&mut self, ctx: &InternalThreadContext);
}

/// An OS thread with a pair of Message queues connecting it to its owner:
/// `send_message_to_internal_thread` feeds the inbox, and
/// `get_next_reply_from_internal_thread` drains the outbox. Each direction is
/// woken by its own [`WakeupChannel`], so callers that want to fold thread
/// wakeups into a `poll()` loop can swap in a [`crate::SocketPairWakeup`]
/// instead of the default wait-condition.
pub struct Thread {
    inbox: Arc<Queue>,
    outbox: Arc<Queue>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    priority: ThreadPriority,
}

impl Thread {
    pub fn new() -> Self {
        Self::with_wakeups(
            Arc::new(WaitConditionWakeup::new()),
            Arc::new(WaitConditionWakeup::new()),
        )
    }

    pub fn with_wakeups(inbox_wakeup: Arc<dyn WakeupChannel>, outbox_wakeup: Arc<dyn WakeupChannel>) -> Self {
        Self {
            inbox: Arc::new(Queue::new(inbox_wakeup)),
            outbox: Arc::new(Queue::new(outbox_wakeup)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            priority: ThreadPriority::OSDefault,
        }
    }

    pub fn with_priority(mut self, priority: ThreadPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_internal_thread_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn start_internal_thread(&mut self, mut body: impl ThreadBody) -> ThreadResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ThreadError::BadObject("internal thread already running".into()));
        }
        let inbox = Arc::clone(&self.inbox);
        let outbox = Arc::clone(&self.outbox);
        let running = Arc::clone(&self.running);
        let priority = self.priority;
        let handle = std::thread::Builder::new()
            .name("telegraph-thread".into())
            .spawn(move || {
                thread_boot(None, priority);
                let ctx = InternalThreadContext { inbox, outbox };
                body.run(&ctx);
                running.store(false, Ordering::Release);
            })
            .map_err(ThreadError::Io)?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn send_message_to_internal_thread(&self, msg: Message) -> ThreadResult<()> {
        if !self.is_internal_thread_running() {
            return Err(ThreadError::ShuttingDown);
        }
        self.inbox.push(Some(msg));
        Ok(())
    }

    pub fn get_next_reply_from_internal_thread(&self, deadline: Deadline) -> ThreadResult<Message> {
        match self.outbox.recv(deadline) {
            Incoming::Message(msg) => Ok(msg),
            Incoming::Shutdown => Err(ThreadError::ShuttingDown),
            Incoming::TimedOut => Err(ThreadError::TimedOut),
        }
    }

    pub fn try_get_next_reply(&self) -> Option<Message> {
        self.outbox.try_pop()
    }

    pub fn pending_reply_count(&self) -> usize {
        self.outbox.len()
    }

    /// Sends the shutdown sentinel and, if `wait` is true, joins the thread.
    pub fn shutdown_internal_thread(&mut self, wait: bool) -> ThreadResult<()> {
        if self.handle.is_some() {
            self.inbox.push(None);
        }
        if wait {
            self.wait_for_internal_thread_to_exit()?;
        }
        Ok(())
    }

    pub fn wait_for_internal_thread_to_exit(&mut self) -> ThreadResult<()> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ThreadError::BadObject("internal thread panicked".into())),
            None => Err(ThreadError::BadObject("internal thread wasn't running".into())),
        }
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            tracing::warn!("Thread dropped while internal thread was still running; shutting it down");
            let _ = self.shutdown_internal_thread(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telegraph_core::Message;

    struct Echo;
    impl ThreadBody for Echo {
        fn run(&mut self, ctx: &InternalThreadContext) {
            loop {
                match ctx.recv(Deadline::NEVER) {
                    Incoming::Message(msg) => ctx.reply(msg),
                    Incoming::Shutdown | Incoming::TimedOut => break,
                }
            }
        }
    }

    #[test]
    fn echoes_messages_in_order() {
        let mut thread = Thread::new();
        thread.start_internal_thread(Echo).unwrap();
        for what in 0..1000u32 {
            thread.send_message_to_internal_thread(Message::new(what)).unwrap();
        }
        for expected in 0..1000u32 {
            let reply = thread.get_next_reply_from_internal_thread(Deadline::NEVER).unwrap();
            assert_eq!(reply.what(), expected);
        }
        thread.shutdown_internal_thread(true).unwrap();
        assert!(!thread.is_internal_thread_running());
    }

    #[test]
    fn reply_wait_times_out_with_no_messages() {
        let mut thread = Thread::new();
        thread.start_internal_thread(Echo).unwrap();
        let deadline = Deadline::after(telegraph_timing::Duration::from_millis(20));
        assert!(matches!(thread.get_next_reply_from_internal_thread(deadline), Err(ThreadError::TimedOut)));
        thread.shutdown_internal_thread(true).unwrap();
    }

    #[test]
    fn double_start_is_rejected() {
        let mut thread = Thread::new();
        thread.start_internal_thread(Echo).unwrap();
        assert!(matches!(thread.start_internal_thread(Echo), Err(ThreadError::BadObject(_))));
        thread.shutdown_internal_thread(true).unwrap();
    }
}
