use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::thread::{self, ThreadId};

use crate::error::{SyncError, SyncResult};

struct Inner {
    readers: HashMap<ThreadId, u32>,
    writer: Option<ThreadId>,
    writer_recursion: u32,
}

/// A recursive reader/writer lock. Any number of threads may hold the read-only
/// lock at once, but a writer excludes every other reader and writer. A thread
/// already holding read-only locks may upgrade to the write lock: if it is the
/// only reader, the upgrade is immediate; otherwise it releases its read locks,
/// blocks for the write lock like any other waiter, then reacquires the same
/// number of read locks once the write lock is released. Both lock kinds are
/// reentrant per-thread.
pub struct ReaderWriterMutex<T> {
    state: StdMutex<Inner>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ReaderWriterMutex<T> {}
unsafe impl<T: Send> Sync for ReaderWriterMutex<T> {}

impl<T> ReaderWriterMutex<T> {
    pub fn new(data: T) -> Self {
        Self {
            state: StdMutex::new(Inner { readers: HashMap::new(), writer: None, writer_recursion: 0 }),
            cond: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        self.lock_read_only();
        ReadGuard { mutex: self }
    }

    pub fn write(&self) -> WriteGuard<'_, T> {
        self.lock_read_write();
        WriteGuard { mutex: self }
    }

    /// Upgrades a held read lock to the write lock without the release-and-reacquire
    /// dance: fails fast with [`SyncError::WouldBlock`] if any other thread also holds
    /// a read lock, and with [`SyncError::BadObject`] if the calling thread holds no
    /// read lock at all.
    pub fn try_upgrade(&self) -> SyncResult<WriteGuard<'_, T>> {
        let tid = thread::current().id();
        let mut g = self.state.lock().unwrap();
        if g.writer == Some(tid) {
            g.writer_recursion += 1;
            return Ok(WriteGuard { mutex: self });
        }
        let my_reads = g.readers.get(&tid).copied().unwrap_or(0);
        if my_reads == 0 {
            return Err(SyncError::BadObject);
        }
        if g.readers.len() > 1 {
            return Err(SyncError::WouldBlock);
        }
        g.writer = Some(tid);
        g.writer_recursion = 1;
        Ok(WriteGuard { mutex: self })
    }

    fn lock_read_only(&self) {
        let tid = thread::current().id();
        let mut g = self.state.lock().unwrap();
        loop {
            if g.writer == Some(tid) || g.writer.is_none() {
                *g.readers.entry(tid).or_insert(0) += 1;
                return;
            }
            g = self.cond.wait(g).unwrap();
        }
    }

    fn unlock_read_only(&self) {
        let tid = thread::current().id();
        let mut g = self.state.lock().unwrap();
        if let Some(count) = g.readers.get_mut(&tid) {
            *count -= 1;
            if *count == 0 {
                g.readers.remove(&tid);
            }
        }
        if g.writer.is_none() {
            self.cond.notify_all();
        }
    }

    fn lock_read_write(&self) {
        let tid = thread::current().id();
        let mut g = self.state.lock().unwrap();
        if g.writer == Some(tid) {
            g.writer_recursion += 1;
            return;
        }
        let my_reads = g.readers.get(&tid).copied().unwrap_or(0);
        if my_reads > 0 && g.readers.len() == 1 {
            // sole reader: no one else can be holding a conflicting lock, so we can
            // become the writer without releasing anything first.
            g.writer = Some(tid);
            g.writer_recursion = 1;
            return;
        }
        if my_reads > 0 {
            // other readers are active: release ours, wait our turn like any other
            // writer, then restore the same number of read locks on top.
            tracing::trace!(?tid, my_reads, "read-to-write upgrade contended, releasing reads first");
            g.readers.remove(&tid);
            drop(g);
            self.cond.notify_all();
            self.block_until_writer(tid);
            for _ in 0..my_reads {
                self.lock_read_only();
            }
            return;
        }
        self.block_until_writer_locked(g, tid);
    }

    fn unlock_read_write(&self) {
        let mut g = self.state.lock().unwrap();
        g.writer_recursion -= 1;
        if g.writer_recursion == 0 {
            g.writer = None;
            self.cond.notify_all();
        }
    }

    fn block_until_writer(&self, tid: ThreadId) {
        let g = self.state.lock().unwrap();
        self.block_until_writer_locked(g, tid);
    }

    fn block_until_writer_locked(&self, mut g: StdMutexGuard<'_, Inner>, tid: ThreadId) {
        loop {
            if g.writer.is_none() && g.readers.is_empty() {
                g.writer = Some(tid);
                g.writer_recursion = 1;
                return;
            }
            g = self.cond.wait(g).unwrap();
        }
    }
}

impl<T: Default> Default for ReaderWriterMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct ReadGuard<'a, T> {
    mutex: &'a ReaderWriterMutex<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock_read_only();
    }
}

pub struct WriteGuard<'a, T> {
    mutex: &'a ReaderWriterMutex<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock_read_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn multiple_readers_proceed_concurrently() {
        let rw = Arc::new(ReaderWriterMutex::new(5));
        let a = rw.read();
        let b = rw.read();
        assert_eq!(*a, 5);
        assert_eq!(*b, 5);
    }

    #[test]
    fn sole_reader_upgrades_without_deadlock() {
        let rw = ReaderWriterMutex::new(0);
        let read = rw.read();
        assert_eq!(*read, 0);
        let mut write = rw.write();
        *write += 1;
        drop(write);
        drop(read);
        assert_eq!(*rw.read(), 1);
    }

    #[test]
    fn recursive_write_lock_on_same_thread_does_not_deadlock() {
        let rw = ReaderWriterMutex::new(0);
        let mut outer = rw.write();
        {
            let mut inner = rw.write();
            *inner += 1;
        }
        *outer += 1;
        assert_eq!(*outer, 2);
    }

    #[test]
    fn try_upgrade_fails_fast_when_other_readers_present() {
        let rw = Arc::new(ReaderWriterMutex::new(0));
        let mine = rw.read();
        let other = Arc::clone(&rw);
        let handle = std::thread::spawn(move || {
            let _read = other.read();
            std::thread::sleep(std::time::Duration::from_millis(30));
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(rw.try_upgrade().unwrap_err(), SyncError::WouldBlock);
        drop(mine);
        handle.join().unwrap();
    }

    #[test]
    fn try_upgrade_fails_bad_object_without_a_read_lock() {
        let rw = ReaderWriterMutex::new(0);
        assert_eq!(rw.try_upgrade().unwrap_err(), SyncError::BadObject);
    }

    #[test]
    fn try_upgrade_succeeds_immediately_for_sole_reader() {
        let rw = ReaderWriterMutex::new(0);
        let read = rw.read();
        let mut write = rw.try_upgrade().unwrap();
        *write += 1;
        drop(write);
        drop(read);
        assert_eq!(*rw.read(), 1);
    }

    #[test]
    fn writer_excludes_other_readers() {
        let rw = Arc::new(ReaderWriterMutex::new(0));
        let writer = rw.write();
        let other = Arc::clone(&rw);
        let handle = std::thread::spawn(move || {
            let _read = other.read();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!handle.is_finished());
        drop(writer);
        handle.join().unwrap();
    }
}
