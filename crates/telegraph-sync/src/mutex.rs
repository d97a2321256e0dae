use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex as StdMutex};
use std::thread::{self, ThreadId};

struct State {
    owner: Option<ThreadId>,
    recursion: u32,
}

/// A recursive mutex: the thread that already holds the lock may lock it again
/// without blocking on itself. Matches the reentrancy MUSCLE's `Mutex` class gives
/// its callers, since a lot of the call graph above it takes the lock more than
/// once per stack.
pub struct Mutex<T> {
    state: StdMutex<State>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(data: T) -> Self {
        Self {
            state: StdMutex::new(State { owner: None, recursion: 0 }),
            cond: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        #[cfg(feature = "lock-tracing")]
        let caller = std::panic::Location::caller();
        let this_thread = thread::current().id();
        let mut state = self.state.lock().unwrap();
        loop {
            match state.owner {
                Some(id) if id == this_thread => {
                    state.recursion += 1;
                    break;
                }
                None => {
                    state.owner = Some(this_thread);
                    state.recursion = 1;
                    break;
                }
                Some(_) => {
                    state = self.cond.wait(state).unwrap();
                }
            }
        }
        #[cfg(feature = "lock-tracing")]
        tracing::trace!(?this_thread, file = caller.file(), line = caller.line(), "mutex locked");
        MutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let this_thread = thread::current().id();
        let mut state = self.state.lock().unwrap();
        match state.owner {
            Some(id) if id == this_thread => {
                state.recursion += 1;
                Some(MutexGuard { mutex: self })
            }
            None => {
                state.owner = Some(this_thread);
                state.recursion = 1;
                Some(MutexGuard { mutex: self })
            }
            Some(_) => None,
        }
    }

    /// True if the calling thread already holds this lock.
    pub fn is_locked_by_current_thread(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.owner == Some(thread::current().id())
    }

    #[track_caller]
    fn unlock(&self) {
        #[cfg(feature = "lock-tracing")]
        let caller = std::panic::Location::caller();
        let mut state = self.state.lock().unwrap();
        state.recursion -= 1;
        if state.recursion == 0 {
            state.owner = None;
            self.cond.notify_one();
        }
        #[cfg(feature = "lock-tracing")]
        tracing::trace!(file = caller.file(), line = caller.line(), "mutex unlocked");
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
