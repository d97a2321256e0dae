mod error;
mod mutex;
mod rw_mutex;
mod wait_condition;

pub use error::{SyncError, SyncResult};
pub use mutex::{Mutex, MutexGuard};
pub use rw_mutex::{ReadGuard, ReaderWriterMutex, WriteGuard};
pub use wait_condition::WaitCondition;
