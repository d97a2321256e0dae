mod error;
mod thread;
mod wakeup;

pub use error::{ThreadError, ThreadResult};
pub use thread::{Incoming, InternalThreadContext, Thread, ThreadBody};
pub use wakeup::{SocketPairWakeup, WaitConditionWakeup, WakeupChannel};
