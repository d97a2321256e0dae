mod deadline;
mod duration;
mod global_clock;
mod nanos;
mod repeater;

pub use deadline::Deadline;
pub use duration::Duration;
pub use global_clock::{Clock, OurClockForNanos, global_clock, global_clock_not_mocked, init_global_with_mock};
pub use nanos::Nanos;
pub use repeater::Repeater;
