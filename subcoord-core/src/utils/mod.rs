pub mod clock;
pub mod keyed_lock;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use keyed_lock::{KeyedMutex, KeyedMutexGuard};
pub use retry::{Attempt, RetryError, RetryPolicy};
