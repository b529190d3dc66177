//! Background processors.
//!
//! - `ExpirySweeper`: pages through lapsed subscriptions, submits `ExpiryTick`
//! - `PaymentPoller`: asks the processor about unconfirmed payments, submits
//!   `ConfirmSuccess`/`ConfirmFailure`
//! - `PeriodicTask`: runs either of them on its configured interval
//!
//! The intake retry worker lives next to the intake itself.

pub mod expiry_sweeper;
pub mod payment_poller;
pub mod scheduler;

pub use expiry_sweeper::{ExpirySweeper, SweepError, SweepReport};
pub use payment_poller::{PaymentPoller, PollError, PollReport};
pub use scheduler::{Cadence, PeriodicJob, PeriodicTask};
