//! Cooperative two-context scheduler synchronized to a periodic tick.
//!
//! Exactly one of two logical contexts runs at a time: the *supervisor*
//! (the default caller flow) and an optional *user* task. There is no
//! preemption and no parallelism; handoff is explicit. The tick is delivered
//! by the host environment — on console hardware one per display refresh
//! (~50/60 Hz) — through a [`TickSource`].
//!
//! This is what gives asynchronous, poll-completed I/O a blocking-call
//! programming model: a caller pends, and the background task (or a timeout)
//! releases it.

pub mod scheduler;
pub mod tick;

pub use scheduler::{Scheduler, TaskHandle, UserTask, Wake, FOREVER};
pub use tick::{InstantTicks, TickSource};
