use std::cell::Cell;
use std::rc::Rc;

use tracing::trace;

use crate::tick::TickSource;

/// Pend timeout meaning "wait until posted, however long that takes".
pub const FOREVER: u16 = u16::MAX;

/// Why a pending supervisor resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The user task posted.
    Posted,
    /// The tick countdown elapsed first.
    TimedOut,
}

/// The user task: one invocation is one cooperative slice, running from the
/// handoff until it returns at the next tick boundary.
pub type UserTask = Box<dyn FnMut(&TaskHandle)>;

/// Handle given to the user task so it can release a pending supervisor.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    post: Rc<Cell<Option<bool>>>,
}

impl TaskHandle {
    /// Release the pending supervisor.
    ///
    /// With `immediate` set the supervisor resumes as soon as the current
    /// slice returns; otherwise the switch is deferred to the next tick.
    pub fn post(&self, immediate: bool) {
        self.post.set(Some(immediate));
    }

    fn take(&self) -> Option<bool> {
        self.post.take()
    }

    fn clear(&self) {
        self.post.set(None);
    }
}

/// Cooperative scheduler for the supervisor and user contexts.
///
/// Single-CPU, non-preemptive: the supervisor runs until it yields or pends,
/// the user task runs one slice per tick, and the periodic tick is the only
/// thing that forces the supervisor to resume.
pub struct Scheduler<T: TickSource> {
    ticks: T,
    user: Option<UserTask>,
    handle: TaskHandle,
}

impl<T: TickSource> Scheduler<T> {
    /// Create a scheduler driven by the given tick source. No user task is
    /// installed.
    pub fn new(ticks: T) -> Self {
        Self {
            ticks,
            user: None,
            handle: TaskHandle::default(),
        }
    }

    /// Install or remove the user task. Any stale post is discarded.
    pub fn user_set(&mut self, task: Option<UserTask>) {
        self.handle.clear();
        self.user = task;
    }

    /// Handle the user task can post through. Mostly useful for tests;
    /// the task already receives it on every slice.
    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    /// Borrow the tick source.
    pub fn ticks(&self) -> &T {
        &self.ticks
    }

    /// Mutably borrow the tick source.
    pub fn ticks_mut(&mut self) -> &mut T {
        &mut self.ticks
    }

    fn run_user_slice(&mut self) {
        if let Some(task) = self.user.as_mut() {
            task(&self.handle);
        }
    }

    /// Hand control to the user task for one slice, then wait for the next
    /// tick.
    pub fn user_yield(&mut self) {
        self.run_user_slice();
        self.ticks.wait();
    }

    /// Yield for `ticks` consecutive ticks.
    pub fn sleep(&mut self, ticks: u16) {
        for _ in 0..ticks {
            self.user_yield();
        }
    }

    /// Block the supervisor, running the user task, until the user task
    /// posts or `timeout` ticks elapse.
    ///
    /// The countdown decrements once per tick; [`FOREVER`] never times out.
    /// An immediate post resumes the supervisor before the tick boundary, a
    /// deferred post at the next one.
    pub fn super_pend(&mut self, timeout: u16) -> Wake {
        let mut remaining = timeout;
        loop {
            self.run_user_slice();
            match self.handle.take() {
                Some(true) => {
                    trace!("supervisor resumed by immediate post");
                    return Wake::Posted;
                }
                Some(false) => {
                    // Deferred post: honor it, but not before the tick.
                    self.ticks.wait();
                    trace!("supervisor resumed by deferred post");
                    return Wake::Posted;
                }
                None => {}
            }
            self.ticks.wait();
            if remaining != FOREVER {
                remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    trace!(timeout, "pend timed out");
                    return Wake::TimedOut;
                }
            }
        }
    }
}
