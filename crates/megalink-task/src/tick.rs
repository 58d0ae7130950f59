/// Source of the periodic tick driving the scheduler and all timeouts.
///
/// On hardware this blocks until the next display refresh interrupt. The
/// scheduler never generates ticks itself.
pub trait TickSource {
    /// Block until the next periodic tick.
    fn wait(&mut self);
}

/// A tick source that never blocks and counts elapsed ticks.
///
/// Used by tests and demos, where simulated time should run as fast as the
/// host allows while timeout arithmetic stays exact.
#[derive(Debug, Default)]
pub struct InstantTicks {
    elapsed: u64,
}

impl InstantTicks {
    /// Total ticks waited on so far.
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }
}

impl TickSource for InstantTicks {
    fn wait(&mut self) {
        self.elapsed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_ticks_count() {
        let mut ticks = InstantTicks::default();
        for _ in 0..5 {
            ticks.wait();
        }
        assert_eq!(ticks.elapsed(), 5);
    }
}
