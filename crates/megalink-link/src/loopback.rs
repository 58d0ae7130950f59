use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

use crate::error::{LinkError, Result};
use crate::traits::ByteLink;

/// Configuration for a loopback link pair.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Capacity of each direction's queue. Doubles as the peer buffer
    /// size reported by `buffer_len()`.
    pub capacity: usize,
    /// Burst size reported by `tx_burst_len()`.
    pub tx_burst: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            capacity: 1460,
            tx_burst: 32,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    a_to_b: VecDeque<u8>,
    b_to_a: VecDeque<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// In-memory duplex byte link.
///
/// [`LoopbackLink::pair`] returns two connected endpoints; bytes written on
/// one become readable on the other. Single-threaded by design (shared state
/// behind `Rc<RefCell<_>>`), matching the cooperative execution model of the
/// rest of the stack. Dropping one endpoint makes the other report absent.
#[derive(Debug)]
pub struct LoopbackLink {
    shared: Rc<RefCell<Shared>>,
    side: Side,
    config: LoopbackConfig,
    initialized: bool,
}

impl LoopbackLink {
    /// Create a connected pair with default configuration.
    pub fn pair() -> (Self, Self) {
        Self::pair_with(LoopbackConfig::default())
    }

    /// Create a connected pair with explicit configuration.
    pub fn pair_with(config: LoopbackConfig) -> (Self, Self) {
        let shared = Rc::new(RefCell::new(Shared::default()));
        let a = Self {
            shared: Rc::clone(&shared),
            side: Side::A,
            config: config.clone(),
            initialized: false,
        };
        let b = Self {
            shared,
            side: Side::B,
            config,
            initialized: false,
        };
        (a, b)
    }

    /// Number of bytes queued toward this endpoint but not yet read.
    pub fn pending(&self) -> usize {
        let shared = self.shared.borrow();
        match self.side {
            Side::A => shared.b_to_a.len(),
            Side::B => shared.a_to_b.len(),
        }
    }
}

impl ByteLink for LoopbackLink {
    fn init(&mut self) -> Result<()> {
        if !self.is_present() {
            return Err(LinkError::NotPresent);
        }
        self.initialized = true;
        debug!(side = ?self.side, "loopback link initialized");
        Ok(())
    }

    fn is_present(&self) -> bool {
        // The peer endpoint holds the other strong reference.
        Rc::strong_count(&self.shared) > 1
    }

    fn read_ready(&self) -> bool {
        self.pending() > 0
    }

    fn write_ready(&self) -> bool {
        let shared = self.shared.borrow();
        let queued = match self.side {
            Side::A => shared.a_to_b.len(),
            Side::B => shared.b_to_a.len(),
        };
        queued < self.config.capacity
    }

    fn read(&mut self) -> Option<u8> {
        let mut shared = self.shared.borrow_mut();
        match self.side {
            Side::A => shared.b_to_a.pop_front(),
            Side::B => shared.a_to_b.pop_front(),
        }
    }

    fn write(&mut self, byte: u8) -> Result<()> {
        if !self.initialized {
            return Err(LinkError::NotInitialized);
        }
        if !self.is_present() {
            return Err(LinkError::Closed);
        }
        if !self.write_ready() {
            return Err(LinkError::Overrun);
        }
        let mut shared = self.shared.borrow_mut();
        match self.side {
            Side::A => shared.a_to_b.push_back(byte),
            Side::B => shared.b_to_a.push_back(byte),
        }
        Ok(())
    }

    fn buffer_len(&self) -> usize {
        self.config.capacity
    }

    fn tx_burst_len(&self) -> usize {
        self.config.tx_burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_cross_between_endpoints() {
        let (mut a, mut b) = LoopbackLink::pair();
        a.init().unwrap();
        b.init().unwrap();

        a.write(0x42).unwrap();
        assert!(b.read_ready());
        assert_eq!(b.read(), Some(0x42));
        assert!(!b.read_ready());

        b.write(0x99).unwrap();
        assert_eq!(a.read(), Some(0x99));
    }

    #[test]
    fn write_before_init_rejected() {
        let (mut a, _b) = LoopbackLink::pair();
        assert!(matches!(a.write(0), Err(LinkError::NotInitialized)));
    }

    #[test]
    fn overrun_when_queue_full() {
        let cfg = LoopbackConfig {
            capacity: 2,
            tx_burst: 1,
        };
        let (mut a, _b) = LoopbackLink::pair_with(cfg);
        a.init().unwrap();

        a.write(1).unwrap();
        a.write(2).unwrap();
        assert!(!a.write_ready());
        assert!(matches!(a.write(3), Err(LinkError::Overrun)));
    }

    #[test]
    fn presence_follows_peer_lifetime() {
        let (mut a, b) = LoopbackLink::pair();
        assert!(a.is_present());
        a.init().unwrap();

        drop(b);
        assert!(!a.is_present());
        assert!(matches!(a.write(0), Err(LinkError::Closed)));
    }

    #[test]
    fn init_fails_without_peer() {
        let (mut a, b) = LoopbackLink::pair();
        drop(b);
        assert!(matches!(a.init(), Err(LinkError::NotPresent)));
    }

    #[test]
    fn read_drains_in_order() {
        let (mut a, mut b) = LoopbackLink::pair();
        a.init().unwrap();
        for byte in [1u8, 2, 3] {
            a.write(byte).unwrap();
        }
        assert_eq!(b.pending(), 3);
        assert_eq!(b.read(), Some(1));
        assert_eq!(b.read(), Some(2));
        assert_eq!(b.read(), Some(3));
        assert_eq!(b.read(), None);
    }
}
