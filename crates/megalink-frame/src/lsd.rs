use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace, warn};

use megalink_link::ByteLink;

use crate::channel::{is_valid_channel, MAX_CHANNELS};
use crate::codec::{pack_header, unpack_ch_len_hi, Frame, MAX_PAYLOAD, SENTINEL};
use crate::error::{FrameError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendPhase {
    Idle,
    Stx,
    ChLenHi,
    LenLo,
    Data,
    Etx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvPhase {
    Idle,
    Stx,
    ChLenHi,
    LenLo,
    Data,
    /// The caller's buffer filled before the frame ended. The remaining
    /// length is kept so a fresh buffer can continue the same frame.
    Partial,
    Etx,
}

#[derive(Debug)]
struct SendState {
    phase: SendPhase,
    channel: u8,
    buf: BytesMut,
    pos: usize,
}

#[derive(Debug)]
struct RecvState {
    phase: RecvPhase,
    channel: u8,
    buf: BytesMut,
    capacity: usize,
    len_hi: usize,
    remaining: usize,
}

/// Receive-side completions drained from [`Lsd::next_event`].
///
/// Framing errors are events rather than `process()` failures: they are
/// fatal to the in-flight frame only, reported once, and the FSM is idle
/// afterwards.
#[derive(Debug)]
pub enum LsdEvent {
    /// A complete frame arrived.
    Frame(Frame),
    /// The receive buffer filled before the frame ended; re-arm with
    /// [`Lsd::recv`] to continue the same frame.
    Partial(Frame),
    /// The in-flight frame was malformed.
    FramingError(FrameError),
}

/// Outcome of a blocking [`Lsd::recv_sync`].
#[derive(Debug)]
pub enum Received {
    /// A complete frame.
    Complete(Frame),
    /// A truncated delivery; call `recv_sync` again to continue.
    Partial(Frame),
}

/// The LSD framer: addressed, length-delimited frames over one byte link.
///
/// One send slot and one receive slot exist per instance; multiplexing
/// across channels is temporal, not concurrent. Bytes only move inside
/// [`process`], which never blocks.
///
/// [`process`]: Lsd::process
#[derive(Debug)]
pub struct Lsd<L> {
    link: L,
    enabled: [bool; MAX_CHANNELS as usize],
    send: SendState,
    recv: RecvState,
    events: VecDeque<LsdEvent>,
}

impl<L: ByteLink> Lsd<L> {
    /// Wrap a byte link. All channels start disabled.
    pub fn new(link: L) -> Self {
        Self {
            link,
            enabled: [false; MAX_CHANNELS as usize],
            send: SendState {
                phase: SendPhase::Idle,
                channel: 0,
                buf: BytesMut::new(),
                pos: 0,
            },
            recv: RecvState {
                phase: RecvPhase::Idle,
                channel: 0,
                buf: BytesMut::new(),
                capacity: 0,
                len_hi: 0,
                remaining: 0,
            },
            events: VecDeque::new(),
        }
    }

    /// Borrow the underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrow the underlying link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Consume the framer and return the link.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Enable a channel. Idempotent.
    pub fn enable_channel(&mut self, ch: u8) -> Result<()> {
        if !is_valid_channel(ch) {
            return Err(FrameError::InvalidChannel(ch));
        }
        self.enabled[ch as usize] = true;
        Ok(())
    }

    /// Disable a channel. Idempotent.
    pub fn disable_channel(&mut self, ch: u8) -> Result<()> {
        if !is_valid_channel(ch) {
            return Err(FrameError::InvalidChannel(ch));
        }
        self.enabled[ch as usize] = false;
        Ok(())
    }

    /// Whether a channel is currently enabled.
    pub fn channel_enabled(&self, ch: u8) -> bool {
        is_valid_channel(ch) && self.enabled[ch as usize]
    }

    /// Whether no send is in flight.
    pub fn send_idle(&self) -> bool {
        self.send.phase == SendPhase::Idle
    }

    /// Whether the receive slot holds an unfinished frame (armed or parked
    /// in a partial delivery).
    pub fn recv_pending(&self) -> bool {
        self.recv.phase != RecvPhase::Idle
    }

    /// Whether a partial delivery parked the receive slot; a [`Lsd::recv`]
    /// call continues the same frame.
    pub fn recv_parked(&self) -> bool {
        self.recv.phase == RecvPhase::Partial
    }

    fn recv_active(&self) -> bool {
        !matches!(self.recv.phase, RecvPhase::Idle | RecvPhase::Partial)
    }

    /// Arm a send. The frame is transmitted inside [`Lsd::process`].
    ///
    /// Rejects synchronously when a send is in flight, the payload exceeds
    /// [`MAX_PAYLOAD`], or the channel is invalid or disabled.
    pub fn send(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        if self.send.phase != SendPhase::Idle {
            return Err(FrameError::SendInProgress);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::FrameTooLong { len: payload.len() });
        }
        if !is_valid_channel(channel) {
            return Err(FrameError::InvalidChannel(channel));
        }
        if !self.enabled[channel as usize] {
            return Err(FrameError::ChannelDisabled(channel));
        }
        self.send.buf.clear();
        self.send.buf.extend_from_slice(payload);
        self.send.channel = channel;
        self.send.pos = 0;
        self.send.phase = SendPhase::Stx;
        trace!(channel, len = payload.len(), "send armed");
        Ok(())
    }

    /// Arm reception of one frame into an owned buffer of `capacity` bytes.
    ///
    /// If the previous delivery was [`LsdEvent::Partial`], this continues the
    /// same logical frame into the fresh buffer from position 0.
    pub fn recv(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(FrameError::EmptyBuffer);
        }
        match self.recv.phase {
            RecvPhase::Idle => {
                self.recv.buf = BytesMut::with_capacity(capacity);
                self.recv.capacity = capacity;
                self.recv.phase = RecvPhase::Stx;
            }
            RecvPhase::Partial => {
                self.recv.buf = BytesMut::with_capacity(capacity);
                self.recv.capacity = capacity;
                self.recv.phase = RecvPhase::Data;
            }
            _ => return Err(FrameError::RecvInProgress),
        }
        Ok(())
    }

    /// Pop the next receive-side completion, if any.
    pub fn next_event(&mut self) -> Option<LsdEvent> {
        self.events.pop_front()
    }

    /// Pump both state machines until neither can progress.
    ///
    /// While the link reports data ready and the receive FSM is armed,
    /// bytes are decoded one at a time; while it reports write-ready and a
    /// send is in flight, up to `tx_burst_len()` bytes are written per
    /// burst. Never blocks. Completions queue as [`LsdEvent`]s.
    ///
    /// Returns an error only when the link itself fails mid-write; the
    /// in-flight send is abandoned in that case.
    pub fn process(&mut self) -> Result<()> {
        loop {
            let mut progressed = false;

            while self.recv_active() && self.link.read_ready() {
                let Some(byte) = self.link.read() else { break };
                self.recv_byte(byte);
                progressed = true;
            }

            if self.send.phase != SendPhase::Idle && self.link.write_ready() {
                let burst = self.link.tx_burst_len().max(1);
                for _ in 0..burst {
                    if self.send.phase == SendPhase::Idle || !self.link.write_ready() {
                        break;
                    }
                    if let Err(err) = self.send_step() {
                        self.send.phase = SendPhase::Idle;
                        return Err(err);
                    }
                    progressed = true;
                }
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    /// Arm a send and pump until it completes.
    ///
    /// Unsafe against a stalled link: if the peer never drains its side this
    /// loops forever. Prefer `send` + `process` under a deadline.
    pub fn send_sync(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        self.send(channel, payload)?;
        while !self.send_idle() {
            self.process()?;
        }
        Ok(())
    }

    /// Arm a receive and pump until a delivery or framing error.
    ///
    /// Unsafe against a silent peer: if no frame ever arrives this loops
    /// forever. Prefer `recv` + `process` under a deadline.
    pub fn recv_sync(&mut self, capacity: usize) -> Result<Received> {
        self.recv(capacity)?;
        loop {
            self.process()?;
            match self.events.pop_front() {
                Some(LsdEvent::Frame(frame)) => return Ok(Received::Complete(frame)),
                Some(LsdEvent::Partial(frame)) => return Ok(Received::Partial(frame)),
                Some(LsdEvent::FramingError(err)) => return Err(err),
                None => {}
            }
        }
    }

    fn send_step(&mut self) -> Result<()> {
        match self.send.phase {
            SendPhase::Idle => {}
            SendPhase::Stx => {
                self.link.write(SENTINEL)?;
                self.send.phase = SendPhase::ChLenHi;
            }
            SendPhase::ChLenHi => {
                let hdr = pack_header(self.send.channel, self.send.buf.len());
                self.link.write(hdr[0])?;
                self.send.phase = SendPhase::LenLo;
            }
            SendPhase::LenLo => {
                let hdr = pack_header(self.send.channel, self.send.buf.len());
                self.link.write(hdr[1])?;
                self.send.phase = if self.send.buf.is_empty() {
                    SendPhase::Etx
                } else {
                    SendPhase::Data
                };
            }
            SendPhase::Data => {
                self.link.write(self.send.buf[self.send.pos])?;
                self.send.pos += 1;
                if self.send.pos == self.send.buf.len() {
                    self.send.phase = SendPhase::Etx;
                }
            }
            SendPhase::Etx => {
                self.link.write(SENTINEL)?;
                debug!(
                    channel = self.send.channel,
                    len = self.send.buf.len(),
                    "frame sent"
                );
                self.send.phase = SendPhase::Idle;
            }
        }
        Ok(())
    }

    fn recv_byte(&mut self, byte: u8) {
        match self.recv.phase {
            RecvPhase::Idle | RecvPhase::Partial => {}
            RecvPhase::Stx => {
                if byte == SENTINEL {
                    self.recv.phase = RecvPhase::ChLenHi;
                }
                // Anything else is inter-frame noise; keep scanning.
            }
            RecvPhase::ChLenHi => {
                if byte == SENTINEL {
                    // The previous ETX was lost and this is the real start.
                    // Best-effort resync against a single dropped terminator,
                    // not a general loss-recovery protocol.
                    trace!("double sentinel, resyncing to frame start");
                    return;
                }
                let (ch, len_hi) = unpack_ch_len_hi(byte);
                if !is_valid_channel(ch) {
                    warn!(channel = ch, "frame addressed to invalid channel");
                    self.fail_recv(FrameError::InvalidChannel(ch));
                    return;
                }
                if !self.enabled[ch as usize] {
                    warn!(channel = ch, "frame addressed to disabled channel");
                    self.fail_recv(FrameError::ChannelDisabled(ch));
                    return;
                }
                self.recv.channel = ch;
                self.recv.len_hi = len_hi;
                self.recv.phase = RecvPhase::LenLo;
            }
            RecvPhase::LenLo => {
                self.recv.remaining = self.recv.len_hi | byte as usize;
                self.recv.phase = if self.recv.remaining == 0 {
                    RecvPhase::Etx
                } else {
                    RecvPhase::Data
                };
            }
            RecvPhase::Data => {
                self.recv.buf.put_u8(byte);
                self.recv.remaining -= 1;
                if self.recv.remaining == 0 {
                    self.recv.phase = RecvPhase::Etx;
                } else if self.recv.buf.len() >= self.recv.capacity {
                    let frame = Frame {
                        channel: self.recv.channel,
                        payload: self.recv.buf.split().freeze(),
                    };
                    trace!(
                        channel = frame.channel,
                        delivered = frame.payload.len(),
                        remaining = self.recv.remaining,
                        "buffer full, partial delivery"
                    );
                    self.events.push_back(LsdEvent::Partial(frame));
                    self.recv.phase = RecvPhase::Partial;
                }
            }
            RecvPhase::Etx => {
                if byte == SENTINEL {
                    let frame = Frame {
                        channel: self.recv.channel,
                        payload: self.recv.buf.split().freeze(),
                    };
                    debug!(
                        channel = frame.channel,
                        len = frame.payload.len(),
                        "frame received"
                    );
                    self.events.push_back(LsdEvent::Frame(frame));
                    self.recv.phase = RecvPhase::Idle;
                } else {
                    warn!(byte, "missing end-of-frame sentinel");
                    self.fail_recv(FrameError::BadTerminator(byte));
                }
            }
        }
    }

    fn fail_recv(&mut self, err: FrameError) {
        self.recv.buf.clear();
        self.events.push_back(LsdEvent::FramingError(err));
        self.recv.phase = RecvPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use megalink_link::{LoopbackConfig, LoopbackLink};

    use super::*;
    use crate::channel::CTRL_CHANNEL;

    fn pair() -> (Lsd<LoopbackLink>, Lsd<LoopbackLink>) {
        let (mut a, mut b) = LoopbackLink::pair();
        a.init().unwrap();
        b.init().unwrap();
        (Lsd::new(a), Lsd::new(b))
    }

    fn drain_raw(link: &mut LoopbackLink) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(byte) = link.read() {
            out.push(byte);
        }
        out
    }

    #[test]
    fn send_is_wire_exact() {
        let (mut tx, mut rx) = pair();
        tx.enable_channel(2).unwrap();
        tx.send_sync(2, &[0xDE, 0xAD]).unwrap();

        let wire = drain_raw(rx.link_mut());
        assert_eq!(wire, vec![0x7E, 0x20, 0x02, 0xDE, 0xAD, 0x7E]);
    }

    #[test]
    fn round_trip() {
        let (mut tx, mut rx) = pair();
        tx.enable_channel(1).unwrap();
        rx.enable_channel(1).unwrap();

        tx.send_sync(1, b"hello lsd").unwrap();
        let received = rx.recv_sync(64).unwrap();

        let Received::Complete(frame) = received else {
            panic!("expected complete frame");
        };
        assert_eq!(frame.channel, 1);
        assert_eq!(frame.payload.as_ref(), b"hello lsd");
    }

    #[test]
    fn enable_disable_idempotent() {
        let (mut tx, _rx) = pair();
        tx.enable_channel(1).unwrap();
        tx.enable_channel(1).unwrap();
        assert!(tx.channel_enabled(1));
        tx.disable_channel(1).unwrap();
        tx.disable_channel(1).unwrap();
        assert!(!tx.channel_enabled(1));
        assert!(matches!(
            tx.enable_channel(MAX_CHANNELS),
            Err(FrameError::InvalidChannel(_))
        ));
    }

    #[test]
    fn oversize_send_always_rejected() {
        let (mut tx, _rx) = pair();
        tx.enable_channel(1).unwrap();
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            tx.send(1, &payload),
            Err(FrameError::FrameTooLong { len: 4096 })
        ));
    }

    #[test]
    fn max_payload_send_accepted() {
        let cfg = LoopbackConfig {
            capacity: 8192,
            tx_burst: 64,
        };
        let (mut la, mut lb) = LoopbackLink::pair_with(cfg);
        la.init().unwrap();
        lb.init().unwrap();
        let mut tx = Lsd::new(la);
        let mut rx = Lsd::new(lb);
        tx.enable_channel(1).unwrap();
        rx.enable_channel(1).unwrap();

        let payload = vec![0x5Au8; MAX_PAYLOAD];
        tx.send_sync(1, &payload).unwrap();
        let Received::Complete(frame) = rx.recv_sync(MAX_PAYLOAD).unwrap() else {
            panic!("expected complete frame");
        };
        assert_eq!(frame.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn send_while_in_flight_rejected() {
        let cfg = LoopbackConfig {
            capacity: 2,
            tx_burst: 1,
        };
        let (mut la, lb) = LoopbackLink::pair_with(cfg);
        la.init().unwrap();
        let mut tx = Lsd::new(la);
        let _keep = lb;
        tx.enable_channel(1).unwrap();

        tx.send(1, b"long enough to stall").unwrap();
        tx.process().unwrap();
        assert!(!tx.send_idle());
        assert!(matches!(tx.send(1, b"x"), Err(FrameError::SendInProgress)));
    }

    #[test]
    fn disabled_channel_send_rejected() {
        let (mut tx, _rx) = pair();
        assert!(matches!(
            tx.send(1, b"x"),
            Err(FrameError::ChannelDisabled(1))
        ));
        assert!(matches!(
            tx.send(MAX_CHANNELS, b"x"),
            Err(FrameError::InvalidChannel(_))
        ));
    }

    #[test]
    fn partial_deliveries_concatenate_to_original() {
        let (mut tx, mut rx) = pair();
        tx.enable_channel(1).unwrap();
        rx.enable_channel(1).unwrap();

        let payload: Vec<u8> = (0u8..10).collect();
        tx.send_sync(1, &payload).unwrap();

        let mut collected = Vec::new();
        let mut partials = 0;
        loop {
            match rx.recv_sync(4).unwrap() {
                Received::Partial(frame) => {
                    partials += 1;
                    collected.extend_from_slice(&frame.payload);
                }
                Received::Complete(frame) => {
                    collected.extend_from_slice(&frame.payload);
                    break;
                }
            }
        }

        assert_eq!(partials, 2);
        assert_eq!(collected, payload);
    }

    #[test]
    fn exact_fit_buffer_is_complete_not_partial() {
        let (mut tx, mut rx) = pair();
        tx.enable_channel(1).unwrap();
        rx.enable_channel(1).unwrap();

        tx.send_sync(1, b"fits").unwrap();
        assert!(matches!(rx.recv_sync(4), Ok(Received::Complete(_))));
    }

    #[test]
    fn zero_length_frame_round_trips() {
        let (mut tx, mut rx) = pair();
        tx.enable_channel(CTRL_CHANNEL).unwrap();
        rx.enable_channel(CTRL_CHANNEL).unwrap();

        tx.send_sync(CTRL_CHANNEL, &[]).unwrap();
        let Received::Complete(frame) = rx.recv_sync(16).unwrap() else {
            panic!("expected complete frame");
        };
        assert_eq!(frame.channel, CTRL_CHANNEL);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn double_sentinel_resyncs_to_frame_start() {
        let (mut la, mut lb) = LoopbackLink::pair();
        la.init().unwrap();
        lb.init().unwrap();
        // A stray sentinel (the previous frame's lost terminator) precedes a
        // well-formed frame.
        for byte in [0x7E, 0x7E, 0x10, 0x02, 0xAA, 0xBB, 0x7E] {
            la.write(byte).unwrap();
        }

        let mut rx = Lsd::new(lb);
        rx.enable_channel(1).unwrap();
        let Received::Complete(frame) = rx.recv_sync(16).unwrap() else {
            panic!("expected complete frame");
        };
        assert_eq!(frame.channel, 1);
        assert_eq!(frame.payload.as_ref(), &[0xAA, 0xBB]);
    }

    #[test]
    fn bad_terminator_is_framing_error_then_idle() {
        let (mut la, mut lb) = LoopbackLink::pair();
        la.init().unwrap();
        lb.init().unwrap();
        for byte in [0x7E, 0x10, 0x01, 0xAA, 0x55] {
            la.write(byte).unwrap();
        }

        let mut rx = Lsd::new(lb);
        rx.enable_channel(1).unwrap();
        let err = rx.recv_sync(16).unwrap_err();
        assert!(matches!(err, FrameError::BadTerminator(0x55)));
        assert!(!rx.recv_pending());
    }

    #[test]
    fn disabled_channel_on_receive_is_framing_error() {
        let (mut la, mut lb) = LoopbackLink::pair();
        la.init().unwrap();
        lb.init().unwrap();
        for byte in [0x7E, 0x20, 0x01, 0xAA, 0x7E] {
            la.write(byte).unwrap();
        }

        let mut rx = Lsd::new(lb);
        rx.enable_channel(1).unwrap();
        let err = rx.recv_sync(16).unwrap_err();
        assert!(matches!(err, FrameError::ChannelDisabled(2)));
    }

    #[test]
    fn interframe_noise_skipped_while_hunting_for_sentinel() {
        let (mut la, mut lb) = LoopbackLink::pair();
        la.init().unwrap();
        lb.init().unwrap();
        for byte in [0x00, 0x13, 0x37, 0x7E, 0x10, 0x01, 0xCC, 0x7E] {
            la.write(byte).unwrap();
        }

        let mut rx = Lsd::new(lb);
        rx.enable_channel(1).unwrap();
        let Received::Complete(frame) = rx.recv_sync(16).unwrap() else {
            panic!("expected complete frame");
        };
        assert_eq!(frame.payload.as_ref(), &[0xCC]);
    }

    #[test]
    fn stalled_link_resumes_after_drain() {
        let cfg = LoopbackConfig {
            capacity: 4,
            tx_burst: 8,
        };
        let (mut la, mut lb) = LoopbackLink::pair_with(cfg);
        la.init().unwrap();
        lb.init().unwrap();
        let mut tx = Lsd::new(la);
        tx.enable_channel(1).unwrap();

        tx.send(1, b"stalled payload").unwrap();
        tx.process().unwrap();
        assert!(!tx.send_idle());

        let mut wire = Vec::new();
        while !tx.send_idle() {
            wire.extend(std::iter::from_fn(|| lb.read()));
            tx.process().unwrap();
        }
        wire.extend(std::iter::from_fn(|| lb.read()));

        let expected_len = b"stalled payload".len() + crate::codec::FRAME_OVERHEAD;
        assert_eq!(wire.len(), expected_len);
        assert_eq!(wire[0], SENTINEL);
        assert_eq!(*wire.last().unwrap(), SENTINEL);
    }

    #[test]
    fn recv_rearm_while_active_rejected() {
        let (mut tx, mut rx) = pair();
        tx.enable_channel(1).unwrap();
        rx.enable_channel(1).unwrap();

        rx.recv(16).unwrap();
        assert!(matches!(rx.recv(16), Err(FrameError::RecvInProgress)));
        assert!(matches!(rx.recv(0), Err(FrameError::EmptyBuffer)));
    }
}
