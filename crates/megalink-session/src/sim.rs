//! In-process coprocessor model for tests and demos.
//!
//! Speaks the real wire protocol over the far end of a loopback link, so
//! everything from the framer up is exercised exactly as it would be against
//! hardware. Install [`SimCoprocessor::service`] as the scheduler's user task
//! and it gets one slice per tick, like firmware sharing the serial line.

use std::collections::{BTreeMap, VecDeque};

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use megalink_frame::{FrameError, Lsd, LsdEvent, CTRL_CHANNEL, HTTP_CHANNEL, MAX_CHANNELS};
use megalink_link::{ByteLink, LoopbackLink};

use crate::error::Result;
use crate::proto::{self, opcode, SockState, SysState, CMD_CAPACITY};

const FLASH_SECTOR: u32 = 4096;
const ERASED: u8 = 0xFF;

/// Scripted coprocessor behind a loopback link.
pub struct SimCoprocessor {
    lsd: Lsd<LoopbackLink>,
    reply_buf: BytesMut,
    /// When set, commands are consumed but never answered.
    silent: bool,
    state: SysState,
    join_countdown: u16,
    socks: [SockState; MAX_CHANNELS as usize],
    flash: BTreeMap<u32, u8>,
    outbox: VecDeque<(u8, Vec<u8>)>,
    /// Reassembly buffer for frames larger than the receive buffer.
    accum: Vec<u8>,
    http_body: Vec<u8>,
    /// Whether the current slice wrote anything toward the console.
    sent: bool,
}

impl SimCoprocessor {
    /// Take ownership of the far end of a loopback pair. All channels are
    /// enabled; socket and association state start cold.
    pub fn new(mut link: LoopbackLink) -> Result<Self> {
        link.init().map_err(FrameError::from)?;
        let mut lsd = Lsd::new(link);
        for ch in 0..MAX_CHANNELS {
            lsd.enable_channel(ch)?;
        }
        Ok(Self {
            lsd,
            reply_buf: BytesMut::with_capacity(CMD_CAPACITY),
            silent: false,
            state: SysState::Idle,
            join_countdown: 0,
            socks: [SockState::Closed; MAX_CHANNELS as usize],
            flash: BTreeMap::new(),
            outbox: VecDeque::new(),
            accum: Vec::new(),
            http_body: Vec::new(),
            sent: false,
        })
    }

    /// Stop answering commands (they are still consumed).
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Ticks of `service()` between accepting a join and reporting ready.
    pub fn set_join_delay(&mut self, ticks: u16) {
        self.join_countdown = ticks;
    }

    /// Queue a frame to push toward the console, as a remote peer would.
    pub fn push_data(&mut self, ch: u8, data: &[u8]) {
        self.outbox.push_back((ch, data.to_vec()));
    }

    /// Body returned after the next `HTTP_FINISH`.
    pub fn set_http_body(&mut self, body: &[u8]) {
        self.http_body = body.to_vec();
    }

    /// Current association state.
    pub fn state(&self) -> SysState {
        self.state
    }

    /// One firmware slice: push queued data, pump the link, answer whatever
    /// arrived.
    ///
    /// Returns true when anything was written toward the console, so the
    /// installing closure can post the pending supervisor.
    pub fn service(&mut self) -> bool {
        self.sent = false;

        if self.state == SysState::Joining {
            if self.join_countdown > 0 {
                self.join_countdown -= 1;
            }
            if self.join_countdown == 0 {
                debug!("sim associated");
                self.state = SysState::Ready;
            }
        }

        while self.lsd.send_idle() {
            let Some((ch, data)) = self.outbox.pop_front() else {
                break;
            };
            if let Err(err) = self.lsd.send_sync(ch, &data) {
                warn!(error = %err, "sim failed to push data");
            } else {
                self.sent = true;
            }
        }

        if !self.lsd.recv_pending() {
            if let Err(err) = self.lsd.recv(CMD_CAPACITY) {
                warn!(error = %err, "sim failed to arm receive");
                return self.sent;
            }
        }
        if let Err(err) = self.lsd.process() {
            warn!(error = %err, "sim link failure");
            return self.sent;
        }

        while let Some(event) = self.lsd.next_event() {
            match event {
                LsdEvent::Partial(frame) => {
                    self.accum.extend_from_slice(&frame.payload);
                    if let Err(err) = self.lsd.recv(CMD_CAPACITY) {
                        warn!(error = %err, "sim failed to re-arm receive");
                    }
                    if let Err(err) = self.lsd.process() {
                        warn!(error = %err, "sim link failure");
                    }
                }
                LsdEvent::Frame(frame) => {
                    let payload = if self.accum.is_empty() {
                        frame.payload.to_vec()
                    } else {
                        let mut whole = std::mem::take(&mut self.accum);
                        whole.extend_from_slice(&frame.payload);
                        whole
                    };
                    self.handle_frame(frame.channel, &payload);
                }
                LsdEvent::FramingError(err) => {
                    warn!(error = %err, "sim framing error");
                }
            }
        }

        self.sent
    }

    fn handle_frame(&mut self, ch: u8, payload: &[u8]) {
        if ch == CTRL_CHANNEL {
            self.handle_command(payload);
        } else {
            // Data channels echo, standing in for a remote peer.
            trace!(channel = ch, len = payload.len(), "sim echoing data");
            self.outbox.push_back((ch, payload.to_vec()));
        }
    }

    fn handle_command(&mut self, raw: &[u8]) {
        let (status, reply) = match proto::split_message(raw) {
            Ok((op, payload)) => self.dispatch(op, payload),
            Err(_) => {
                warn!("sim received malformed command");
                (opcode::ERR, Vec::new())
            }
        };
        if self.silent {
            trace!("sim silent, dropping reply");
            return;
        }
        proto::encode_reply(status, &reply, &mut self.reply_buf);
        let reply_bytes = self.reply_buf.split().freeze();
        if let Err(err) = self.lsd.send_sync(CTRL_CHANNEL, &reply_bytes) {
            warn!(error = %err, "sim failed to send reply");
        } else {
            self.sent = true;
        }
    }

    fn dispatch(&mut self, op: u16, payload: &[u8]) -> (u16, Vec<u8>) {
        match op {
            opcode::VERSION => (opcode::OK, vec![1, 5, 0, b's', b't', b'd', 0]),
            opcode::ECHO => (opcode::OK, payload.to_vec()),
            opcode::AP_SCAN => {
                let mut out = Vec::new();
                out.extend_from_slice(&[(-40i8) as u8, 3, 4]);
                out.extend_from_slice(b"home");
                out.extend_from_slice(&[(-70i8) as u8, 0, 5]);
                out.extend_from_slice(b"guest");
                (opcode::OK, out)
            }
            opcode::AP_JOIN => match payload.first() {
                Some(&slot) if slot < proto::AP_SLOTS => {
                    self.state = if self.join_countdown == 0 {
                        SysState::Ready
                    } else {
                        SysState::Joining
                    };
                    (opcode::OK, Vec::new())
                }
                _ => (opcode::ERR, Vec::new()),
            },
            opcode::AP_LEAVE => {
                self.state = SysState::Idle;
                (opcode::OK, Vec::new())
            }
            opcode::SYS_STAT => (opcode::OK, vec![self.state.as_u8(), 0]),
            opcode::TCP_CON => self.sock_transition(payload, SockState::Connected),
            opcode::TCP_BIND => self.sock_transition(payload, SockState::Listening),
            opcode::SOCK_CLOSE => self.sock_transition(payload, SockState::Closed),
            opcode::UDP_SET => self.sock_transition(payload, SockState::Connected),
            opcode::SOCK_STAT => match Self::data_channel(payload) {
                Some(ch) => (opcode::OK, vec![self.socks[ch as usize].as_u8()]),
                None => (opcode::ERR, Vec::new()),
            },
            opcode::FLASH_ID => (opcode::OK, vec![0xC2, 0x20, 0x17]),
            opcode::FLASH_ERASE => {
                if payload.len() < 2 {
                    return (opcode::ERR, Vec::new());
                }
                let sector = u16::from_be_bytes([payload[0], payload[1]]) as u32;
                let start = sector * FLASH_SECTOR;
                self.flash.retain(|&addr, _| !(start..start + FLASH_SECTOR).contains(&addr));
                (opcode::OK, Vec::new())
            }
            opcode::FLASH_READ => {
                if payload.len() < 6 {
                    return (opcode::ERR, Vec::new());
                }
                let addr = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let len = u16::from_be_bytes([payload[4], payload[5]]) as u32;
                let out: Vec<u8> = (addr..addr + len)
                    .map(|a| self.flash.get(&a).copied().unwrap_or(ERASED))
                    .collect();
                (opcode::OK, out)
            }
            opcode::FLASH_WRITE => {
                if payload.len() < 4 {
                    return (opcode::ERR, Vec::new());
                }
                let addr = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                for (i, &byte) in payload[4..].iter().enumerate() {
                    self.flash.insert(addr + i as u32, byte);
                }
                (opcode::OK, Vec::new())
            }
            opcode::HTTP_URL_SET | opcode::HTTP_METHOD_SET | opcode::HTTP_OPEN => {
                (opcode::OK, Vec::new())
            }
            opcode::HTTP_FINISH => {
                let body = std::mem::take(&mut self.http_body);
                let mut out = Vec::new();
                out.extend_from_slice(&200u16.to_be_bytes());
                out.extend_from_slice(&(body.len() as u32).to_be_bytes());
                if !body.is_empty() {
                    self.outbox.push_back((HTTP_CHANNEL, body));
                }
                (opcode::OK, out)
            }
            other => {
                warn!(opcode = other, "sim received unknown opcode");
                (opcode::ERR, Vec::new())
            }
        }
    }

    fn sock_transition(&mut self, payload: &[u8], next: SockState) -> (u16, Vec<u8>) {
        match Self::data_channel(payload) {
            Some(ch) => {
                self.socks[ch as usize] = next;
                (opcode::OK, Vec::new())
            }
            None => (opcode::ERR, Vec::new()),
        }
    }

    fn data_channel(payload: &[u8]) -> Option<u8> {
        match payload.first() {
            Some(&ch) if ch != CTRL_CHANNEL && ch < MAX_CHANNELS => Some(ch),
            _ => None,
        }
    }
}
