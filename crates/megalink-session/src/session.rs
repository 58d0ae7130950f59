use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use megalink_frame::{Frame, Lsd, LsdEvent, CTRL_CHANNEL, HTTP_CHANNEL, MAX_PAYLOAD};
use megalink_link::ByteLink;
use megalink_task::{Scheduler, TickSource, Wake};

use crate::error::{Result, SessionError};
use crate::proto::{
    decode_reply, decode_scan, ApEntry, Command, FlashId, HttpMethod, HttpStatus, SockState,
    SysState, SysStatus, Version, CMD_CAPACITY,
};

/// Timeout tiers in ticks (one tick per display refresh, ~60 Hz).
///
/// Every deadline in the stack counts ticks; no other time unit exists.
pub mod timeouts {
    /// Short commands (~1 s).
    pub const DEFAULT: u16 = 60;
    /// Network scan (~10 s).
    pub const SCAN: u16 = 600;
    /// Association and TCP connection establishment (~20 s).
    pub const ASSOC: u16 = 1200;
    /// HTTP request completion (~20 s).
    pub const HTTP: u16 = 1200;
    /// Flash sector program/erase (~30 s).
    pub const FLASH: u16 = 1800;
    /// Firmware upgrade (~3 min).
    pub const UPGRADE: u16 = 10800;
}

/// Fixed cadence for status polling during association.
const ASSOC_POLL_TICKS: u16 = 30;

/// Callback receiving frames that arrive on non-control channels while no
/// receive of theirs is pending (socket data, HTTP body chunks).
pub type DataCallback = Box<dyn FnMut(Frame)>;

/// One session with the network coprocessor.
///
/// Owns the framer and the scheduler, the shared command buffer, and the
/// unsolicited-data callback. Commands are strictly sequential — the `&mut
/// self` receiver makes one-command-at-a-time a compile-time property rather
/// than a convention.
pub struct Session<L: ByteLink, T: TickSource> {
    lsd: Lsd<L>,
    sched: Scheduler<T>,
    cmd_buf: BytesMut,
    on_data: Option<DataCallback>,
    ready: bool,
}

impl<L: ByteLink, T: TickSource> Session<L, T> {
    /// Create a session over a byte link, driven by the given tick source.
    ///
    /// The session is not usable until [`Session::init`] succeeds.
    pub fn new(link: L, ticks: T) -> Self {
        Self {
            lsd: Lsd::new(link),
            sched: Scheduler::new(ticks),
            cmd_buf: BytesMut::with_capacity(CMD_CAPACITY),
            on_data: None,
            ready: false,
        }
    }

    /// Bring up the link and the control channel.
    pub fn init(&mut self) -> Result<()> {
        self.lsd
            .link_mut()
            .init()
            .map_err(|_| SessionError::NotReady)?;
        if !self.lsd.link().is_present() {
            return Err(SessionError::NotReady);
        }
        self.lsd.enable_channel(CTRL_CHANNEL)?;
        self.ready = true;
        debug!("session ready");
        Ok(())
    }

    /// Whether `init()` has succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Install or remove the unsolicited-data callback.
    pub fn set_data_callback(&mut self, cb: Option<DataCallback>) {
        self.on_data = cb;
    }

    /// Borrow the scheduler (e.g. to install a user task).
    pub fn scheduler(&self) -> &Scheduler<T> {
        &self.sched
    }

    /// Mutably borrow the scheduler.
    pub fn scheduler_mut(&mut self) -> &mut Scheduler<T> {
        &mut self.sched
    }

    /// Borrow the framer.
    pub fn lsd(&self) -> &Lsd<L> {
        &self.lsd
    }

    fn check_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(SessionError::NotReady)
        }
    }

    /// Send one command and wait for its reply on the control channel.
    ///
    /// Frames arriving on other channels while the reply is pending go to
    /// the data callback; they never starve command completion. A timeout
    /// aborts immediately with [`SessionError::RecvTimeout`] and leaves the
    /// receive side armed for the next command.
    pub fn execute_command(&mut self, cmd: &Command<'_>, timeout: u16) -> Result<Bytes> {
        self.check_ready()?;
        cmd.encode(&mut self.cmd_buf)?;
        trace!(opcode = cmd.opcode(), timeout, "command start");
        self.send_ctrl(timeout)?;
        self.await_reply(timeout)
    }

    fn send_ctrl(&mut self, timeout: u16) -> Result<()> {
        self.lsd
            .send(CTRL_CHANNEL, &self.cmd_buf)
            .map_err(|_| SessionError::SendFailed)?;
        let mut remaining = timeout;
        loop {
            self.lsd.process().map_err(|_| SessionError::SendFailed)?;
            if self.lsd.send_idle() {
                return Ok(());
            }
            if remaining == 0 {
                warn!("command transmit stalled");
                return Err(SessionError::SendFailed);
            }
            self.sched.user_yield();
            remaining -= 1;
        }
    }

    /// Pend until the control reply arrives. The user task posts whenever
    /// the coprocessor side pushes bytes; a wake that does not complete the
    /// command (unsolicited data) re-pends with the full countdown.
    fn await_reply(&mut self, timeout: u16) -> Result<Bytes> {
        let mut remaining = timeout;
        if !self.lsd.recv_pending() || self.lsd.recv_parked() {
            self.lsd.recv(CMD_CAPACITY)?;
        }
        loop {
            self.lsd.process()?;
            while let Some(event) = self.lsd.next_event() {
                match event {
                    LsdEvent::Frame(frame) if frame.channel == CTRL_CHANNEL => {
                        trace!(len = frame.payload.len(), "reply received");
                        return decode_reply(&frame.payload);
                    }
                    LsdEvent::Frame(frame) => {
                        self.dispatch_data(frame);
                        self.lsd.recv(CMD_CAPACITY)?;
                        self.lsd.process()?;
                    }
                    LsdEvent::Partial(frame) if frame.channel == CTRL_CHANNEL => {
                        warn!("control reply exceeds command buffer");
                        return Err(SessionError::BufferTooShort);
                    }
                    LsdEvent::Partial(frame) => {
                        self.dispatch_data(frame);
                        self.lsd.recv(CMD_CAPACITY)?;
                        self.lsd.process()?;
                    }
                    LsdEvent::FramingError(err) => {
                        warn!(error = %err, "framing error while awaiting reply");
                        return Err(SessionError::RecvFailed);
                    }
                }
            }
            if remaining == 0 {
                // The receive stays armed; the next command reuses it.
                return Err(SessionError::RecvTimeout);
            }
            if self.sched.super_pend(remaining) == Wake::TimedOut {
                remaining = 0;
            }
        }
    }

    fn dispatch_data(&mut self, frame: Frame) {
        if let Some(cb) = self.on_data.as_mut() {
            cb(frame);
        } else {
            debug!(channel = frame.channel, "dropping frame, no data callback");
        }
    }

    /// Drain any queued receive completions to the data callback. Used by
    /// the bulk paths, where control frames are unexpected.
    fn drain_unsolicited(&mut self) {
        while let Some(event) = self.lsd.next_event() {
            match event {
                LsdEvent::Frame(frame) | LsdEvent::Partial(frame) => {
                    if frame.channel == CTRL_CHANNEL {
                        warn!("unsolicited control frame dropped");
                    } else {
                        self.dispatch_data(frame);
                    }
                }
                LsdEvent::FramingError(err) => warn!(error = %err, "framing error"),
            }
        }
    }

    // --- command wrappers -------------------------------------------------

    /// Query the coprocessor firmware version.
    pub fn version(&mut self) -> Result<Version> {
        let reply = self.execute_command(&Command::Version, timeouts::DEFAULT)?;
        Version::decode(&reply)
    }

    /// Echo test: the coprocessor returns the payload unchanged.
    pub fn echo(&mut self, data: &[u8]) -> Result<Bytes> {
        let reply = self.execute_command(&Command::Echo(data), timeouts::DEFAULT)?;
        if reply.as_ref() != data {
            return Err(SessionError::RecvFailed);
        }
        Ok(reply)
    }

    /// Scan for access points.
    pub fn ap_scan(&mut self) -> Result<Vec<ApEntry>> {
        let reply = self.execute_command(&Command::ApScan, timeouts::SCAN)?;
        decode_scan(&reply)
    }

    /// Start association using a stored configuration slot.
    ///
    /// Returns as soon as the coprocessor accepts the request; use
    /// [`Session::assoc_wait`] to wait for the association to complete.
    pub fn ap_join(&mut self, slot: u8) -> Result<()> {
        self.execute_command(&Command::ApJoin { slot }, timeouts::DEFAULT)?;
        Ok(())
    }

    /// Leave the current network.
    pub fn ap_leave(&mut self) -> Result<()> {
        self.execute_command(&Command::ApLeave, timeouts::DEFAULT)?;
        Ok(())
    }

    /// Query coprocessor state.
    pub fn sys_status(&mut self) -> Result<SysStatus> {
        let reply = self.execute_command(&Command::SysStatus, timeouts::DEFAULT)?;
        SysStatus::decode(&reply)
    }

    /// Wait for association to complete, polling at a fixed cadence until
    /// the coprocessor reports ready or `deadline` ticks pass.
    pub fn assoc_wait(&mut self, deadline: u16) -> Result<()> {
        let mut remaining = deadline;
        loop {
            let status = self.sys_status()?;
            if status.state == SysState::Ready {
                return Ok(());
            }
            if remaining == 0 {
                return Err(SessionError::RecvTimeout);
            }
            let step = ASSOC_POLL_TICKS.min(remaining);
            self.sched.sleep(step);
            remaining -= step;
        }
    }

    /// Open a TCP connection on a data channel.
    pub fn tcp_connect(&mut self, ch: u8, host: &str, port: u16) -> Result<()> {
        Self::check_data_channel(ch)?;
        self.execute_command(&Command::TcpConnect { ch, host, port }, timeouts::ASSOC)?;
        self.lsd.enable_channel(ch)?;
        Ok(())
    }

    /// Put a data channel into listening mode on a local port.
    pub fn tcp_bind(&mut self, ch: u8, port: u16) -> Result<()> {
        Self::check_data_channel(ch)?;
        self.execute_command(&Command::TcpBind { ch, port }, timeouts::ASSOC)?;
        self.lsd.enable_channel(ch)?;
        Ok(())
    }

    /// Close a socket and disable its channel.
    pub fn close(&mut self, ch: u8) -> Result<()> {
        Self::check_data_channel(ch)?;
        self.execute_command(&Command::Close { ch }, timeouts::DEFAULT)?;
        self.lsd.disable_channel(ch)?;
        Ok(())
    }

    /// Query the state of a socket channel.
    pub fn sock_status(&mut self, ch: u8) -> Result<SockState> {
        Self::check_data_channel(ch)?;
        let reply = self.execute_command(&Command::SockStatus { ch }, timeouts::DEFAULT)?;
        if reply.is_empty() {
            return Err(SessionError::RecvFailed);
        }
        SockState::from_u8(reply[0])
    }

    /// Configure a data channel for UDP traffic.
    pub fn udp_set(&mut self, ch: u8, peer: &str, dst_port: u16, src_port: u16) -> Result<()> {
        Self::check_data_channel(ch)?;
        self.execute_command(
            &Command::UdpSet {
                ch,
                peer,
                dst_port,
                src_port,
            },
            timeouts::DEFAULT,
        )?;
        self.lsd.enable_channel(ch)?;
        Ok(())
    }

    // --- flash ------------------------------------------------------------

    /// Read the coprocessor flash chip identifiers.
    pub fn flash_id(&mut self) -> Result<FlashId> {
        let reply = self.execute_command(&Command::FlashId, timeouts::DEFAULT)?;
        FlashId::decode(&reply)
    }

    /// Erase one flash sector.
    pub fn flash_erase(&mut self, sector: u16) -> Result<()> {
        self.execute_command(&Command::FlashErase { sector }, timeouts::FLASH)?;
        Ok(())
    }

    /// Read `len` bytes of coprocessor flash at `addr`.
    pub fn flash_read(&mut self, addr: u32, len: u16) -> Result<Bytes> {
        self.execute_command(&Command::FlashRead { addr, len }, timeouts::DEFAULT)
    }

    /// Program flash at `addr`.
    pub fn flash_write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.execute_command(&Command::FlashWrite { addr, data }, timeouts::FLASH)?;
        Ok(())
    }

    // --- http -------------------------------------------------------------

    /// Set the URL for the next HTTP request.
    pub fn http_url_set(&mut self, url: &str) -> Result<()> {
        self.execute_command(&Command::HttpUrlSet(url), timeouts::DEFAULT)?;
        Ok(())
    }

    /// Set the method for the next HTTP request.
    pub fn http_method_set(&mut self, method: HttpMethod) -> Result<()> {
        self.execute_command(&Command::HttpMethodSet(method), timeouts::DEFAULT)?;
        Ok(())
    }

    /// Start the configured HTTP request. Body bytes (if any) follow on the
    /// HTTP channel via [`Session::send_data`].
    pub fn http_open(&mut self, body_len: u32) -> Result<()> {
        self.execute_command(&Command::HttpOpen { body_len }, timeouts::HTTP)?;
        self.lsd.enable_channel(HTTP_CHANNEL)?;
        Ok(())
    }

    /// Wait for the HTTP request to complete. The response body arrives on
    /// the HTTP channel via [`Session::recv_data`].
    pub fn http_finish(&mut self) -> Result<HttpStatus> {
        let reply = self.execute_command(&Command::HttpFinish, timeouts::HTTP)?;
        HttpStatus::decode(&reply)
    }

    // --- bulk data --------------------------------------------------------

    /// Send payload bytes on a data channel, bypassing the command buffer.
    ///
    /// Chunks to the transport's buffer size and pumps each chunk out under
    /// one shared tick budget.
    pub fn send_data(&mut self, ch: u8, data: &[u8], timeout: u16) -> Result<()> {
        self.check_ready()?;
        if !self.lsd.channel_enabled(ch) || ch == CTRL_CHANNEL {
            return Err(SessionError::BadParam);
        }
        let chunk_len = self
            .lsd
            .link()
            .buffer_len()
            .min(MAX_PAYLOAD)
            .max(1);
        let mut remaining = timeout;
        for chunk in data.chunks(chunk_len) {
            self.lsd
                .send(ch, chunk)
                .map_err(|_| SessionError::SendFailed)?;
            loop {
                self.lsd.process().map_err(|_| SessionError::SendFailed)?;
                self.drain_unsolicited();
                if self.lsd.send_idle() {
                    break;
                }
                if remaining == 0 {
                    return Err(SessionError::SendFailed);
                }
                self.sched.user_yield();
                remaining -= 1;
            }
        }
        Ok(())
    }

    /// Wait for one frame on any enabled channel.
    ///
    /// A frame longer than the internal buffer is delivered in successive
    /// calls; each call returns the next piece.
    pub fn recv_data(&mut self, timeout: u16) -> Result<Frame> {
        self.check_ready()?;
        let mut remaining = timeout;
        if !self.lsd.recv_pending() || self.lsd.recv_parked() {
            self.lsd.recv(CMD_CAPACITY)?;
        }
        loop {
            self.lsd.process()?;
            match self.lsd.next_event() {
                Some(LsdEvent::Frame(frame)) | Some(LsdEvent::Partial(frame)) => {
                    return Ok(frame);
                }
                Some(LsdEvent::FramingError(err)) => {
                    warn!(error = %err, "framing error while receiving data");
                    return Err(SessionError::RecvFailed);
                }
                None => {}
            }
            if remaining == 0 {
                return Err(SessionError::RecvTimeout);
            }
            if self.sched.super_pend(remaining) == Wake::TimedOut {
                remaining = 0;
            }
        }
    }

    fn check_data_channel(ch: u8) -> Result<()> {
        if ch == CTRL_CHANNEL || !megalink_frame::is_valid_channel(ch) {
            return Err(SessionError::BadParam);
        }
        Ok(())
    }
}
