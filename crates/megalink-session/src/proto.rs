//! Wire encoding of the command/reply protocol spoken on the control
//! channel.
//!
//! Every message is a 2-byte big-endian opcode, a 2-byte big-endian payload
//! length, and the payload, all inside one fixed-size buffer shared between
//! a request and its reply. A reply opcode of [`opcode::OK`] means success;
//! anything else is a protocol error.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, SessionError};

/// Command/reply header: opcode (2) + payload length (2).
pub const CMD_HEADER: usize = 4;

/// Size of the shared command buffer — the coprocessor-side buffer size.
pub const CMD_CAPACITY: usize = 1460;

/// Number of stored access-point configuration slots.
pub const AP_SLOTS: u8 = 3;

/// Command and reply opcodes.
pub mod opcode {
    /// Reply status: success.
    pub const OK: u16 = 0x0000;
    pub const VERSION: u16 = 0x0001;
    pub const ECHO: u16 = 0x0002;
    pub const AP_SCAN: u16 = 0x0003;
    pub const AP_JOIN: u16 = 0x0004;
    pub const AP_LEAVE: u16 = 0x0005;
    pub const SYS_STAT: u16 = 0x0006;
    pub const TCP_CON: u16 = 0x0007;
    pub const TCP_BIND: u16 = 0x0008;
    pub const SOCK_CLOSE: u16 = 0x0009;
    pub const UDP_SET: u16 = 0x000A;
    pub const SOCK_STAT: u16 = 0x000B;
    pub const FLASH_ID: u16 = 0x000C;
    pub const FLASH_ERASE: u16 = 0x000D;
    pub const FLASH_READ: u16 = 0x000E;
    pub const FLASH_WRITE: u16 = 0x000F;
    pub const HTTP_URL_SET: u16 = 0x0010;
    pub const HTTP_METHOD_SET: u16 = 0x0011;
    pub const HTTP_OPEN: u16 = 0x0012;
    pub const HTTP_FINISH: u16 = 0x0013;
    /// Reply status: generic failure.
    pub const ERR: u16 = 0xFFFF;
}

/// HTTP method for the HTTP passthrough channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_u8(self) -> u8 {
        match self {
            HttpMethod::Get => 0,
            HttpMethod::Post => 1,
            HttpMethod::Put => 2,
            HttpMethod::Delete => 3,
        }
    }
}

/// One request to the coprocessor, one variant per opcode.
#[derive(Debug)]
pub enum Command<'a> {
    Version,
    Echo(&'a [u8]),
    ApScan,
    ApJoin { slot: u8 },
    ApLeave,
    SysStatus,
    TcpConnect { ch: u8, host: &'a str, port: u16 },
    TcpBind { ch: u8, port: u16 },
    Close { ch: u8 },
    UdpSet { ch: u8, peer: &'a str, dst_port: u16, src_port: u16 },
    SockStatus { ch: u8 },
    FlashId,
    FlashErase { sector: u16 },
    FlashRead { addr: u32, len: u16 },
    FlashWrite { addr: u32, data: &'a [u8] },
    HttpUrlSet(&'a str),
    HttpMethodSet(HttpMethod),
    HttpOpen { body_len: u32 },
    HttpFinish,
}

impl Command<'_> {
    pub fn opcode(&self) -> u16 {
        match self {
            Command::Version => opcode::VERSION,
            Command::Echo(_) => opcode::ECHO,
            Command::ApScan => opcode::AP_SCAN,
            Command::ApJoin { .. } => opcode::AP_JOIN,
            Command::ApLeave => opcode::AP_LEAVE,
            Command::SysStatus => opcode::SYS_STAT,
            Command::TcpConnect { .. } => opcode::TCP_CON,
            Command::TcpBind { .. } => opcode::TCP_BIND,
            Command::Close { .. } => opcode::SOCK_CLOSE,
            Command::UdpSet { .. } => opcode::UDP_SET,
            Command::SockStatus { .. } => opcode::SOCK_STAT,
            Command::FlashId => opcode::FLASH_ID,
            Command::FlashErase { .. } => opcode::FLASH_ERASE,
            Command::FlashRead { .. } => opcode::FLASH_READ,
            Command::FlashWrite { .. } => opcode::FLASH_WRITE,
            Command::HttpUrlSet(_) => opcode::HTTP_URL_SET,
            Command::HttpMethodSet(_) => opcode::HTTP_METHOD_SET,
            Command::HttpOpen { .. } => opcode::HTTP_OPEN,
            Command::HttpFinish => opcode::HTTP_FINISH,
        }
    }

    /// Encode opcode, length and payload into `dst` (cleared first).
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.clear();
        dst.put_u16(self.opcode());
        dst.put_u16(0);
        self.put_payload(dst)?;
        if dst.len() > CMD_CAPACITY {
            return Err(SessionError::BadParam);
        }
        let len = (dst.len() - CMD_HEADER) as u16;
        dst[2..4].copy_from_slice(&len.to_be_bytes());
        Ok(())
    }

    fn put_payload(&self, dst: &mut BytesMut) -> Result<()> {
        match *self {
            Command::Version
            | Command::ApScan
            | Command::ApLeave
            | Command::SysStatus
            | Command::FlashId
            | Command::HttpFinish => {}
            Command::Echo(data) => dst.put_slice(data),
            Command::ApJoin { slot } => {
                if slot >= AP_SLOTS {
                    return Err(SessionError::BadParam);
                }
                dst.put_u8(slot);
            }
            Command::TcpConnect { ch, host, port } => {
                dst.put_u8(ch);
                dst.put_u16(port);
                put_str(dst, host)?;
            }
            Command::TcpBind { ch, port } => {
                dst.put_u8(ch);
                dst.put_u16(port);
            }
            Command::Close { ch } | Command::SockStatus { ch } => dst.put_u8(ch),
            Command::UdpSet {
                ch,
                peer,
                dst_port,
                src_port,
            } => {
                dst.put_u8(ch);
                dst.put_u16(dst_port);
                dst.put_u16(src_port);
                put_str(dst, peer)?;
            }
            Command::FlashErase { sector } => dst.put_u16(sector),
            Command::FlashRead { addr, len } => {
                if len as usize > CMD_CAPACITY - CMD_HEADER {
                    return Err(SessionError::BadParam);
                }
                dst.put_u32(addr);
                dst.put_u16(len);
            }
            Command::FlashWrite { addr, data } => {
                dst.put_u32(addr);
                dst.put_slice(data);
            }
            Command::HttpUrlSet(url) => put_str(dst, url)?,
            Command::HttpMethodSet(method) => dst.put_u8(method.as_u8()),
            Command::HttpOpen { body_len } => dst.put_u32(body_len),
        }
        Ok(())
    }
}

fn put_str(dst: &mut BytesMut, s: &str) -> Result<()> {
    if s.is_empty() || s.len() > u8::MAX as usize {
        return Err(SessionError::BadParam);
    }
    dst.put_u8(s.len() as u8);
    dst.put_slice(s.as_bytes());
    Ok(())
}

/// Split a raw control-channel message into opcode and payload.
pub fn split_message(raw: &[u8]) -> Result<(u16, &[u8])> {
    if raw.len() < CMD_HEADER {
        return Err(SessionError::RecvFailed);
    }
    let op = u16::from_be_bytes([raw[0], raw[1]]);
    let len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    if raw.len() < CMD_HEADER + len {
        return Err(SessionError::RecvFailed);
    }
    Ok((op, &raw[CMD_HEADER..CMD_HEADER + len]))
}

/// Check a reply's status opcode and return its payload.
pub fn decode_reply(raw: &Bytes) -> Result<Bytes> {
    if raw.len() < CMD_HEADER {
        return Err(SessionError::RecvFailed);
    }
    let op = u16::from_be_bytes([raw[0], raw[1]]);
    let len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    if raw.len() < CMD_HEADER + len {
        return Err(SessionError::RecvFailed);
    }
    if op != opcode::OK {
        return Err(SessionError::Failed);
    }
    Ok(raw.slice(CMD_HEADER..CMD_HEADER + len))
}

/// Encode a reply message (used by coprocessor implementations).
pub fn encode_reply(status: u16, payload: &[u8], dst: &mut BytesMut) {
    dst.clear();
    dst.put_u16(status);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
}

/// Coprocessor firmware version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
    /// Firmware variant string, e.g. "std".
    pub variant: String,
}

impl Version {
    /// Decode from a reply payload: three version bytes followed by a
    /// NUL-terminated variant string.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 3 {
            return Err(SessionError::RecvFailed);
        }
        let rest = &payload[3..];
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let variant = String::from_utf8(rest[..end].to_vec())
            .map_err(|_| SessionError::RecvFailed)?;
        Ok(Self {
            major: payload[0],
            minor: payload[1],
            micro: payload[2],
            variant,
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}-{}", self.major, self.minor, self.micro, self.variant)
    }
}

/// Security mode of a scanned access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApSecurity {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    Unknown(u8),
}

impl From<u8> for ApSecurity {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ApSecurity::Open,
            1 => ApSecurity::Wep,
            2 => ApSecurity::WpaPsk,
            3 => ApSecurity::Wpa2Psk,
            other => ApSecurity::Unknown(other),
        }
    }
}

/// One access point from a scan reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApEntry {
    pub rssi: i8,
    pub security: ApSecurity,
    pub ssid: String,
}

/// Decode a scan reply: repeated `(rssi, security, ssid_len, ssid)` records.
pub fn decode_scan(payload: &[u8]) -> Result<Vec<ApEntry>> {
    let mut entries = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        if rest.len() < 3 {
            return Err(SessionError::RecvFailed);
        }
        let rssi = rest[0] as i8;
        let security = ApSecurity::from(rest[1]);
        let ssid_len = rest[2] as usize;
        if rest.len() < 3 + ssid_len {
            return Err(SessionError::RecvFailed);
        }
        let ssid = String::from_utf8(rest[3..3 + ssid_len].to_vec())
            .map_err(|_| SessionError::RecvFailed)?;
        entries.push(ApEntry {
            rssi,
            security,
            ssid,
        });
        rest = &rest[3 + ssid_len..];
    }
    Ok(entries)
}

/// Coprocessor system state reported by `SYS_STAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysState {
    /// Idle, not associated.
    Idle,
    /// Scanning for networks.
    Scanning,
    /// Association in progress.
    Joining,
    /// Associated and online.
    Ready,
}

impl SysState {
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(SysState::Idle),
            1 => Ok(SysState::Scanning),
            2 => Ok(SysState::Joining),
            3 => Ok(SysState::Ready),
            _ => Err(SessionError::RecvFailed),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SysState::Idle => 0,
            SysState::Scanning => 1,
            SysState::Joining => 2,
            SysState::Ready => 3,
        }
    }
}

/// `SYS_STAT` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysStatus {
    pub state: SysState,
    pub flags: u8,
}

impl SysStatus {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(SessionError::RecvFailed);
        }
        Ok(Self {
            state: SysState::from_u8(payload[0])?,
            flags: payload[1],
        })
    }
}

/// State of one socket channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockState {
    Closed,
    Listening,
    Connected,
}

impl SockState {
    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(SockState::Closed),
            1 => Ok(SockState::Listening),
            2 => Ok(SockState::Connected),
            _ => Err(SessionError::RecvFailed),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SockState::Closed => 0,
            SockState::Listening => 1,
            SockState::Connected => 2,
        }
    }
}

/// `FLASH_ID` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashId {
    pub manufacturer: u8,
    pub device: u16,
}

impl FlashId {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 3 {
            return Err(SessionError::RecvFailed);
        }
        Ok(Self {
            manufacturer: payload[0],
            device: u16::from_be_bytes([payload[1], payload[2]]),
        })
    }
}

/// `HTTP_FINISH` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpStatus {
    /// HTTP status code.
    pub code: u16,
    /// Length of the response body waiting on the HTTP channel.
    pub body_len: u32,
}

impl HttpStatus {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 6 {
            return Err(SessionError::RecvFailed);
        }
        Ok(Self {
            code: u16::from_be_bytes([payload[0], payload[1]]),
            body_len: u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_encoding_is_wire_exact() {
        let mut buf = BytesMut::new();
        Command::ApJoin { slot: 1 }.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x00, 0x04, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn empty_payload_command() {
        let mut buf = BytesMut::new();
        Command::Version.encode(&mut buf).unwrap();
        assert_eq!(buf.as_ref(), &[0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn tcp_connect_encoding() {
        let mut buf = BytesMut::new();
        Command::TcpConnect {
            ch: 1,
            host: "example.com",
            port: 443,
        }
        .encode(&mut buf)
        .unwrap();

        let (op, payload) = split_message(&buf).unwrap();
        assert_eq!(op, opcode::TCP_CON);
        assert_eq!(payload[0], 1);
        assert_eq!(u16::from_be_bytes([payload[1], payload[2]]), 443);
        assert_eq!(payload[3] as usize, "example.com".len());
        assert_eq!(&payload[4..], b"example.com");
    }

    #[test]
    fn bad_slot_rejected() {
        let mut buf = BytesMut::new();
        let err = Command::ApJoin { slot: AP_SLOTS }.encode(&mut buf).unwrap_err();
        assert!(matches!(err, SessionError::BadParam));
    }

    #[test]
    fn oversize_echo_rejected() {
        let data = vec![0u8; CMD_CAPACITY];
        let mut buf = BytesMut::new();
        let err = Command::Echo(&data).encode(&mut buf).unwrap_err();
        assert!(matches!(err, SessionError::BadParam));
    }

    #[test]
    fn reply_ok_passes_payload_through() {
        let mut buf = BytesMut::new();
        encode_reply(opcode::OK, &[1, 2, 3], &mut buf);
        let payload = decode_reply(&buf.freeze()).unwrap();
        assert_eq!(payload.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn reply_error_status_is_failure() {
        let mut buf = BytesMut::new();
        encode_reply(opcode::ERR, &[], &mut buf);
        let err = decode_reply(&buf.freeze()).unwrap_err();
        assert!(matches!(err, SessionError::Failed));
    }

    #[test]
    fn truncated_reply_rejected() {
        let raw = Bytes::from_static(&[0x00, 0x00, 0x00]);
        assert!(matches!(
            decode_reply(&raw),
            Err(SessionError::RecvFailed)
        ));

        let short = Bytes::from_static(&[0x00, 0x00, 0x00, 0x05, 0x01]);
        assert!(matches!(
            decode_reply(&short),
            Err(SessionError::RecvFailed)
        ));
    }

    #[test]
    fn version_decodes_with_nul_terminated_variant() {
        let version = Version::decode(&[1, 5, 0, b's', b't', b'd', 0]).unwrap();
        assert_eq!(version.major, 1);
        assert_eq!(version.minor, 5);
        assert_eq!(version.micro, 0);
        assert_eq!(version.variant, "std");
        assert_eq!(version.to_string(), "1.5.0-std");
    }

    #[test]
    fn scan_reply_decodes_records() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[(-40i8) as u8, 3, 4]);
        payload.extend_from_slice(b"home");
        payload.extend_from_slice(&[(-70i8) as u8, 0, 5]);
        payload.extend_from_slice(b"guest");

        let entries = decode_scan(&payload).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].rssi, -40);
        assert_eq!(entries[0].security, ApSecurity::Wpa2Psk);
        assert_eq!(entries[0].ssid, "home");
        assert_eq!(entries[1].security, ApSecurity::Open);
    }

    #[test]
    fn truncated_scan_record_rejected() {
        let payload = [(-40i8) as u8, 3, 10, b'x'];
        assert!(matches!(
            decode_scan(&payload),
            Err(SessionError::RecvFailed)
        ));
    }

    #[test]
    fn sys_status_round_trips_states() {
        for state in [
            SysState::Idle,
            SysState::Scanning,
            SysState::Joining,
            SysState::Ready,
        ] {
            let status = SysStatus::decode(&[state.as_u8(), 0]).unwrap();
            assert_eq!(status.state, state);
        }
        assert!(SysStatus::decode(&[9, 0]).is_err());
    }

    #[test]
    fn http_status_decodes() {
        let status = HttpStatus::decode(&[0x00, 0xC8, 0x00, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(status.code, 200);
        assert_eq!(status.body_len, 256);
    }
}
