//! Packet framing and the handful of application packets the core itself
//! originates or consumes (spec.md §6). All integers are little-endian on
//! the wire, per spec; the error taxonomy is the teacher's
//! `NetworkError`/`ErrorType` split (`flux::shared` in the teacher repo),
//! generalized so `Wait` means "short read, try again" for datagram framing
//! rather than "would block on a stream".

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    /// Not enough bytes to decode yet; never surfaced past the worker that
    /// owns the datagram.
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    Truncated,
    UnknownFrameKind,
    MalformedGroup,
    OversizedPacket,
    SequenceMismatch,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(err: io::Error) -> NetworkError {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

/// Maximum declared length for a big-packet fragment set (spec.md §4.3
/// "Big packets"); exceeding it is `OversizedPacket`.
pub const MAX_BIG_PACKET: u32 = 1024 * 1024;

/// Framing packets all share first byte `0x00`; the second byte selects
/// the kind (spec.md §6).
#[derive(Debug, Eq, PartialEq)]
pub enum Frame<'a> {
    ConnectionInit { client_kind: u8, key: i32 },
    ConnectionResponse { key: i32 },
    Reliable { sequence: u32, payload: &'a [u8] },
    Ack { sequence: u32 },
    Grouped { entries: Vec<&'a [u8]> },
    BigPacketFragment { total_len: u32, offset: u32, payload: &'a [u8] },
    Disconnect,
    /// Not a framing packet at all: first byte was non-zero, so the whole
    /// datagram is an application packet.
    Application(&'a [u8]),
}

const KIND_CONNECTION_INIT: u8 = 0x01;
const KIND_CONNECTION_RESPONSE: u8 = 0x02;
const KIND_RELIABLE: u8 = 0x03;
const KIND_ACK: u8 = 0x04;
const KIND_GROUPED: u8 = 0x05;
const KIND_BIG_PACKET: u8 = 0x06;
const KIND_DISCONNECT: u8 = 0x07;

impl<'a> Frame<'a> {
    pub fn parse(datagram: &'a [u8]) -> NetworkResult<Frame<'a>> {
        if datagram.is_empty() {
            return Err(NetworkError::Wait);
        }

        if datagram[0] != 0x00 {
            return Ok(Frame::Application(datagram));
        }

        let mut body = datagram.get(2..).ok_or(NetworkError::Wait)?;
        let kind = *datagram.get(1).ok_or(NetworkError::Wait)?;

        Ok(match kind {
            KIND_CONNECTION_INIT => {
                if body.len() < 6 {
                    return Err(NetworkError::Wait);
                }
                let client_kind = body.read_u8()?;
                let key = body.read_i32::<LittleEndian>()?;
                Frame::ConnectionInit { client_kind, key }
            }
            KIND_CONNECTION_RESPONSE => Frame::ConnectionResponse {
                key: body.read_i32::<LittleEndian>()?,
            },
            KIND_RELIABLE => {
                let sequence = body.read_u32::<LittleEndian>()?;
                Frame::Reliable { sequence, payload: &body[4..] }
            }
            KIND_ACK => Frame::Ack {
                sequence: body.read_u32::<LittleEndian>()?,
            },
            KIND_GROUPED => Frame::Grouped {
                entries: parse_grouped(body)?,
            },
            KIND_BIG_PACKET => {
                let total_len = body.read_u32::<LittleEndian>()?;
                let offset = body.read_u32::<LittleEndian>()?;
                if total_len > MAX_BIG_PACKET {
                    return Err(NetworkError::Fatal(ErrorType::OversizedPacket));
                }
                Frame::BigPacketFragment { total_len, offset, payload: &body[8..] }
            }
            KIND_DISCONNECT => Frame::Disconnect,
            _ => return Err(NetworkError::Fatal(ErrorType::UnknownFrameKind)),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> io::Result<()> {
        match self {
            Frame::ConnectionInit { client_kind, key } => {
                out.write_u8(0x00)?;
                out.write_u8(KIND_CONNECTION_INIT)?;
                out.write_u8(*client_kind)?;
                out.write_i32::<LittleEndian>(*key)?;
                out.write_u8(0)?;
            }
            Frame::ConnectionResponse { key } => {
                out.write_u8(0x00)?;
                out.write_u8(KIND_CONNECTION_RESPONSE)?;
                out.write_i32::<LittleEndian>(*key)?;
            }
            Frame::Reliable { sequence, payload } => {
                out.write_u8(0x00)?;
                out.write_u8(KIND_RELIABLE)?;
                out.write_u32::<LittleEndian>(*sequence)?;
                out.extend_from_slice(payload);
            }
            Frame::Ack { sequence } => {
                out.write_u8(0x00)?;
                out.write_u8(KIND_ACK)?;
                out.write_u32::<LittleEndian>(*sequence)?;
            }
            Frame::Grouped { entries } => {
                out.write_u8(0x00)?;
                out.write_u8(KIND_GROUPED)?;
                for entry in entries {
                    out.write_u8(entry.len() as u8)?;
                    out.extend_from_slice(entry);
                }
            }
            Frame::BigPacketFragment { total_len, offset, payload } => {
                out.write_u8(0x00)?;
                out.write_u8(KIND_BIG_PACKET)?;
                out.write_u32::<LittleEndian>(*total_len)?;
                out.write_u32::<LittleEndian>(*offset)?;
                out.extend_from_slice(payload);
            }
            Frame::Disconnect => {
                out.write_u8(0x00)?;
                out.write_u8(KIND_DISCONNECT)?;
            }
            Frame::Application(payload) => out.extend_from_slice(payload),
        }
        Ok(())
    }
}

/// Splits a grouped-packet body strictly on the embedded 1-byte lengths. A
/// malformed inner length (one that overruns the body) drops the whole
/// group (spec.md §4.3 "a malformed inner length drops the whole group").
fn parse_grouped(mut body: &[u8]) -> NetworkResult<Vec<&[u8]>> {
    let mut entries = Vec::new();

    while !body.is_empty() {
        let len = body[0] as usize;
        if body.len() < 1 + len {
            return Err(NetworkError::Fatal(ErrorType::MalformedGroup));
        }
        entries.push(&body[1..1 + len]);
        body = &body[1 + len..];
    }

    Ok(entries)
}

/// Opportunistically coalesces `packets` into as few grouped frames as fit
/// under `mtu` (spec.md §4.3 "Grouped packets").
pub fn coalesce_grouped<'a>(packets: &[&'a [u8]], mtu: usize) -> Vec<Vec<&'a [u8]>> {
    const GROUP_HEADER: usize = 2;
    let mut groups = Vec::new();
    let mut current: Vec<&[u8]> = Vec::new();
    let mut current_size = GROUP_HEADER;

    for &packet in packets {
        let entry_size = 1 + packet.len();
        if !current.is_empty() && current_size + entry_size > mtu {
            groups.push(std::mem::take(&mut current));
            current_size = GROUP_HEADER;
        }
        current.push(packet);
        current_size += entry_size;
    }

    if !current.is_empty() {
        groups.push(current);
    }

    groups
}

fn read_fixed_str<R: io::Read>(reader: &mut R, len: usize) -> io::Result<String> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn write_fixed_str<W: io::Write>(writer: &mut W, s: &str, len: usize) -> io::Result<()> {
    let mut buf = vec![0u8; len];
    let bytes = s.as_bytes();
    let copy_len = bytes.len().min(len);
    buf[..copy_len].copy_from_slice(&bytes[..copy_len]);
    writer.write_all(&buf)
}

/// C2S 0x01/0x24 login (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPacket {
    pub modern: bool,
    pub name: String,
    pub password: String,
    pub machine_id: u32,
    pub client_version: u16,
}

impl LoginPacket {
    pub fn parse(datagram: &[u8]) -> NetworkResult<LoginPacket> {
        if datagram.len() < 71 {
            return Err(NetworkError::Wait);
        }
        let modern = datagram[0] == 0x24;
        let mut reader = &datagram[1..];
        let name = read_fixed_str(&mut reader, 32)?;
        let password = read_fixed_str(&mut reader, 32)?;
        let machine_id = reader.read_u32::<LittleEndian>()?;
        let client_version = reader.read_u16::<LittleEndian>()?;
        Ok(LoginPacket { modern, name, password, machine_id, client_version })
    }

    pub fn write(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u8(if self.modern { 0x24 } else { 0x01 })?;
        write_fixed_str(out, &self.name, 32)?;
        write_fixed_str(out, &self.password, 32)?;
        out.write_u32::<LittleEndian>(self.machine_id)?;
        out.write_u16::<LittleEndian>(self.client_version)?;
        Ok(())
    }
}

/// S2C 0x0A login response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginResponseCode {
    Ok = 0,
    CustomText = 1,
    BadPassword = 2,
    ArenaFull = 3,
    Banned = 9,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub code: LoginResponseCode,
    pub server_version: u32,
    pub map_checksum: u32,
    pub code_checksum: u32,
    pub news_checksum: u32,
    pub custom_text: Option<String>,
}

impl LoginResponse {
    pub fn write(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u8(0x0A)?;
        out.write_u8(self.code as u8)?;
        out.write_u32::<LittleEndian>(self.server_version)?;
        out.write_u32::<LittleEndian>(self.map_checksum)?;
        out.write_u32::<LittleEndian>(self.code_checksum)?;
        out.write_u32::<LittleEndian>(self.news_checksum)?;
        if let Some(text) = &self.custom_text {
            let truncated = &text.as_bytes()[..text.len().min(255)];
            out.push(truncated.len() as u8);
            out.extend_from_slice(truncated);
        }
        Ok(())
    }
}

/// S2C 0x18 security challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityChallenge {
    pub green_seed: u32,
    pub door_seed: u32,
    pub timestamp: u32,
    pub key: u32,
}

impl SecurityChallenge {
    pub fn write(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u8(0x18)?;
        out.write_u32::<LittleEndian>(self.green_seed)?;
        out.write_u32::<LittleEndian>(self.door_seed)?;
        out.write_u32::<LittleEndian>(self.timestamp)?;
        out.write_u32::<LittleEndian>(self.key)?;
        Ok(())
    }
}

/// C2S 0x1A security response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityResponse {
    pub weapon_count: u32,
    pub slow_frame: u32,
    pub fast_frame: u32,
    pub slow_e_frame: u32,
    pub fast_e_frame: u32,
    pub map_checksum: u32,
    pub exe_checksum: u32,
    pub settings_checksum: u32,
    pub ping_s2c_slow: u32,
    pub ping_s2c_fast: u32,
    pub ping_c2s_slow: u32,
    pub ping_c2s_fast: u32,
}

impl SecurityResponse {
    pub fn parse(datagram: &[u8]) -> NetworkResult<SecurityResponse> {
        if datagram.len() < 49 {
            return Err(NetworkError::Wait);
        }
        let mut reader = &datagram[1..];
        Ok(SecurityResponse {
            weapon_count: reader.read_u32::<LittleEndian>()?,
            slow_frame: reader.read_u32::<LittleEndian>()?,
            fast_frame: reader.read_u32::<LittleEndian>()?,
            slow_e_frame: reader.read_u32::<LittleEndian>()?,
            fast_e_frame: reader.read_u32::<LittleEndian>()?,
            map_checksum: reader.read_u32::<LittleEndian>()?,
            exe_checksum: reader.read_u32::<LittleEndian>()?,
            settings_checksum: reader.read_u32::<LittleEndian>()?,
            ping_s2c_slow: reader.read_u32::<LittleEndian>()?,
            ping_s2c_fast: reader.read_u32::<LittleEndian>()?,
            ping_c2s_slow: reader.read_u32::<LittleEndian>()?,
            ping_c2s_fast: reader.read_u32::<LittleEndian>()?,
        })
    }
}

/// S2C 0x07 arena message: the SIGUSR2 "broadcast a line from the MESSAGE
/// file" action (spec.md §6). Deliberately minimal — chat type, sound code
/// and originating pid are the chat formatter's job, a Non-goal here — so
/// this just carries the raw line to every connected client.
pub struct ArenaMessage<'a> {
    pub text: &'a str,
}

impl<'a> ArenaMessage<'a> {
    pub fn write(&self, out: &mut Vec<u8>) -> io::Result<()> {
        out.write_u8(0x07)?;
        out.extend_from_slice(self.text.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliable_frame_roundtrips() {
        let frame = Frame::Reliable { sequence: 42, payload: b"hello" };
        let mut buf = Vec::new();
        frame.write(&mut buf).unwrap();

        match Frame::parse(&buf).unwrap() {
            Frame::Reliable { sequence, payload } => {
                assert_eq!(sequence, 42);
                assert_eq!(payload, b"hello");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn ack_frame_roundtrips() {
        let frame = Frame::Ack { sequence: 7 };
        let mut buf = Vec::new();
        frame.write(&mut buf).unwrap();
        assert_eq!(Frame::parse(&buf).unwrap(), Frame::Ack { sequence: 7 });
    }

    #[test]
    fn application_packet_is_not_framing() {
        let datagram = [0x01u8, 0xAA, 0xBB];
        assert_eq!(Frame::parse(&datagram).unwrap(), Frame::Application(&datagram));
    }

    #[test]
    fn grouped_frame_splits_on_embedded_lengths() {
        let frame = Frame::Grouped { entries: vec![b"ab", b"cde"] };
        let mut buf = Vec::new();
        frame.write(&mut buf).unwrap();

        match Frame::parse(&buf).unwrap() {
            Frame::Grouped { entries } => assert_eq!(entries, vec![&b"ab"[..], &b"cde"[..]]),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn malformed_grouped_length_drops_whole_group() {
        // Claims a 200-byte entry but only 2 bytes follow.
        let datagram = [0x00u8, KIND_GROUPED, 200, b'h', b'i'];
        assert_eq!(
            Frame::parse(&datagram).unwrap_err(),
            NetworkError::Fatal(ErrorType::MalformedGroup)
        );
    }

    #[test]
    fn oversized_big_packet_is_rejected() {
        let mut datagram = vec![0x00u8, KIND_BIG_PACKET];
        datagram.extend_from_slice(&(MAX_BIG_PACKET + 1).to_le_bytes());
        datagram.extend_from_slice(&0u32.to_le_bytes());

        assert_eq!(
            Frame::parse(&datagram).unwrap_err(),
            NetworkError::Fatal(ErrorType::OversizedPacket)
        );
    }

    #[test]
    fn unknown_frame_kind_is_fatal() {
        let datagram = [0x00u8, 0xEE];
        assert_eq!(
            Frame::parse(&datagram).unwrap_err(),
            NetworkError::Fatal(ErrorType::UnknownFrameKind)
        );
    }

    #[test]
    fn coalesce_respects_mtu() {
        let packets: Vec<&[u8]> = vec![b"aaaa", b"bbbb", b"cccc"];
        let groups = coalesce_grouped(&packets, 10);
        assert!(groups.len() > 1);
        for group in &groups {
            let size: usize = 2 + group.iter().map(|p| 1 + p.len()).sum::<usize>();
            assert!(size <= 10 || group.len() == 1);
        }
    }

    #[test]
    fn arena_message_carries_the_raw_line() {
        let mut buf = Vec::new();
        ArenaMessage { text: "server restarting in 5 minutes" }.write(&mut buf).unwrap();
        assert_eq!(buf[0], 0x07);
        assert_eq!(&buf[1..], b"server restarting in 5 minutes");
    }

    #[test]
    fn login_packet_roundtrips() {
        let login = LoginPacket {
            modern: false,
            name: "Alice".to_string(),
            password: String::new(),
            machine_id: 0xDEADBEEF,
            client_version: 1,
        };
        let mut buf = Vec::new();
        login.write(&mut buf).unwrap();
        let parsed = LoginPacket::parse(&buf).unwrap();
        assert_eq!(parsed, login);
    }
}
