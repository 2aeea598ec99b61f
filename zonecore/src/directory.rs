//! Directory-publisher beacon payload (spec.md §6 "Directory publishing").
//! Building the datagram is in scope; opening the socket and scheduling the
//! every-60s send is an external collaborator's job (spec.md §1 Non-goals).

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};
use std::time::Duration;

pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(60);
const PROTOCOL_VERSION: u16 = 134;

/// One zone's directory-listing beacon. `name`, `password`, and
/// `description` are written as NUL-terminated strings, matching the
/// teacher's `write_cstring` convention in `neutronium::net::frame`.
#[derive(Debug, Clone)]
pub struct Beacon {
    pub port: u16,
    pub players: u16,
    pub scorekeeping: bool,
    pub name: String,
    pub password: String,
    pub description: String,
}

impl Beacon {
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(self.port)?;
        w.write_u16::<LittleEndian>(self.players)?;
        w.write_u8(if self.scorekeeping { 1 } else { 0 })?;
        w.write_u16::<LittleEndian>(PROTOCOL_VERSION)?;
        write_cstring(w, &self.name)?;
        write_cstring(w, &self.password)?;
        write_cstring(w, &self.description)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write(&mut buf).expect("writing to a Vec never fails");
        buf
    }
}

fn write_cstring<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(s.as_bytes())?;
    w.write_all(&[0])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Beacon {
        Beacon {
            port: 5000,
            players: 12,
            scorekeeping: true,
            name: "zone".to_string(),
            password: String::new(),
            description: "a test zone".to_string(),
        }
    }

    #[test]
    fn beacon_header_matches_wire_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 5000);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 12);
        assert_eq!(bytes[8], 1);
        assert_eq!(u16::from_le_bytes([bytes[9], bytes[10]]), 134);
    }

    #[test]
    fn strings_are_nul_terminated_in_order() {
        let bytes = sample().to_bytes();
        let tail = &bytes[11..];
        let mut parts = tail.split(|&b| b == 0);
        assert_eq!(parts.next(), Some(&b"zone"[..]));
        assert_eq!(parts.next(), Some(&b""[..]));
        assert_eq!(parts.next(), Some(&b"a test zone"[..]));
    }

    #[test]
    fn no_scorekeeping_writes_zero_byte() {
        let mut beacon = sample();
        beacon.scorekeeping = false;
        let bytes = beacon.to_bytes();
        assert_eq!(bytes[8], 0);
    }
}
