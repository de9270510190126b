// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lowest protocol layer: framing and unframing handshake lines.

use bytes::{Buf as _, BufMut, BytesMut};
use pretty_hex::PrettyHex as _;

const SEPARATOR: u8 = b'*';

/// A valid line packet, or bytes representing an invalid packet.
///
/// It's guaranteed that any decoded sequence of packets encodes into exactly the same bytes,
/// or vice versa.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Line(LinePacket),
    Invalid(InvalidPacket),
}

impl Packet {
    /// Attempts to decode and remove a packet from the start of `src`.
    ///
    /// 1.  If `src` starts with a full, valid line, returns `Some(Packet::Line(_))`.
    /// 2.  If `src` contains no line feed yet and is shorter than the longest legal line,
    ///     returns `None`.
    /// 3.  Otherwise returns `Some(Packet::Invalid(_))`, consuming through the next line feed
    ///     (or [`LinePacket::MAX_FRAMED_LEN`] bytes if there is none) so the next call starts
    ///     on a fresh line.
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        let window = &src[..std::cmp::min(src.len(), LinePacket::MAX_FRAMED_LEN)];
        let end = match memchr::memchr(b'\n', window) {
            Some(i) => i + 1,
            None if src.len() >= LinePacket::MAX_FRAMED_LEN => {
                let raw = src[..LinePacket::MAX_FRAMED_LEN].to_owned();
                src.advance(LinePacket::MAX_FRAMED_LEN);
                return Some(Packet::Invalid(InvalidPacket {
                    raw,
                    reason: format!("no line feed within {} bytes", LinePacket::MAX_FRAMED_LEN),
                }));
            }
            None => return None, // not a complete packet
        };
        let raw = &src[..end];
        let pkt = LinePacket::decode(raw)
            .map(Packet::Line)
            .unwrap_or_else(|reason| {
                Packet::Invalid(InvalidPacket {
                    raw: raw.to_owned(),
                    reason,
                })
            });
        src.advance(end);
        Some(pkt)
    }

    pub fn encode(&self, to: &mut BytesMut) {
        match self {
            Packet::Line(pkt) => pkt.encode(to),
            Packet::Invalid(pkt) => to.put_slice(&pkt.raw),
        }
    }
}

impl From<LinePacket> for Packet {
    fn from(pkt: LinePacket) -> Self {
        Packet::Line(pkt)
    }
}

impl From<InvalidPacket> for Packet {
    fn from(v: InvalidPacket) -> Self {
        Self::Invalid(v)
    }
}

/// A CRLF-terminated line (or an over-long run of bytes) that failed framing.
///
/// Decoding keeps going after one of these, so a single corrupt line doesn't
/// end the exchange.
#[derive(Clone)]
pub struct InvalidPacket {
    reason: String,
    raw: Vec<u8>,
}

impl InvalidPacket {
    /// Which framing check failed, such as a checksum mismatch.
    pub fn reason(&self) -> &str {
        self.reason.as_str()
    }

    /// The discarded bytes, including the line terminator when one was seen.
    pub fn raw(&self) -> &[u8] {
        self.raw.as_slice()
    }
}

impl std::fmt::Debug for InvalidPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidPacket")
            .field("reason", &self.reason)
            .field("raw", &self.raw.hex_dump())
            .finish()
    }
}

impl std::fmt::Display for InvalidPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "unframeable line ({}), {} bytes:\n{:?}",
            &self.reason,
            self.raw.len(),
            &self.raw.hex_dump()
        )
    }
}

impl std::error::Error for InvalidPacket {}

/// Two discarded lines are equal when their bytes match; `reason` is ignored.
impl PartialEq for InvalidPacket {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// A line packet.
///
/// The `Deref<str>` and [`TryFrom`] impls deal with the body (not the framing).
///
/// ```text
/// MMD...*CC (CR-LF)
/// ^^^^^^ included bytes
/// ```
///
/// Included bytes:
///
/// *   `MM`: message type
/// *   `D...`: data
///
/// Omitted bytes:
///
/// *   `*`: separator
/// *   `CC`: XOR of all body bytes, as two uppercase hexadigits
/// *   `(CR-LF)`: line ending
///
/// Every `LinePacket`'s body meets the following constraints:
///
/// * contains only printable ASCII characters other than `*`.
/// * has length within \[2, 250\]; every message starts with a two-byte type.
///
/// To decode a framed packet, see [`Packet::decode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinePacket(String);

impl LinePacket {
    const MIN_BODY_LEN: usize = 2;
    const MAX_BODY_LEN: usize = 250;

    /// The longest framed line: body, separator, checksum, and CRLF.
    pub const MAX_FRAMED_LEN: usize = Self::MAX_BODY_LEN + 5;

    /// Decodes a framed line.
    ///
    /// Caller is expected to provide exactly one line, up to and including the trailing `\n`.
    fn decode(raw: &[u8]) -> Result<Self, String> {
        let (body, csum_hi, csum_lo) = match raw {
            [body @ .., SEPARATOR, hi, lo, b'\r', b'\n'] => (body, *hi, *lo),
            [.., b'\r', b'\n'] => return Err("line has no checksum separator".to_owned()),
            _ => return Err("line must end with CRLF".to_owned()),
        };
        let actual = Self::dehex_byte(csum_hi, csum_lo)
            .map_err(|()| "line has unparseable checksum".to_owned())?;
        let expected = Self::checksum(body);
        if actual != expected {
            return Err(format!(
                "line doesn't have expected checksum {:02X}",
                expected
            ));
        }
        LinePacket::try_from(body)
    }

    fn encode(&self, to: &mut BytesMut) {
        to.reserve(5 + self.0.len());
        to.put_slice(self.0.as_bytes());
        to.put_u8(SEPARATOR);
        to.put_slice(&Self::hex_byte(Self::checksum(self.0.as_bytes()))[..]);
        to.put_slice(b"\r\n");
    }

    fn checksum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |acc, &b| acc ^ b)
    }

    /// Decodes an uppercase ASCII hexadigit into `[0, 16)` or returns `Err`.
    fn dehex_nibble(nibble: u8) -> Result<u8, ()> {
        match nibble {
            b'0'..=b'9' => Ok(nibble - b'0'),
            b'A'..=b'F' => Ok(nibble - b'A' + 10),
            _ => Err(()),
        }
    }

    fn dehex_byte(high_nibble: u8, low_nibble: u8) -> Result<u8, ()> {
        Ok(Self::dehex_nibble(high_nibble)? << 4 | Self::dehex_nibble(low_nibble)?)
    }

    fn hex_byte(byte: u8) -> [u8; 2] {
        const HEX_CHARS: &[u8; 16] = b"0123456789ABCDEF";
        [
            HEX_CHARS[usize::from(byte >> 4)],
            HEX_CHARS[usize::from(byte & 0xF)],
        ]
    }

    /// Checks that `value` is printable ASCII and free of the separator.
    pub(crate) fn check_body_chars(value: &[u8]) -> Result<(), String> {
        if let Some(i) = value
            .iter()
            .position(|&b| b < 0x20 || b > 0x7e || b == SEPARATOR)
        {
            return Err(format!(
                "character {:?} at index {} not allowed in a line body",
                char::from(value[i]),
                i
            ));
        }
        Ok(())
    }
}

impl TryFrom<Vec<u8>> for LinePacket {
    type Error = String;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::check_body_chars(&value)?;
        if value.len() < Self::MIN_BODY_LEN || value.len() > Self::MAX_BODY_LEN {
            return Err(format!(
                "line body length {} not in [{}, {}]",
                value.len(),
                Self::MIN_BODY_LEN,
                Self::MAX_BODY_LEN,
            ));
        }
        // Printable ASCII is valid UTF-8, so this can't fail.
        String::from_utf8(value)
            .map(LinePacket)
            .map_err(|e| e.to_string())
    }
}

impl TryFrom<String> for LinePacket {
    type Error = String;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.into_bytes())
    }
}

impl TryFrom<&str> for LinePacket {
    type Error = String;

    #[inline]
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.as_bytes().to_owned())
    }
}

impl TryFrom<&[u8]> for LinePacket {
    type Error = String;

    #[inline]
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(value.to_owned())
    }
}

impl std::ops::Deref for LinePacket {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_line() {
        let as_bytes: &[u8] = &b"KR1234*1D\r\n"[..];
        let mut buf = BytesMut::from(as_bytes);
        let pkt = Packet::decode(&mut buf).unwrap();
        assert_eq!(buf.len(), 0);
        assert_eq!(pkt, LinePacket::try_from("KR1234").unwrap().into());
        pkt.encode(&mut buf);
        assert_eq!(&buf[..], as_bytes);
    }

    #[test]
    fn partial_line() {
        let mut buf = BytesMut::from(&b"KR12"[..]);
        assert!(Packet::decode(&mut buf).is_none());
        assert_eq!(&buf[..], b"KR12");
        buf.extend_from_slice(b"34*1D\r\n");
        assert_eq!(
            Packet::decode(&mut buf).unwrap(),
            LinePacket::try_from("KR1234").unwrap().into()
        );
    }

    #[test]
    fn bad_checksum() {
        let mut buf = BytesMut::from(&b"KR1234*1E\r\nKR*19\r\n"[..]);
        match Packet::decode(&mut buf).unwrap() {
            Packet::Invalid(p) => {
                assert_eq!(p.raw(), b"KR1234*1E\r\n");
                assert!(p.reason().contains("1D"), "{}", p.reason());
                let shown = p.to_string();
                assert!(shown.starts_with("unframeable line ("), "{}", shown);
                assert!(shown.contains("11 bytes"), "{}", shown);
            }
            o => panic!("unexpected {:?}", o),
        }
        assert_eq!(
            Packet::decode(&mut buf).unwrap(),
            LinePacket::try_from("KR").unwrap().into()
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn lowercase_checksum_is_invalid() {
        let mut buf = BytesMut::from(&b"KA*0a\r\nKA*0A\r\n"[..]);
        assert!(matches!(
            Packet::decode(&mut buf).unwrap(),
            Packet::Invalid(_)
        ));
        assert_eq!(
            Packet::decode(&mut buf).unwrap(),
            LinePacket::try_from("KA").unwrap().into()
        );
    }

    #[test]
    fn garbage_then_resync() {
        let as_bytes: &[u8] = &b"\xde\xad\xbe\xef\r\nKR*19\r\n"[..];
        let mut buf = BytesMut::from(as_bytes);
        let mut out = BytesMut::new();
        let first = Packet::decode(&mut buf).unwrap();
        assert!(matches!(first, Packet::Invalid(_)));
        let second = Packet::decode(&mut buf).unwrap();
        assert_eq!(second, LinePacket::try_from("KR").unwrap().into());
        assert!(Packet::decode(&mut buf).is_none());
        first.encode(&mut out);
        second.encode(&mut out);
        assert_eq!(&out[..], as_bytes);
    }

    #[test]
    fn overlong_line() {
        let mut buf = BytesMut::from(&[b'A'; 300][..]);
        match Packet::decode(&mut buf).unwrap() {
            Packet::Invalid(p) => assert_eq!(p.raw().len(), LinePacket::MAX_FRAMED_LEN),
            o => panic!("unexpected {:?}", o),
        }
        assert_eq!(buf.len(), 300 - LinePacket::MAX_FRAMED_LEN);
    }

    #[test]
    fn body_constraints() {
        assert!(LinePacket::try_from("K").is_err());
        assert!(LinePacket::try_from("KS*").is_err());
        assert!(LinePacket::try_from("KS\t").is_err());
        assert!(LinePacket::try_from("A".repeat(251)).is_err());
        assert!(LinePacket::try_from("A".repeat(250)).is_ok());
    }
}
