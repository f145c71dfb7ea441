//! Packet framing: header octets, body lengths and the streaming parser.
//!
//! Both header formats are accepted on input. Old-format headers carry the
//! tag in bits 5..2 and a two-bit length type; new-format headers carry a
//! six-bit tag and a variable-length length field that may announce partial
//! body chunks. Output always uses new-format headers with the shortest fixed
//! length encoding.

use crate::error::{PgpError, Result};
use crate::validation::{Validator, MAX_PACKET_SIZE};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read};
use tracing::trace;

/// Largest partial body chunk accepted (2^30 octets)
const MAX_PARTIAL_LEN: usize = 1 << 30;

/// Encoded body length of one header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketLength {
    /// Exact body length
    Fixed(usize),
    /// First chunk of a partial body; more length fields follow
    Partial(usize),
    /// Body extends to the end of the input (old format only)
    Indeterminate,
}

/// Which header format a packet arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFormat {
    Old,
    New,
}

/// A decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub format: HeaderFormat,
    pub tag: u8,
    pub length: PacketLength,
}

fn read_new_length<R: Read>(reader: &mut R) -> io::Result<PacketLength> {
    let first = reader.read_u8()?;
    let length = match first {
        0..=191 => PacketLength::Fixed(first as usize),
        192..=223 => {
            let second = reader.read_u8()?;
            PacketLength::Fixed(((first as usize - 192) << 8) + second as usize + 192)
        }
        224..=254 => PacketLength::Partial(1 << (first & 0x1F)),
        255 => PacketLength::Fixed(reader.read_u32::<BigEndian>()? as usize),
    };
    Ok(length)
}

impl PacketHeader {
    /// Reads a header from `reader`.
    ///
    /// Returns `Ok(None)` on a clean end of input before the first octet.
    pub fn read<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let first = match reader.read_u8() {
            Ok(octet) => octet,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if first & 0x80 == 0 {
            return Err(PgpError::malformed(format!(
                "Invalid packet header octet {:#04x}: high bit not set",
                first
            )));
        }

        let header = if first & 0x40 != 0 {
            PacketHeader {
                format: HeaderFormat::New,
                tag: first & 0x3F,
                length: read_new_length(reader).map_err(truncated)?,
            }
        } else {
            let length = match first & 0x03 {
                0 => PacketLength::Fixed(reader.read_u8().map_err(truncated)? as usize),
                1 => PacketLength::Fixed(
                    reader.read_u16::<BigEndian>().map_err(truncated)? as usize,
                ),
                2 => PacketLength::Fixed(
                    reader.read_u32::<BigEndian>().map_err(truncated)? as usize,
                ),
                _ => PacketLength::Indeterminate,
            };
            PacketHeader {
                format: HeaderFormat::Old,
                tag: (first >> 2) & 0x0F,
                length,
            }
        };
        Ok(Some(header))
    }
}

fn truncated(e: io::Error) -> PgpError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        PgpError::malformed("Truncated packet header")
    } else {
        PgpError::Io(e)
    }
}

/// Writes a new-format header with the minimal fixed length encoding
pub fn write_header<W: io::Write>(writer: &mut W, tag: u8, len: usize) -> io::Result<()> {
    writer.write_u8(0xC0 | (tag & 0x3F))?;
    writer.write_all(&encode_length(len))
}

/// Encodes a body or subpacket length in new-format encoding
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 192 {
        vec![len as u8]
    } else if len < 8384 {
        vec![(((len - 192) >> 8) + 192) as u8, ((len - 192) & 0xFF) as u8]
    } else {
        let mut out = vec![255];
        out.extend_from_slice(&(len as u32).to_be_bytes());
        out
    }
}

/// Reads a subpacket length (same encoding as new-format fixed lengths)
pub fn read_subpacket_length<R: Read>(reader: &mut R) -> Result<usize> {
    match read_new_length(reader).map_err(truncated)? {
        PacketLength::Fixed(len) => Ok(len),
        _ => Err(PgpError::malformed("Partial length in subpacket area")),
    }
}

/// Undecoded packet: tag plus reassembled body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub tag: u8,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Expecting a header octet or end of input
    Header,
    /// Reading the body announced by a header
    Body(PacketHeader),
    /// End of input reached or an error was returned
    Done,
}

/// Streaming packet parser over any reader.
///
/// Yields one [`RawPacket`] per header, reassembling partial bodies and
/// reading indeterminate bodies to the end of input. After the first error
/// the parser is exhausted.
pub struct PacketParser<R: Read> {
    reader: R,
    state: ParserState,
    count: usize,
}

impl<R: Read> PacketParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: ParserState::Header,
            count: 0,
        }
    }

    fn read_exact_body(&mut self, len: usize, body: &mut Vec<u8>) -> Result<()> {
        let total = body
            .len()
            .checked_add(len)
            .ok_or_else(|| PgpError::malformed("Packet length overflows"))?;
        Validator::validate_packet_size(total)?;

        let start = body.len();
        (&mut self.reader).take(len as u64).read_to_end(body)?;
        if body.len() - start != len {
            return Err(PgpError::malformed(format!(
                "Truncated packet body: expected {} bytes, got {}",
                len,
                body.len() - start
            )));
        }
        Ok(())
    }

    fn read_body(&mut self, header: PacketHeader) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        match header.length {
            PacketLength::Fixed(len) => self.read_exact_body(len, &mut body)?,
            PacketLength::Partial(first) => {
                let mut chunk = first;
                loop {
                    if chunk > MAX_PARTIAL_LEN {
                        return Err(PgpError::malformed("Partial body chunk too large"));
                    }
                    self.read_exact_body(chunk, &mut body)?;
                    match read_new_length(&mut self.reader).map_err(truncated)? {
                        PacketLength::Partial(next) => chunk = next,
                        PacketLength::Fixed(last) => {
                            self.read_exact_body(last, &mut body)?;
                            break;
                        }
                        PacketLength::Indeterminate => {
                            return Err(PgpError::malformed("Indeterminate length in partial body"))
                        }
                    }
                }
                trace!(tag = header.tag, len = body.len(), "reassembled partial body");
            }
            PacketLength::Indeterminate => {
                (&mut self.reader)
                    .take(MAX_PACKET_SIZE as u64 + 1)
                    .read_to_end(&mut body)?;
                Validator::validate_packet_size(body.len())?;
            }
        }
        Ok(body)
    }

    fn step(&mut self) -> Result<Option<RawPacket>> {
        loop {
            match self.state {
                ParserState::Done => return Ok(None),
                ParserState::Header => match PacketHeader::read(&mut self.reader)? {
                    None => self.state = ParserState::Done,
                    Some(header) => {
                        self.count += 1;
                        Validator::validate_packet_count(self.count)?;
                        self.state = ParserState::Body(header);
                    }
                },
                ParserState::Body(header) => {
                    let body = self.read_body(header)?;
                    self.state = if header.length == PacketLength::Indeterminate {
                        ParserState::Done
                    } else {
                        ParserState::Header
                    };
                    return Ok(Some(RawPacket {
                        tag: header.tag,
                        body,
                    }));
                }
            }
        }
    }
}

impl<R: Read> Iterator for PacketParser<R> {
    type Item = Result<RawPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(packet)) => Some(Ok(packet)),
            Ok(None) => None,
            Err(e) => {
                self.state = ParserState::Done;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(tag: u8, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        write_header(&mut out, tag, len).unwrap();
        out
    }

    #[test]
    fn test_minimal_length_encoding() {
        assert_eq!(encode(6, 50), vec![0xC6, 50]);
        assert_eq!(encode(6, 200), vec![0xC6, 192, 8]);
        assert_eq!(encode(6, 8383), vec![0xC6, 223, 255]);
        assert_eq!(encode(6, 10000), vec![0xC6, 255, 0, 0, 39, 16]);
    }

    #[test]
    fn test_new_format_roundtrip() {
        for len in [0usize, 191, 192, 8383, 8384, 70000] {
            let bytes = encode(11, len);
            let header = PacketHeader::read(&mut bytes.as_slice()).unwrap().unwrap();
            assert_eq!(header.format, HeaderFormat::New);
            assert_eq!(header.tag, 11);
            assert_eq!(header.length, PacketLength::Fixed(len));
        }
    }

    #[test]
    fn test_old_format_headers() {
        // tag 13, one-octet length
        let header = PacketHeader::read(&mut [0xB4, 5].as_slice()).unwrap().unwrap();
        assert_eq!(header.format, HeaderFormat::Old);
        assert_eq!(header.tag, 13);
        assert_eq!(header.length, PacketLength::Fixed(5));

        // tag 2, two-octet length
        let header = PacketHeader::read(&mut [0x89, 0x01, 0x00].as_slice())
            .unwrap()
            .unwrap();
        assert_eq!(header.tag, 2);
        assert_eq!(header.length, PacketLength::Fixed(256));

        // tag 11, indeterminate
        let header = PacketHeader::read(&mut [0xAF].as_slice()).unwrap().unwrap();
        assert_eq!(header.tag, 11);
        assert_eq!(header.length, PacketLength::Indeterminate);
    }

    #[test]
    fn test_high_bit_required() {
        let err = PacketHeader::read(&mut [0x06, 1].as_slice()).unwrap_err();
        assert!(matches!(err, PgpError::MalformedPacket(_)));
    }

    #[test]
    fn test_parser_reassembles_partial_body() {
        // tag 11, partial chunk of 2^0 = 1 octet, then fixed 2 octets
        let data = [0xCB, 0xE0, b'a', 0x02, b'b', b'c'];
        let packets: Vec<_> = PacketParser::new(&data[..]).collect::<Result<_>>().unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].body, b"abc");
    }

    #[test]
    fn test_parser_indeterminate_reads_to_end() {
        let data = [0xAF, b'x', b'y', b'z'];
        let packets: Vec<_> = PacketParser::new(&data[..]).collect::<Result<_>>().unwrap();
        assert_eq!(packets[0].tag, 11);
        assert_eq!(packets[0].body, b"xyz");
    }

    #[test]
    fn test_parser_multiple_and_truncated() {
        let mut data = encode(10, 3);
        data.extend_from_slice(b"PGP");
        data.extend_from_slice(&encode(13, 4));
        data.extend_from_slice(b"ab");

        let mut parser = PacketParser::new(&data[..]);
        assert_eq!(parser.next().unwrap().unwrap().tag, 10);
        assert!(matches!(
            parser.next().unwrap(),
            Err(PgpError::MalformedPacket(_))
        ));
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_truncated_length_field() {
        let err = PacketParser::new(&[0xC6, 255, 0][..])
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PgpError::MalformedPacket(_)));
    }
}
