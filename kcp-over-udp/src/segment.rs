//! Wire-format definitions for protocol segments.
//!
//! Every datagram handed to or produced by the control block is a
//! concatenation of one or more segments.  This module is responsible for:
//! - Defining the on-wire binary layout of a segment header.
//! - Serialising a [`Segment`] (header + payload) into an output buffer.
//! - Walking a raw datagram segment by segment, returning errors for
//!   malformed or truncated input.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **little-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Conversation                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Cmd      |      Frg      |            Window             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                              Una                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 24 bytes.
//! conv(4) + cmd(1) + frg(1) + wnd(2) + ts(4) + sn(4) + una(4) + len(4)

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

// Byte offsets of each field within the serialised header.
const OFF_CONV: usize = 0;
const OFF_CMD: usize = 4;
const OFF_FRG: usize = 5;
const OFF_WND: usize = 6;
const OFF_TS: usize = 8;
const OFF_SN: usize = 12;
const OFF_UNA: usize = 16;
const OFF_LEN: usize = 20;

/// Segment command carried in the `cmd` header byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Data segment.
    Push = 81,
    /// Acknowledgement of a single `sn`.
    Ack = 82,
    /// Window probe: ask the peer to report its receive window.
    WindowAsk = 83,
    /// Window report in reply to a probe.
    WindowTell = 84,
}

impl TryFrom<u8> for Command {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            81 => Ok(Command::Push),
            82 => Ok(Command::Ack),
            83 => Ok(Command::WindowAsk),
            84 => Ok(Command::WindowTell),
            other => Err(FramingError::UnknownCommand(other)),
        }
    }
}

/// Fixed-size segment header, in host byte order.
///
/// The payload length is not stored here: [`Header::encode_into`] takes it
/// from the payload being written and [`decode`] validates it against the
/// remaining buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub conv: u32,
    pub cmd: Command,
    /// Fragments remaining after this one; `0` marks the end of a message.
    pub frg: u8,
    /// Sender's unused receive window at send time.
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    /// Sender's `rcv_nxt` at send time (cumulative acknowledgement).
    pub una: u32,
}

impl Header {
    /// A header with every numeric field zeroed.
    pub fn new(conv: u32, cmd: Command) -> Self {
        Self {
            conv,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
        }
    }

    /// Append the 24-byte header, announcing `len` payload bytes, to `out`.
    pub fn encode_into(&self, len: u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.conv.to_le_bytes());
        out.push(self.cmd as u8);
        out.push(self.frg);
        out.extend_from_slice(&self.wnd.to_le_bytes());
        out.extend_from_slice(&self.ts.to_le_bytes());
        out.extend_from_slice(&self.sn.to_le_bytes());
        out.extend_from_slice(&self.una.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
    }
}

/// One protocol unit: header, payload and retransmission bookkeeping.
///
/// The bookkeeping fields never go on the wire; they are only meaningful
/// while the segment sits in the send buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub data: Vec<u8>,
    /// Time at which the segment becomes due for retransmission.
    pub resendts: u32,
    /// Current retransmission timeout of this segment.
    pub rto: u32,
    /// Number of later segments acknowledged ahead of this one.
    pub fastack: u32,
    /// Number of times this segment has been transmitted.
    pub xmit: u32,
}

impl Segment {
    /// Wrap `data` in a segment with a zeroed header.
    pub fn new(conv: u32, cmd: Command, data: Vec<u8>) -> Self {
        Self {
            header: Header::new(conv, cmd),
            data,
            resendts: 0,
            rto: 0,
            fastack: 0,
            xmit: 0,
        }
    }

    /// Number of bytes this segment occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    /// Append header and payload to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        self.header.encode_into(self.data.len() as u32, out);
        out.extend_from_slice(&self.data);
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer too short to contain a segment header")]
    TooShort,
    /// `len` field exceeds the bytes remaining in the datagram.
    #[error("payload length field exceeds remaining bytes")]
    LengthMismatch,
    /// `cmd` is none of PUSH/ACK/WASK/WINS.
    #[error("unknown segment command {0}")]
    UnknownCommand(u8),
    /// Segment belongs to another conversation.
    #[error("conversation mismatch: expected {expected}, got {got}")]
    ConvMismatch { expected: u32, got: u32 },
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Decode one segment from the front of `buf`.
///
/// Returns the header, the payload slice and the bytes that follow the
/// segment.  Fails if fewer than [`HEADER_LEN`] bytes are present, if the
/// `len` field runs past the end of `buf`, or if `cmd` is unknown.
pub fn decode(buf: &[u8]) -> Result<(Header, &[u8], &[u8]), FramingError> {
    if buf.len() < HEADER_LEN {
        return Err(FramingError::TooShort);
    }

    let len = read_u32(buf, OFF_LEN) as usize;
    let rest = &buf[HEADER_LEN..];
    if len > rest.len() {
        return Err(FramingError::LengthMismatch);
    }
    let cmd = Command::try_from(buf[OFF_CMD])?;

    let header = Header {
        conv: read_u32(buf, OFF_CONV),
        cmd,
        frg: buf[OFF_FRG],
        wnd: read_u16(buf, OFF_WND),
        ts: read_u32(buf, OFF_TS),
        sn: read_u32(buf, OFF_SN),
        una: read_u32(buf, OFF_UNA),
    };
    Ok((header, &rest[..len], &rest[len..]))
}

/// Read the conversation id of a datagram without decoding it.
///
/// Useful for an owner that routes datagrams to control blocks by conv.
pub fn peek_conv(datagram: &[u8]) -> Option<u32> {
    if datagram.len() < HEADER_LEN {
        return None;
    }
    Some(read_u32(datagram, OFF_CONV))
}

/// Iterator over the segments packed into one datagram.
///
/// Stops once fewer than [`HEADER_LEN`] bytes remain; trailing bytes shorter
/// than a header are ignored.  Yields at most one error, after which it is
/// exhausted.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    rest: &'a [u8],
}

impl<'a> Segments<'a> {
    pub fn new(datagram: &'a [u8]) -> Self {
        Self { rest: datagram }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<(Header, &'a [u8]), FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < HEADER_LEN {
            return None;
        }
        match decode(self.rest) {
            Ok((header, payload, rest)) => {
                self.rest = rest;
                Some(Ok((header, payload)))
            }
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}
