//! Message header, opcode alphabet and body framing.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, WireResult};

/// Synchronization token that starts every header.
pub const SYNC: &[u8; 4] = b"FAF0";

/// Size of the fixed header: sync (4) + id (1) + length (5).
pub const HEADER_SIZE: usize = 10;

/// Width of the ASCII decimal length field.
pub const LENGTH_FIELD_SIZE: usize = 5;

/// Largest body either side may send.
pub const MAX_BODY_LEN: usize = 99_000;

/// Single-letter message identifiers.
///
/// The alphabet is closed: `a` through `v`. A few letters are reserved and
/// decode successfully at the framing layer, but have no command behind
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Hello,
    Goodbye,
    Status,
    /// Reserved (`d`).
    Start,
    Idle,
    Dcp,
    Criteria,
    GetNetlist,
    PutNetlist,
    /// Reserved (`j`).
    NetlistList,
    Events,
    RetConfig,
    InstConfig,
    DcpBlock,
    AuthHello,
    DcpBlockExt,
    /// Reserved (`q`).
    ReservedQ,
    /// Reserved (`r`).
    ReservedR,
    Echo,
    GetOutages,
    AssertOutages,
    User,
}

impl MessageId {
    /// Every id in alphabet order.
    pub const ALL: [Self; 22] = [
        Self::Hello,
        Self::Goodbye,
        Self::Status,
        Self::Start,
        Self::Idle,
        Self::Dcp,
        Self::Criteria,
        Self::GetNetlist,
        Self::PutNetlist,
        Self::NetlistList,
        Self::Events,
        Self::RetConfig,
        Self::InstConfig,
        Self::DcpBlock,
        Self::AuthHello,
        Self::DcpBlockExt,
        Self::ReservedQ,
        Self::ReservedR,
        Self::Echo,
        Self::GetOutages,
        Self::AssertOutages,
        Self::User,
    ];

    /// Maps a header byte to an id, or `None` if it is outside the alphabet.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'a'..=b'v' => Some(Self::ALL[usize::from(byte - b'a')]),
            _ => None,
        }
    }

    /// Returns the header byte for this id.
    pub fn as_byte(self) -> u8 {
        b'a' + self as u8
    }

    /// Returns the header letter for this id.
    pub fn as_char(self) -> char {
        char::from(self.as_byte())
    }

    /// Returns true for letters held back for future use.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            Self::Start | Self::NetlistList | Self::ReservedQ | Self::ReservedR
        )
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// How string payloads are terminated when turned into a body.
///
/// Legacy clients expect a trailing NUL after text bodies and count it in
/// the length field. Newer clients accept either form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextTerminator {
    /// Append one NUL byte after the text.
    #[default]
    Nul,
    /// Send the text bytes only.
    None,
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message id.
    pub id: MessageId,
    /// Body length in bytes.
    pub length: usize,
}

impl Header {
    /// Validates and decodes a 10-byte header.
    ///
    /// The sync token must match exactly. The id must be in the alphabet.
    /// The length field must be digits, with spaces read as zeros, and may
    /// not exceed [`MAX_BODY_LEN`].
    pub fn decode(bytes: &[u8]) -> WireResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        if &bytes[..4] != SYNC {
            let mut sync = [0u8; 4];
            sync.copy_from_slice(&bytes[..4]);
            return Err(ProtocolError::BadSync(sync));
        }

        let id = MessageId::from_byte(bytes[4]).ok_or(ProtocolError::UnknownMessageId(bytes[4]))?;
        let length = parse_length(&bytes[5..HEADER_SIZE])?;

        Ok(Self { id, length })
    }

    /// Appends the encoded header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(SYNC);
        buf.put_u8(self.id.as_byte());
        buf.put_slice(format!("{:05}", self.length).as_bytes());
    }
}

fn parse_length(field: &[u8]) -> WireResult<usize> {
    let mut length = 0usize;
    for &b in field {
        let digit = match b {
            b' ' => 0,
            b'0'..=b'9' => usize::from(b - b'0'),
            _ => {
                return Err(ProtocolError::BadLength(
                    String::from_utf8_lossy(field).into_owned(),
                ));
            }
        };
        length = length * 10 + digit;
    }

    if length > MAX_BODY_LEN {
        return Err(ProtocolError::BodyTooLarge {
            length,
            max: MAX_BODY_LEN,
        });
    }
    Ok(length)
}

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    body: Bytes,
}

impl Message {
    /// Creates a message, rejecting bodies over [`MAX_BODY_LEN`].
    pub fn new(id: MessageId, body: impl Into<Bytes>) -> WireResult<Self> {
        let body = body.into();
        if body.len() > MAX_BODY_LEN {
            return Err(ProtocolError::BodyTooLarge {
                length: body.len(),
                max: MAX_BODY_LEN,
            });
        }
        Ok(Self { id, body })
    }

    /// Creates a message with no body.
    pub fn empty(id: MessageId) -> Self {
        Self {
            id,
            body: Bytes::new(),
        }
    }

    /// Creates a message from a string payload.
    pub fn text(id: MessageId, text: &str, terminator: TextTerminator) -> WireResult<Self> {
        let mut body = BytesMut::with_capacity(text.len() + 1);
        body.put_slice(text.as_bytes());
        if terminator == TextTerminator::Nul {
            body.put_u8(0);
        }
        Self::new(id, body.freeze())
    }

    /// Returns the message id.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the raw body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body length in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Returns true if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Returns the body as text with at most one trailing NUL removed.
    pub fn body_text(&self) -> Cow<'_, str> {
        let bytes = self.body.strip_suffix(&[0u8]).unwrap_or(&self.body[..]);
        String::from_utf8_lossy(bytes)
    }

    /// Returns the encoded size (header plus body).
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Appends the encoded message to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        Header {
            id: self.id,
            length: self.body.len(),
        }
        .encode(buf);
        buf.put_slice(&self.body);
    }

    /// Encodes the message into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Attempts to decode one message from the front of `buf`.
    ///
    /// Returns `Ok(None)` if more bytes are needed. The header is validated
    /// as soon as it is complete, so a bad header fails without waiting
    /// for a body.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = Header::decode(&buf[..HEADER_SIZE])?;
        if buf.len() < HEADER_SIZE + header.length {
            buf.reserve(HEADER_SIZE + header.length - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        let body = buf.split_to(header.length).freeze();
        Ok(Some(Self {
            id: header.id,
            body,
        }))
    }

    /// Reads exactly one message from a blocking reader.
    ///
    /// A clean EOF before the first header byte is reported as
    /// [`ProtocolError::ConnectionClosed`]; EOF anywhere else is
    /// [`ProtocolError::Truncated`].
    pub fn read_from<R: Read>(reader: &mut R) -> WireResult<Self> {
        let mut header_buf = [0u8; HEADER_SIZE];
        let n = read_full(reader, &mut header_buf)?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        if n < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: n,
            });
        }

        let header = Header::decode(&header_buf)?;

        let mut body = vec![0u8; header.length];
        let n = read_full(reader, &mut body)?;
        if n < header.length {
            return Err(ProtocolError::Truncated {
                expected: header.length,
                actual: n,
            });
        }

        Ok(Self {
            id: header.id,
            body: Bytes::from(body),
        })
    }

    /// Writes the encoded message and flushes.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()
    }
}

/// Reads until `buf` is full or EOF, returning the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
