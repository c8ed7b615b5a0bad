//! # dds-wire: LDDS/DDS message framing
//!
//! Every message exchanged between a DDS client and the LRGS server is a
//! fixed 10-byte header followed by a variable-length body:
//!
//! ```text
//! ┌──────────┬────────┬──────────────┬─────────────────────┐
//! │ "FAF0"   │ id (1) │ length (5)   │ body (length bytes) │
//! │ sync (4) │ a..=v  │ ASCII digits │                     │
//! └──────────┴────────┴──────────────┴─────────────────────┘
//! ```
//!
//! The length field is zero padded on encode. On decode, ASCII spaces are
//! accepted in place of zeros because some downstream clients pad with
//! spaces.
//!
//! A header that fails validation is rejected before any body bytes are
//! allocated, and nothing above the codec ever sees a partially decoded
//! message.
//!
//! ## Usage
//!
//! ```
//! use bytes::BytesMut;
//! use dds_wire::{Message, MessageId, TextTerminator};
//!
//! let msg = Message::text(MessageId::Hello, "alice 14", TextTerminator::Nul).unwrap();
//!
//! let mut buf = BytesMut::new();
//! msg.encode(&mut buf);
//! assert_eq!(&buf[..10], b"FAF0a00009");
//!
//! let decoded = Message::decode(&mut buf).unwrap().unwrap();
//! assert_eq!(decoded.body_text(), "alice 14");
//! ```

mod error;
mod message;

pub use error::{ProtocolError, WireResult};
pub use message::{
    HEADER_SIZE, Header, LENGTH_FIELD_SIZE, MAX_BODY_LEN, Message, MessageId, SYNC,
    TextTerminator,
};
