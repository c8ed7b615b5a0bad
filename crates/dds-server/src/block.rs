//! Multi-message reply bodies.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};
use dds_wire::MAX_BODY_LEN;

use crate::archive::DcpMsg;

/// Lowest client version that understands multi-message blocks.
pub const MIN_BLOCK_VERSION: u32 = 4;

/// Lowest client version that receives `LocalRecvTime` in extended blocks.
pub const MIN_RECV_TIME_VERSION: u32 = 11;

const BLOCK_OPEN: &str = "<MsgBlock>\n";
const BLOCK_CLOSE: &str = "</MsgBlock>\n";
const ENTRY_TAIL: &str = "</BinaryMsg>\n</DcpMsg>\n";

/// Body space for the messages of one legacy block.
pub const LEGACY_BLOCK_BUDGET: usize = MAX_BODY_LEN;

/// Body space for the `<DcpMsg>` entries of one extended block, leaving room
/// for the wrapper element and a trailing NUL.
pub const EXT_BLOCK_BUDGET: usize = MAX_BODY_LEN - BLOCK_OPEN.len() - BLOCK_CLOSE.len() - 1;

/// Bytes a message adds to a legacy block.
pub fn legacy_entry_len(msg: &DcpMsg) -> usize {
    msg.data.len()
}

/// Concatenates raw messages for a legacy block reply.
pub fn legacy_block(messages: &[DcpMsg]) -> Bytes {
    let mut buf = BytesMut::with_capacity(messages.iter().map(legacy_entry_len).sum());
    for msg in messages {
        buf.put_slice(&msg.data);
    }
    buf.freeze()
}

/// Bytes a message adds to an extended block, base64 and markup included.
pub fn ext_entry_len(msg: &DcpMsg, client_version: u32) -> usize {
    let mut entry = String::new();
    push_entry_head(&mut entry, msg, client_version);
    base64::encoded_len(msg.data.len(), true)
        .map_or(usize::MAX, |data| entry.len() + data + ENTRY_TAIL.len())
}

/// Renders an extended block:
///
/// ```text
/// <MsgBlock>
/// <DcpMsg flags="0x00000000" platformId="CE1234AB">
///   <LocalRecvTime>2024/061 13:05:09.000</LocalRecvTime>
///   <BinaryMsg>base64...</BinaryMsg>
/// </DcpMsg>
/// </MsgBlock>
/// ```
pub fn extended_block(messages: &[DcpMsg], client_version: u32) -> String {
    let mut xml = String::from(BLOCK_OPEN);
    for msg in messages {
        push_entry_head(&mut xml, msg, client_version);
        STANDARD.encode_string(&msg.data, &mut xml);
        xml.push_str(ENTRY_TAIL);
    }
    xml.push_str(BLOCK_CLOSE);
    xml
}

/// Everything of a `<DcpMsg>` entry up to the base64 data.
fn push_entry_head(out: &mut String, msg: &DcpMsg, client_version: u32) {
    out.push_str(&format!(
        "<DcpMsg flags=\"0x{:08x}\" platformId=\"{}\">\n",
        msg.flags,
        escape_attr(&msg.platform_id)
    ));
    if client_version >= MIN_RECV_TIME_VERSION {
        if let Some(t) = msg.local_recv_time {
            out.push_str(&format!(
                "  <LocalRecvTime>{}</LocalRecvTime>\n",
                t.format("%Y/%j %H:%M:%S%.3f")
            ));
        }
    }
    out.push_str("  <BinaryMsg>");
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
