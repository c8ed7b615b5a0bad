//! DCP message retrieval, search criteria and events.

use dds_wire::MessageId;
use tracing::debug;

use super::{Outcome, reply_bytes, reply_text};
use crate::block::{
    EXT_BLOCK_BUDGET, LEGACY_BLOCK_BUDGET, MIN_BLOCK_VERSION, ext_entry_len, extended_block,
    legacy_block, legacy_entry_len,
};
use crate::context::ServerContext;
use crate::criteria::{CRITERIA_FILE_NAME, SearchCriteria, header_field};
use crate::error::{ErrorCode, RequestError};
use crate::passwd_file::write_atomic;
use crate::session::{LoggedIn, Session};

pub(super) fn next_message(session: &mut Session) -> Result<Outcome, RequestError> {
    single_message(session.require_login()?, MessageId::Dcp)
}

/// Block replies for clients too old for blocks carry one message.
fn single_message(l: &mut LoggedIn, id: MessageId) -> Result<Outcome, RequestError> {
    let msg = l.next_message()?;
    debug!(platform = %msg.platform_id, bytes = msg.data.len(), "sending message");
    Ok(Outcome::reply(reply_bytes(id, msg.data)?))
}

pub(super) fn block(session: &mut Session) -> Result<Outcome, RequestError> {
    let l = session.require_login()?;
    if l.user.client_version() < MIN_BLOCK_VERSION {
        return single_message(l, MessageId::DcpBlock);
    }
    let messages = l.next_block(LEGACY_BLOCK_BUDGET, legacy_entry_len)?;
    let body = legacy_block(&messages);
    debug!(count = messages.len(), bytes = body.len(), "sending block");
    Ok(Outcome::reply(reply_bytes(MessageId::DcpBlock, body)?))
}

pub(super) fn ext_block(
    session: &mut Session,
    ctx: &ServerContext,
) -> Result<Outcome, RequestError> {
    let l = session.require_login()?;
    let version = l.user.client_version();
    if version < MIN_BLOCK_VERSION {
        return single_message(l, MessageId::DcpBlockExt);
    }
    let messages = l.next_block(EXT_BLOCK_BUDGET, |m| ext_entry_len(m, version))?;
    debug!(count = messages.len(), "sending extended block");
    let xml = extended_block(&messages, version);
    reply_text(MessageId::DcpBlockExt, &xml, ctx)
}

pub(super) fn send_criteria(session: &mut Session) -> Result<Outcome, RequestError> {
    let l = session.require_login()?;
    Ok(Outcome::reply(reply_bytes(
        MessageId::Criteria,
        l.criteria().to_body(),
    )?))
}

pub(super) fn receive_criteria(
    body: &[u8],
    session: &mut Session,
) -> Result<Outcome, RequestError> {
    let l = session.require_login()?;
    let bad = |e: crate::criteria::CriteriaError| {
        RequestError::new(ErrorCode::BadSearchCriteria, e.to_string())
    };
    let criteria = SearchCriteria::from_body(body).map_err(bad)?;
    criteria
        .check_dcp_limit(l.user.options.dcp_limit)
        .map_err(bad)?;

    let path = l.user.sandbox().file(CRITERIA_FILE_NAME);
    write_atomic(&path, criteria.text().as_bytes()).map_err(|e| {
        RequestError::new(
            ErrorCode::DdsInternal,
            format!("cannot save criteria to '{}': {e}", path.display()),
        )
        .with_hangup(false)
    })?;

    l.set_criteria(criteria)?;
    debug!(platforms = l.criteria().dcp_addresses().len(), "criteria installed");
    Ok(Outcome::reply(reply_bytes(
        MessageId::Criteria,
        header_field().to_vec(),
    )?))
}

pub(super) fn events(session: &mut Session, ctx: &ServerContext) -> Result<Outcome, RequestError> {
    let l = session.require_login()?;
    let (lines, cursor) = ctx.archive.events_since(l.event_cursor);
    l.event_cursor = cursor;
    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    reply_text(MessageId::Events, &text, ctx)
}
