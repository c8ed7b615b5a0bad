//! Per-connection request loop.
//!
//! Reads one message, runs its command, writes at most one reply, repeats.
//! The protocol is not pipelined: the next header is not read until the
//! previous reply is written or the connection is given up.

use std::io::{Read, Write};

use dds_wire::{Message, MessageId, ProtocolError};
use tracing::{debug, info, warn};

use crate::command::dispatch;
use crate::context::ServerContext;
use crate::error::{ErrorCode, RequestError};
use crate::session::Session;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the socket between messages.
    PeerClosed,
    /// Goodbye or a fatal request error.
    Hangup,
    /// No request within the idle timeout.
    IdleTimeout,
    /// Unparsable bytes or a socket failure.
    ProtocolError,
}

/// Serves one client until it disconnects or is hung up on.
pub fn serve<S: Read + Write>(
    stream: &mut S,
    session: &mut Session,
    ctx: &ServerContext,
) -> CloseReason {
    let reason = serve_inner(stream, session, ctx);
    session.close();
    info!(client = %session.client_name(), reason = ?reason, "connection closed");
    reason
}

fn serve_inner<S: Read + Write>(
    stream: &mut S,
    session: &mut Session,
    ctx: &ServerContext,
) -> CloseReason {
    loop {
        let msg = match Message::read_from(stream) {
            Ok(msg) => msg,
            Err(ProtocolError::ConnectionClosed) => return CloseReason::PeerClosed,
            Err(e) if e.is_timeout() => {
                debug!(client = %session.client_name(), "idle timeout");
                return CloseReason::IdleTimeout;
            }
            Err(e) => {
                warn!(client = %session.client_name(), error = %e, "protocol error");
                return CloseReason::ProtocolError;
            }
        };

        let Some(command) = dispatch(&msg) else {
            let err = RequestError::new(
                ErrorCode::BadKeyword,
                format!("Unrecognized request ID '{}'", msg.id().as_char()),
            )
            .with_hangup(true);
            warn!(client = %session.client_name(), id = %msg.id(), "reserved message id");
            send_error(stream, session, MessageId::Hello, &err, ctx);
            return CloseReason::Hangup;
        };

        let reply_id = command.reply_id();
        match command.execute(session, ctx) {
            Ok(outcome) => {
                if let Some(reply) = outcome.reply {
                    if let Err(e) = reply.write_to(stream) {
                        warn!(client = %session.client_name(), error = %e, "write failed");
                        return CloseReason::ProtocolError;
                    }
                }
                if outcome.hangup {
                    return CloseReason::Hangup;
                }
            }
            Err(err) => {
                if err.is_auth_failed() {
                    warn!(client = %session.client_name(), error = %err, "authentication failed");
                } else {
                    debug!(client = %session.client_name(), error = %err, "request failed");
                }
                if !send_error(stream, session, reply_id, &err, ctx) {
                    return CloseReason::ProtocolError;
                }
                if err.hangup() {
                    return CloseReason::Hangup;
                }
            }
        }
    }
}

/// Writes an error reply. Returns false if the socket failed.
fn send_error<S: Write>(
    stream: &mut S,
    session: &Session,
    id: MessageId,
    err: &RequestError,
    ctx: &ServerContext,
) -> bool {
    let reply = match Message::text(id, &err.reply_text(), ctx.policy.text_terminator) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(client = %session.client_name(), error = %e, "error reply too large");
            return false;
        }
    };
    match reply.write_to(stream) {
        Ok(()) => true,
        Err(e) => {
            debug!(client = %session.client_name(), error = %e, "cannot send error reply");
            false
        }
    }
}
