//! Command model and dispatch.
//!
//! [`dispatch`] turns a decoded [`Message`] into a [`Command`] by opcode.
//! Reserved opcodes yield no command. [`Command::execute`] runs one command
//! against the connection's [`Session`] and the shared [`ServerContext`],
//! producing at most one reply.

mod config;
mod login;
mod retrieval;
mod user;

use bytes::Bytes;
use dds_wire::{Message, MessageId};
use tracing::{Span, instrument};

use crate::admin::{NAME_FIELD_LEN, decode_name_field};
use crate::context::ServerContext;
use crate::error::{ErrorCode, RequestError};
use crate::session::Session;

/// Protocol version this server speaks, sent in hello replies.
pub const SERVER_PROTOCOL_VERSION: u32 = 14;

/// One client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `username [version]`
    Hello { args: String },
    /// `username timestr authenticator [version]`
    AuthHello { args: String },
    Goodbye,
    GetStatus,
    Idle,
    Echo { body: Bytes },
    GetNextDcpMessage,
    GetDcpMessageBlock,
    GetExtendedMessageBlock,
    /// Client asks for the stored criteria.
    SendSearchCriteria,
    /// Client supplies new criteria.
    ReceiveSearchCriteria { body: Bytes },
    SendNetworkList { name: String },
    ReceiveNetworkList { name: String, contents: Bytes },
    GetEvents,
    SetUser { args: String },
    ReturnConfig { name: String },
    InstallConfig { name: String, contents: Bytes },
    GetOutages { range: Option<String> },
    AssertOutages { document: String },
}

/// Maps a message onto its command. Reserved opcodes return `None`.
pub fn dispatch(msg: &Message) -> Option<Command> {
    let body = msg.body();
    let text = || msg.body_text().into_owned();
    let after_name = || body.slice(body.len().min(NAME_FIELD_LEN)..);

    let command = match msg.id() {
        MessageId::Hello => Command::Hello { args: text() },
        MessageId::AuthHello => Command::AuthHello { args: text() },
        MessageId::Goodbye => Command::Goodbye,
        MessageId::Status => Command::GetStatus,
        MessageId::Idle => Command::Idle,
        MessageId::Echo => Command::Echo { body: body.clone() },
        MessageId::Dcp => Command::GetNextDcpMessage,
        MessageId::DcpBlock => Command::GetDcpMessageBlock,
        MessageId::DcpBlockExt => Command::GetExtendedMessageBlock,
        MessageId::Criteria => {
            if body.first().is_none_or(|&b| b == b'?') {
                Command::SendSearchCriteria
            } else {
                Command::ReceiveSearchCriteria { body: body.clone() }
            }
        }
        MessageId::GetNetlist => Command::SendNetworkList {
            name: decode_name_field(body).0,
        },
        MessageId::PutNetlist => Command::ReceiveNetworkList {
            name: decode_name_field(body).0,
            contents: after_name(),
        },
        MessageId::Events => Command::GetEvents,
        MessageId::User => Command::SetUser { args: text() },
        MessageId::RetConfig => Command::ReturnConfig {
            name: decode_name_field(body).0,
        },
        MessageId::InstConfig => Command::InstallConfig {
            name: decode_name_field(body).0,
            contents: after_name(),
        },
        MessageId::GetOutages => {
            let range = text().trim().to_string();
            Command::GetOutages {
                range: (!range.is_empty()).then_some(range),
            }
        }
        MessageId::AssertOutages => Command::AssertOutages { document: text() },
        MessageId::Start | MessageId::NetlistList | MessageId::ReservedQ | MessageId::ReservedR => {
            return None;
        }
    };
    Some(command)
}

/// Result of a successful command.
#[derive(Debug)]
pub struct Outcome {
    pub reply: Option<Message>,
    /// Close the connection after sending the reply.
    pub hangup: bool,
}

impl Outcome {
    pub fn reply(msg: Message) -> Self {
        Self {
            reply: Some(msg),
            hangup: false,
        }
    }
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::AuthHello { .. } => "auth_hello",
            Self::Goodbye => "goodbye",
            Self::GetStatus => "get_status",
            Self::Idle => "idle",
            Self::Echo { .. } => "echo",
            Self::GetNextDcpMessage => "get_next_dcp_message",
            Self::GetDcpMessageBlock => "get_dcp_message_block",
            Self::GetExtendedMessageBlock => "get_extended_message_block",
            Self::SendSearchCriteria => "send_search_criteria",
            Self::ReceiveSearchCriteria { .. } => "receive_search_criteria",
            Self::SendNetworkList { .. } => "send_network_list",
            Self::ReceiveNetworkList { .. } => "receive_network_list",
            Self::GetEvents => "get_events",
            Self::SetUser { .. } => "set_user",
            Self::ReturnConfig { .. } => "return_config",
            Self::InstallConfig { .. } => "install_config",
            Self::GetOutages { .. } => "get_outages",
            Self::AssertOutages { .. } => "assert_outages",
        }
    }

    /// Opcode carried by replies to this command.
    pub fn reply_id(&self) -> MessageId {
        match self {
            Self::Hello { .. } => MessageId::Hello,
            Self::AuthHello { .. } => MessageId::AuthHello,
            Self::Goodbye => MessageId::Goodbye,
            Self::GetStatus => MessageId::Status,
            Self::Idle => MessageId::Idle,
            Self::Echo { .. } => MessageId::Echo,
            Self::GetNextDcpMessage => MessageId::Dcp,
            Self::GetDcpMessageBlock => MessageId::DcpBlock,
            Self::GetExtendedMessageBlock => MessageId::DcpBlockExt,
            Self::SendSearchCriteria | Self::ReceiveSearchCriteria { .. } => MessageId::Criteria,
            Self::SendNetworkList { .. } => MessageId::GetNetlist,
            Self::ReceiveNetworkList { .. } => MessageId::PutNetlist,
            Self::GetEvents => MessageId::Events,
            Self::SetUser { .. } => MessageId::User,
            Self::ReturnConfig { .. } => MessageId::RetConfig,
            Self::InstallConfig { .. } => MessageId::InstConfig,
            Self::GetOutages { .. } => MessageId::GetOutages,
            Self::AssertOutages { .. } => MessageId::AssertOutages,
        }
    }

    /// False for the commands a client may send before logging in.
    pub fn requires_login(&self) -> bool {
        !matches!(
            self,
            Self::Hello { .. } | Self::AuthHello { .. } | Self::Goodbye | Self::Idle | Self::Echo { .. }
        )
    }

    /// Runs the command.
    ///
    /// Errors carry their own hangup decision; the caller turns them into an
    /// error reply on [`Command::reply_id`].
    #[instrument(skip_all, fields(op, user))]
    pub fn execute(self, session: &mut Session, ctx: &ServerContext) -> Result<Outcome, RequestError> {
        let span = Span::current();
        span.record("op", self.name());
        span.record("user", tracing::field::display(session.client_name()));

        if self.requires_login() {
            session.require_login()?;
        }

        let id = self.reply_id();
        match self {
            Self::Hello { args } => login::hello(&args, session, ctx),
            Self::AuthHello { args } => login::auth_hello(&args, session, ctx),
            Self::Goodbye => {
                session.close();
                Ok(Outcome {
                    reply: Some(Message::empty(id)),
                    hangup: true,
                })
            }
            Self::Idle => Ok(Outcome::reply(Message::empty(id))),
            Self::Echo { body } => Ok(Outcome::reply(reply_bytes(id, body)?)),
            Self::GetStatus => reply_text(id, &ctx.archive.status(), ctx),
            Self::GetNextDcpMessage => retrieval::next_message(session),
            Self::GetDcpMessageBlock => retrieval::block(session),
            Self::GetExtendedMessageBlock => retrieval::ext_block(session, ctx),
            Self::SendSearchCriteria => retrieval::send_criteria(session),
            Self::ReceiveSearchCriteria { body } => retrieval::receive_criteria(&body, session),
            Self::GetEvents => retrieval::events(session, ctx),
            Self::SendNetworkList { name } => config::send_netlist(&name, session, ctx),
            Self::ReceiveNetworkList { name, contents } => {
                config::receive_netlist(&name, &contents, session)
            }
            Self::ReturnConfig { name } => config::return_config(&name, session, ctx),
            Self::InstallConfig { name, contents } => {
                config::install_config(&name, &contents, session, ctx)
            }
            Self::GetOutages { range } => {
                let doc = ctx.archive.outages(range.as_deref())?;
                reply_text(id, &doc, ctx)
            }
            Self::AssertOutages { document } => {
                session.require_admin()?;
                ctx.archive.assert_outages(&document)?;
                Ok(Outcome::reply(Message::empty(id)))
            }
            Self::SetUser { args } => user::set_user(&args, session, ctx),
        }
    }
}

/// Wraps raw bytes in a reply, failing if they exceed the body limit.
fn reply_bytes(id: MessageId, body: impl Into<Bytes>) -> Result<Message, RequestError> {
    Message::new(id, body).map_err(|e| RequestError::new(ErrorCode::DdsInternal, e.to_string()))
}

/// Builds a text reply with the configured terminator.
fn reply_text(id: MessageId, text: &str, ctx: &ServerContext) -> Result<Outcome, RequestError> {
    Message::text(id, text, ctx.policy.text_terminator)
        .map(Outcome::reply)
        .map_err(|e| RequestError::new(ErrorCode::DdsInternal, e.to_string()))
}

#[cfg(test)]
mod tests;
