//! Password changes and user administration.
//!
//! ```text
//! pw <name> <hex>   change a password (hex of the password XORed with the session key)
//! list              one line per user: name roles
//! rm <name>         remove a user
//! ```

use dds_wire::{Message, MessageId};
use tracing::info;

use super::{Outcome, reply_text};
use crate::auth::{password_hash, reveal_password};
use crate::context::ServerContext;
use crate::error::{ErrorCode, RequestError};
use crate::session::{LoggedIn, Session};

fn bad_keyword(message: impl Into<String>) -> RequestError {
    RequestError::new(ErrorCode::BadKeyword, message)
}

pub(super) fn set_user(
    args: &str,
    session: &mut Session,
    ctx: &ServerContext,
) -> Result<Outcome, RequestError> {
    let l = session.require_authenticated()?;
    let mut words = args.split_whitespace();
    match words.next() {
        Some("pw") => {
            let (Some(name), Some(hex)) = (words.next(), words.next()) else {
                return Err(bad_keyword("usage: pw <name> <hex>"));
            };
            change_password(l, name, hex, ctx)
        }
        Some("list") => {
            require_admin(l)?;
            let lines: Vec<String> = ctx
                .passwords
                .list()
                .iter()
                .map(|u| format!("{} {}", u.name, u.roles.join(",")))
                .collect();
            let mut text = lines.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            reply_text(MessageId::User, &text, ctx)
        }
        Some("rm") => {
            require_admin(l)?;
            let name = words
                .next()
                .ok_or_else(|| bad_keyword("usage: rm <name>"))?;
            if !ctx.passwords.remove(name)? {
                return Err(bad_keyword(format!("no such user '{name}'")));
            }
            info!(admin = %l.user.name(), user = %name, "user removed remotely");
            Ok(Outcome::reply(Message::empty(MessageId::User)))
        }
        Some(other) => Err(bad_keyword(format!("unknown user command '{other}'"))),
        None => Err(bad_keyword("empty user command")),
    }
}

fn require_admin(l: &LoggedIn) -> Result<(), RequestError> {
    if l.user.is_admin() {
        Ok(())
    } else {
        Err(RequestError::not_admin())
    }
}

fn change_password(
    l: &LoggedIn,
    name: &str,
    hex: &str,
    ctx: &ServerContext,
) -> Result<Outcome, RequestError> {
    if name != l.user.name() {
        require_admin(l)?;
    }
    let key = l
        .user
        .session_key()
        .ok_or_else(|| RequestError::auth_failed("no session key"))?;
    let password =
        reveal_password(hex, key).ok_or_else(|| bad_keyword("undecodable password"))?;
    if ctx.passwords.get(name).is_none() {
        return Err(bad_keyword(format!("no such user '{name}'")));
    }

    let hash = password_hash(name, &password);
    ctx.checker.check(name, &password, &hash)?;
    ctx.passwords.set_password(name, &hash)?;
    info!(by = %l.user.name(), user = %name, "password changed remotely");
    Ok(Outcome::reply(Message::empty(MessageId::User)))
}
