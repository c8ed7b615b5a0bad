//! Network lists and remote configuration.

use std::fs;

use dds_wire::MessageId;
use tracing::info;

use super::{Outcome, reply_bytes};
use crate::admin::{ConfigName, named_body, validate_netlist_name};
use crate::context::ServerContext;
use crate::error::{ErrorCode, RequestError};
use crate::passwd_file::write_atomic;
use crate::session::Session;

/// Looks in the user's sandbox first, then the shared list directory.
pub(super) fn send_netlist(
    name: &str,
    session: &mut Session,
    ctx: &ServerContext,
) -> Result<Outcome, RequestError> {
    let l = session.require_login()?;
    let name = validate_netlist_name(name)?;

    let candidates = [
        l.user.sandbox().file(name),
        ctx.admin_files.netlist_dir().join(name),
    ];
    let contents = candidates
        .iter()
        .find_map(|path| fs::read(path).ok())
        .ok_or_else(|| {
            RequestError::new(ErrorCode::NoSuchFile, format!("no network list '{name}'"))
        })?;

    Ok(Outcome::reply(reply_bytes(
        MessageId::GetNetlist,
        named_body(name, &contents),
    )?))
}

pub(super) fn receive_netlist(
    name: &str,
    contents: &[u8],
    session: &mut Session,
) -> Result<Outcome, RequestError> {
    let l = session.require_login()?;
    let name = validate_netlist_name(name)?;
    let path = l.user.sandbox().file(name);
    write_atomic(&path, contents).map_err(|e| {
        RequestError::new(
            ErrorCode::NoSuchFile,
            format!("cannot write '{}': {e}", path.display()),
        )
    })?;
    info!(user = %l.user.name(), netlist = %name, bytes = contents.len(), "stored network list");

    Ok(Outcome::reply(reply_bytes(
        MessageId::PutNetlist,
        named_body(name, &[]),
    )?))
}

pub(super) fn return_config(
    name: &str,
    session: &mut Session,
    ctx: &ServerContext,
) -> Result<Outcome, RequestError> {
    session.require_admin()?;
    let config = ConfigName::parse(name)?;
    let contents = ctx.admin_files.read(&config)?;
    Ok(Outcome::reply(reply_bytes(
        MessageId::RetConfig,
        named_body(name, &contents),
    )?))
}

pub(super) fn install_config(
    name: &str,
    contents: &[u8],
    session: &mut Session,
    ctx: &ServerContext,
) -> Result<Outcome, RequestError> {
    let l = session.require_admin()?;
    let config = ConfigName::parse(name)?;
    ctx.admin_files.install(&config, contents)?;
    info!(user = %l.user.name(), config = %name, "configuration installed remotely");
    Ok(Outcome::reply(reply_bytes(
        MessageId::InstConfig,
        named_body(name, &[]),
    )?))
}
