//! Hello and authenticated hello.

use chrono::Utc;
use dds_wire::MessageId;
use tracing::{debug, info, warn};

use super::{Outcome, SERVER_PROTOCOL_VERSION, reply_text};
use crate::archive::RetrievalOptions;
use crate::auth::{
    BAD_PASSWORD_SUSPENSION_MINUTES, MAX_BAD_PASSWORDS, authenticator, parse_time_str,
    session_key, verify_authenticator,
};
use crate::context::ServerContext;
use crate::error::RequestError;
use crate::passwd_file::{ROLE_DDS, UserEntry};
use crate::sandbox::Sandbox;
use crate::session::{DEFAULT_CLIENT_VERSION, Session, User};

fn parse_version(token: Option<&str>) -> u32 {
    match token.map(str::parse::<u32>) {
        Some(Ok(v)) => v,
        Some(Err(_)) => {
            debug!(token = ?token, "unparsable client version, assuming default");
            DEFAULT_CLIENT_VERSION
        }
        None => DEFAULT_CLIENT_VERSION,
    }
}

fn options_for(entry: Option<&UserEntry>) -> RetrievalOptions {
    let mut options = RetrievalOptions::default();
    if let Some(entry) = entry {
        options.dcp_limit = entry.max_dcps.unwrap_or(-1);
        options.good_only = entry.good_only;
        options.disable_back_link_search = entry.disable_back_link_search;
    }
    options
}

fn check_address(entry: Option<&UserEntry>, session: &Session) -> Result<(), RequestError> {
    let ip = session.peer().addr().ip().to_string();
    match entry {
        Some(entry) if !entry.allows_address(&ip) => Err(RequestError::auth_failed(format!(
            "user '{}' may not connect from {ip}",
            entry.name
        ))),
        _ => Ok(()),
    }
}

fn refuse_if_suspended(sandbox: &Sandbox) -> Result<(), RequestError> {
    match sandbox.suspended_until() {
        Some(until) => Err(RequestError::auth_failed(format!(
            "user '{}' is suspended until {}",
            sandbox.username(),
            until.format("%Y-%m-%d %H:%M:%S UTC")
        ))),
        None => Ok(()),
    }
}

fn login(user: User, session: &mut Session, ctx: &ServerContext) {
    let retriever = ctx.archive.open_retriever(user.name());
    session.login(user, retriever);
    info!(client = %session.client_name(), "client logged in");
}

/// `username [version]`, no credential.
pub(super) fn hello(
    args: &str,
    session: &mut Session,
    ctx: &ServerContext,
) -> Result<Outcome, RequestError> {
    let mut words = args.split_whitespace();
    let username = words
        .next()
        .ok_or_else(|| RequestError::auth_failed("hello without a username"))?;
    let version = parse_version(words.next());

    if ctx.policy.require_auth {
        return Err(RequestError::auth_failed(
            "server requires an authenticated hello",
        ));
    }

    let sandbox = ctx.sandboxes.resolve(username)?;
    let entry = ctx.passwords.get(username);
    check_address(entry.as_ref(), session)?;
    refuse_if_suspended(&sandbox)?;

    let mut user = User::unauthenticated(sandbox, version);
    user.options = options_for(entry.as_ref());
    login(user, session, ctx);

    reply_text(
        MessageId::Hello,
        &format!("{username} {SERVER_PROTOCOL_VERSION}"),
        ctx,
    )
}

/// `username timestr authenticator [version]`.
pub(super) fn auth_hello(
    args: &str,
    session: &mut Session,
    ctx: &ServerContext,
) -> Result<Outcome, RequestError> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let [username, stamp, given, rest @ ..] = tokens.as_slice() else {
        return Err(RequestError::auth_failed(
            "authenticated hello needs username, time and authenticator",
        ));
    };
    let version = parse_version(rest.first().copied());

    let sandbox = ctx.sandboxes.resolve(username)?;
    let entry = ctx
        .passwords
        .get(username)
        .ok_or_else(|| RequestError::auth_failed(format!("no password for user '{username}'")))?;
    if !entry.has_role(ROLE_DDS) {
        return Err(RequestError::auth_failed(format!(
            "user '{username}' does not have the {ROLE_DDS} role"
        )));
    }
    check_address(Some(&entry), session)?;

    let time = parse_time_str(stamp)
        .ok_or_else(|| RequestError::auth_failed(format!("bad time string '{stamp}'")))?;
    let skew = (Utc::now() - time).num_seconds().unsigned_abs();
    if skew > ctx.policy.max_clock_diff.as_secs() {
        return Err(RequestError::auth_failed(format!(
            "client clock differs from server by {skew} seconds"
        )));
    }
    let t = u32::try_from(time.timestamp())
        .map_err(|_| RequestError::auth_failed(format!("time string '{stamp}' out of range")))?;

    let expected = authenticator(username, &entry.password_hash, t);
    if entry.password_hash.is_empty() || !verify_authenticator(&expected, given) {
        let failures = ctx.login_attempts.record_failure(username);
        warn!(user = %username, failures, peer = %session.peer().addr(), "bad password");
        if failures >= MAX_BAD_PASSWORDS {
            let until = Utc::now() + chrono::Duration::minutes(BAD_PASSWORD_SUSPENSION_MINUTES);
            if let Err(e) = sandbox.suspend_until(Some(until)) {
                warn!(user = %username, error = %e, "cannot suspend user");
            }
            ctx.login_attempts.reset(username);
        }
        return Err(RequestError::auth_failed(format!(
            "bad password for user '{username}'"
        )));
    }
    ctx.login_attempts.reset(username);
    refuse_if_suspended(&sandbox)?;

    let local = entry.local || sandbox.is_local();
    let admin = entry.is_admin() && (local || !ctx.policy.local_admin_only);
    let key = session_key(&expected, &entry.password_hash, t);
    let mut user = User::authenticated(sandbox, version, key, admin, entry.local);
    user.options = options_for(Some(&entry));
    login(user, session, ctx);

    reply_text(
        MessageId::AuthHello,
        &format!("{username} {stamp} {SERVER_PROTOCOL_VERSION}"),
        ctx,
    )
}
