use std::fs;
use std::sync::Arc;

use chrono::Utc;
use dds_wire::{Message, MessageId};
use test_case::test_case;

use super::*;
use crate::admin::{NAME_FIELD_LEN, named_body};
use crate::archive::DcpMsg;
use crate::auth::{authenticator, format_time_str, obfuscate_password, parse_time_str, password_hash};
use crate::context::testing::{TestEnv, auth_hello_body};
use crate::criteria::{CRITERIA_FILE_NAME, header_field};
use crate::session::PeerInfo;

const PASSWORD: &str = "Correct-Horse-42";

fn new_session() -> Session {
    Session::new(Arc::new(PeerInfo::new(1, "127.0.0.1:40000".parse().unwrap())))
}

fn run(
    env: &TestEnv,
    session: &mut Session,
    id: MessageId,
    body: impl Into<Bytes>,
) -> Result<Outcome, RequestError> {
    let msg = Message::new(id, body).unwrap();
    dispatch(&msg).unwrap().execute(session, &env.ctx)
}

fn reply_text_of(outcome: &Outcome) -> String {
    outcome.reply.as_ref().unwrap().body_text().into_owned()
}

/// A session logged in with an authenticated hello.
fn auth_session(env: &TestEnv, name: &str, admin: bool) -> Session {
    env.add_user(name, PASSWORD, admin);
    let mut session = new_session();
    run(env, &mut session, MessageId::AuthHello, auth_hello_body(name, PASSWORD, 14)).unwrap();
    session
}

/// A session logged in with a plain hello.
fn plain_session(env: &TestEnv, name: &str, version: u32) -> Session {
    env.add_sandbox(name);
    let mut session = new_session();
    run(env, &mut session, MessageId::Hello, format!("{name} {version}")).unwrap();
    session
}

// ---- dispatch ----

#[test_case(MessageId::Start)]
#[test_case(MessageId::NetlistList)]
#[test_case(MessageId::ReservedQ)]
#[test_case(MessageId::ReservedR)]
fn reserved_opcodes_have_no_command(id: MessageId) {
    assert!(dispatch(&Message::empty(id)).is_none());
}

#[test]
fn every_other_opcode_dispatches() {
    for id in MessageId::ALL.iter().filter(|id| !id.is_reserved()) {
        let cmd = dispatch(&Message::empty(*id)).unwrap();
        assert_eq!(cmd.reply_id(), *id, "{}", cmd.name());
    }
}

#[test]
fn criteria_direction_from_body() {
    let send = dispatch(&Message::empty(MessageId::Criteria)).unwrap();
    assert_eq!(send, Command::SendSearchCriteria);

    let query = dispatch(&Message::new(MessageId::Criteria, &b"?"[..]).unwrap()).unwrap();
    assert_eq!(query, Command::SendSearchCriteria);

    let mut body = header_field().to_vec();
    body.extend_from_slice(b"DCP_ADDRESS: CE1234AB\n");
    let recv = dispatch(&Message::new(MessageId::Criteria, body.clone()).unwrap()).unwrap();
    assert_eq!(
        recv,
        Command::ReceiveSearchCriteria {
            body: Bytes::from(body)
        }
    );
}

#[test]
fn netlist_body_split() {
    let body = named_body("goes.nl", b"CE1234AB\n");
    let cmd = dispatch(&Message::new(MessageId::PutNetlist, body).unwrap()).unwrap();
    assert_eq!(
        cmd,
        Command::ReceiveNetworkList {
            name: "goes.nl".to_string(),
            contents: Bytes::from_static(b"CE1234AB\n"),
        }
    );

    let cmd = dispatch(&Message::new(MessageId::GetNetlist, &b"goes.nl\0"[..]).unwrap()).unwrap();
    assert_eq!(
        cmd,
        Command::SendNetworkList {
            name: "goes.nl".to_string()
        }
    );
}

#[test]
fn outage_range_is_optional() {
    let cmd = dispatch(&Message::empty(MessageId::GetOutages)).unwrap();
    assert_eq!(cmd, Command::GetOutages { range: None });
    let cmd = dispatch(&Message::new(MessageId::GetOutages, &b" 24001 24002 \0"[..]).unwrap()).unwrap();
    assert_eq!(
        cmd,
        Command::GetOutages {
            range: Some("24001 24002".to_string())
        }
    );
}

// ---- state machine ----

#[test_case(MessageId::Status)]
#[test_case(MessageId::Dcp)]
#[test_case(MessageId::DcpBlock)]
#[test_case(MessageId::DcpBlockExt)]
#[test_case(MessageId::Criteria)]
#[test_case(MessageId::GetNetlist)]
#[test_case(MessageId::PutNetlist)]
#[test_case(MessageId::Events)]
#[test_case(MessageId::RetConfig)]
#[test_case(MessageId::InstConfig)]
#[test_case(MessageId::GetOutages)]
#[test_case(MessageId::AssertOutages)]
#[test_case(MessageId::User)]
fn commands_before_login_fail_authentication(id: MessageId) {
    let env = TestEnv::new();
    let mut session = new_session();
    let err = run(&env, &mut session, id, Bytes::new()).unwrap_err();
    assert!(err.is_auth_failed(), "{id}: {err}");
    assert!(err.hangup());
    assert!(session.user().is_none());
}

#[test]
fn idle_and_echo_need_no_login() {
    let env = TestEnv::new();
    let mut session = new_session();

    let idle = run(&env, &mut session, MessageId::Idle, Bytes::new()).unwrap();
    assert_eq!(idle.reply.unwrap().id(), MessageId::Idle);
    assert!(!idle.hangup);

    let echo = run(&env, &mut session, MessageId::Echo, &b"ping"[..]).unwrap();
    assert_eq!(echo.reply.unwrap().body().as_ref(), b"ping");
}

#[test]
fn goodbye_replies_then_hangs_up() {
    let env = TestEnv::new();
    let mut session = plain_session(&env, "alice", 14);
    let out = run(&env, &mut session, MessageId::Goodbye, Bytes::new()).unwrap();
    assert!(out.hangup);
    assert_eq!(out.reply.unwrap().id(), MessageId::Goodbye);
    assert!(session.is_closed());
}

// ---- hello ----

#[test]
fn hello_unknown_user_fails() {
    let env = TestEnv::new();
    let mut session = new_session();
    let err = run(&env, &mut session, MessageId::Hello, "nobody 14").unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthFailed);
    assert!(err.hangup());
    assert!(err.reply_text().starts_with("?35,0,"));
}

#[test]
fn hello_without_credential() {
    let env = TestEnv::new();
    env.add_sandbox("alice");
    let mut session = new_session();
    let out = run(&env, &mut session, MessageId::Hello, "alice\0").unwrap();
    assert_eq!(reply_text_of(&out), "alice 14");

    let user = session.user().unwrap();
    assert_eq!(user.name(), "alice");
    assert_eq!(user.client_version(), crate::session::DEFAULT_CLIENT_VERSION);
    assert!(!user.is_authenticated());
    assert!(user.session_key().is_none());
}

#[test]
fn hello_refused_when_auth_required() {
    let env = TestEnv::with_config(|c| c.server.require_auth = true);
    env.add_sandbox("alice");
    let mut session = new_session();
    let err = run(&env, &mut session, MessageId::Hello, "alice 14").unwrap_err();
    assert!(err.is_auth_failed());
}

#[test]
fn hello_refused_for_suspended_user() {
    let env = TestEnv::new();
    env.add_sandbox("alice");
    let sandbox = env.ctx.sandboxes.resolve("alice").unwrap();
    sandbox
        .suspend_until(Some(crate::sandbox::permanent_suspension()))
        .unwrap();
    let mut session = new_session();
    let err = run(&env, &mut session, MessageId::Hello, "alice").unwrap_err();
    assert!(err.message().contains("suspended"));
}

// ---- authenticated hello ----

#[test]
fn auth_hello_mints_session_key() {
    let env = TestEnv::new();
    env.add_user("alice", PASSWORD, false);
    let mut session = new_session();
    let body = auth_hello_body("alice", PASSWORD, 14);
    let out = run(&env, &mut session, MessageId::AuthHello, body.clone()).unwrap();

    let stamp = body.split_whitespace().nth(1).unwrap();
    assert_eq!(reply_text_of(&out), format!("alice {stamp} 14"));

    let user = session.user().unwrap();
    assert!(user.is_authenticated());
    assert!(!user.is_admin());
    assert_eq!(user.session_key().unwrap().len(), 32);
    assert_eq!(user.client_version(), 14);
}

#[test_case(false, true ; "admin role grants admin")]
#[test_case(true, false ; "local admin only refuses remote sandbox")]
fn auth_hello_admin_flag(local_admin_only: bool, expect_admin: bool) {
    let env = TestEnv::with_config(|c| c.server.local_admin_only = local_admin_only);
    let session = auth_session(&env, "root", true);
    assert_eq!(session.user().unwrap().is_admin(), expect_admin);
}

#[test]
fn auth_hello_wrong_password() {
    let env = TestEnv::new();
    env.add_user("alice", PASSWORD, false);
    let mut session = new_session();
    let err = run(
        &env,
        &mut session,
        MessageId::AuthHello,
        auth_hello_body("alice", "Wrong-Horse-42", 14),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthFailed);
    assert!(session.user().is_none());
}

#[test]
fn repeated_bad_passwords_suspend() {
    let env = TestEnv::new();
    env.add_user("alice", PASSWORD, false);
    for _ in 0..crate::auth::MAX_BAD_PASSWORDS {
        let mut session = new_session();
        run(
            &env,
            &mut session,
            MessageId::AuthHello,
            auth_hello_body("alice", "Wrong-Horse-42", 14),
        )
        .unwrap_err();
    }
    assert!(env.ctx.sandboxes.resolve("alice").unwrap().is_suspended());

    let mut session = new_session();
    let err = run(
        &env,
        &mut session,
        MessageId::AuthHello,
        auth_hello_body("alice", PASSWORD, 14),
    )
    .unwrap_err();
    assert!(err.message().contains("suspended"));
}

#[test]
fn auth_hello_rejects_clock_skew() {
    let env = TestEnv::new();
    env.add_user("alice", PASSWORD, false);
    let stamp = format_time_str(Utc::now() - chrono::Duration::hours(2));
    let t = u32::try_from(parse_time_str(&stamp).unwrap().timestamp()).unwrap();
    let auth = authenticator("alice", &password_hash("alice", PASSWORD), t);

    let mut session = new_session();
    let err = run(
        &env,
        &mut session,
        MessageId::AuthHello,
        format!("alice {stamp} {auth} 14"),
    )
    .unwrap_err();
    assert!(err.message().contains("clock"));
}

#[test]
fn auth_hello_needs_password_entry_and_role() {
    let env = TestEnv::new();
    env.add_sandbox("ghost");
    let mut session = new_session();
    let err = run(
        &env,
        &mut session,
        MessageId::AuthHello,
        auth_hello_body("ghost", PASSWORD, 14),
    )
    .unwrap_err();
    assert!(err.is_auth_failed());

    env.add_user("norole", PASSWORD, false);
    let mut entry = env.ctx.passwords.get("norole").unwrap();
    entry.roles.clear();
    env.ctx.passwords.upsert(entry).unwrap();
    let err = run(
        &env,
        &mut session,
        MessageId::AuthHello,
        auth_hello_body("norole", PASSWORD, 14),
    )
    .unwrap_err();
    assert!(err.message().contains("role"));
}

#[test]
fn auth_hello_too_few_tokens() {
    let env = TestEnv::new();
    let mut session = new_session();
    let err = run(&env, &mut session, MessageId::AuthHello, "alice 24061130509").unwrap_err();
    assert!(err.is_auth_failed());
}

// ---- admin gate ----

#[test_case(MessageId::RetConfig)]
#[test_case(MessageId::InstConfig)]
fn config_requires_admin(id: MessageId) {
    let env = TestEnv::new();
    fs::write(&env.config.admin.lrgs_config, b"original").unwrap();
    let mut session = auth_session(&env, "alice", false);

    let err = run(&env, &mut session, id, named_body("lrgs", b"replaced")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAdmin);
    assert_eq!(fs::read(&env.config.admin.lrgs_config).unwrap(), b"original");
}

#[test]
fn admin_config_round_trip() {
    let env = TestEnv::new();
    let mut session = auth_session(&env, "root", true);

    let out = run(&env, &mut session, MessageId::InstConfig, named_body("lrgs", b"archiveDir=/a\n")).unwrap();
    assert_eq!(out.reply.unwrap().len(), NAME_FIELD_LEN);

    let out = run(&env, &mut session, MessageId::RetConfig, "LRGS").unwrap();
    let body = out.reply.unwrap();
    assert_eq!(&body.body()[..4], b"LRGS");
    assert_eq!(&body.body()[NAME_FIELD_LEN..], b"archiveDir=/a\n");

    let err = run(&env, &mut session, MessageId::RetConfig, "ddsrecv").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSuchFile);
    assert!(!err.hangup());

    let err = run(&env, &mut session, MessageId::RetConfig, "bogus").unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadKeyword);
}

// ---- criteria and retrieval ----

fn criteria_body(text: &str) -> Vec<u8> {
    let mut body = header_field().to_vec();
    body.extend_from_slice(text.as_bytes());
    body
}

#[test]
fn empty_criteria_echoes_stored() {
    let env = TestEnv::new();
    let mut session = plain_session(&env, "alice", 14);

    let out = run(&env, &mut session, MessageId::Criteria, Bytes::new()).unwrap();
    assert_eq!(out.reply.unwrap().body().as_ref(), &header_field()[..]);

    let text = "DAPS_SINCE: now - 1 hour\nDCP_ADDRESS: CE1234AB\n";
    let out = run(&env, &mut session, MessageId::Criteria, criteria_body(text)).unwrap();
    assert_eq!(out.reply.unwrap().body().as_ref(), &header_field()[..]);

    let out = run(&env, &mut session, MessageId::Criteria, Bytes::new()).unwrap();
    let reply = out.reply.unwrap();
    assert_eq!(&reply.body()[..10], b"searchcrit");
    assert_eq!(&reply.body()[50..], text.as_bytes());

    let sandbox = env.ctx.sandboxes.resolve("alice").unwrap();
    assert_eq!(
        fs::read_to_string(sandbox.file(CRITERIA_FILE_NAME)).unwrap(),
        text
    );
}

#[test]
fn malformed_criteria_keeps_session() {
    let env = TestEnv::new();
    let mut session = plain_session(&env, "alice", 14);
    let err = run(&env, &mut session, MessageId::Criteria, criteria_body("GARBAGE\n")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadSearchCriteria);
    assert!(!err.hangup());
}

#[test]
fn criteria_dcp_limit() {
    let env = TestEnv::new();
    env.add_user("alice", PASSWORD, false);
    let mut entry = env.ctx.passwords.get("alice").unwrap();
    entry.max_dcps = Some(1);
    env.ctx.passwords.upsert(entry).unwrap();

    let mut session = new_session();
    run(&env, &mut session, MessageId::AuthHello, auth_hello_body("alice", PASSWORD, 14)).unwrap();
    let err = run(
        &env,
        &mut session,
        MessageId::Criteria,
        criteria_body("DCP_ADDRESS: AAAA0001\nDCP_ADDRESS: BBBB0002\n"),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadSearchCriteria);
    assert!(!err.hangup());

    run(
        &env,
        &mut session,
        MessageId::Criteria,
        criteria_body("DCP_ADDRESS: AAAA0001\n"),
    )
    .unwrap();
}

#[test]
fn next_message_timeout_is_recoverable() {
    let env = TestEnv::new();
    let mut session = plain_session(&env, "alice", 14);
    let err = run(&env, &mut session, MessageId::Dcp, Bytes::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MsgTimeout);
    assert!(!err.hangup());

    env.archive.push_message(DcpMsg::new("CE1234AB", b"payload".to_vec()));
    let out = run(&env, &mut session, MessageId::Dcp, Bytes::new()).unwrap();
    assert_eq!(out.reply.unwrap().body().as_ref(), b"payload");
}

#[test]
fn blocks_need_version_four() {
    let env = TestEnv::new();
    for p in ["one", "two", "three"] {
        env.archive.push_message(DcpMsg::new("CE1234AB", p.as_bytes().to_vec()));
    }

    let mut old = plain_session(&env, "old", 3);
    let out = run(&env, &mut old, MessageId::DcpBlock, Bytes::new()).unwrap();
    assert_eq!(out.reply.unwrap().body().as_ref(), b"one");

    let mut new = plain_session(&env, "new", 14);
    let out = run(&env, &mut new, MessageId::DcpBlock, Bytes::new()).unwrap();
    assert_eq!(out.reply.unwrap().body().as_ref(), b"onetwothree");
}

#[test]
fn extended_block_is_xml() {
    let env = TestEnv::new();
    env.archive.push_message(DcpMsg::new("CE1234AB", b"hello".to_vec()));
    let mut session = plain_session(&env, "alice", 14);
    let out = run(&env, &mut session, MessageId::DcpBlockExt, Bytes::new()).unwrap();
    let xml = reply_text_of(&out);
    assert!(xml.starts_with("<MsgBlock>"));
    assert!(xml.contains("platformId=\"CE1234AB\""));
    assert!(xml.contains("<BinaryMsg>aGVsbG8=</BinaryMsg>"));
}

#[test]
fn block_overflow_is_sent_next_time() {
    let env = TestEnv::new();
    env.archive.push_message(DcpMsg::new("AAAA0001", vec![b'a'; 49_000]));
    env.archive.push_message(DcpMsg::new("BBBB0002", vec![b'b'; 60_000]));
    let mut session = plain_session(&env, "alice", 14);

    let out = run(&env, &mut session, MessageId::DcpBlock, Bytes::new()).unwrap();
    let body = out.reply.unwrap().body().clone();
    assert_eq!(body.len(), 49_000);
    assert!(body.iter().all(|&b| b == b'a'));

    let out = run(&env, &mut session, MessageId::DcpBlock, Bytes::new()).unwrap();
    let body = out.reply.unwrap().body().clone();
    assert_eq!(body.len(), 60_000);
    assert!(body.iter().all(|&b| b == b'b'));

    let err = run(&env, &mut session, MessageId::DcpBlock, Bytes::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MsgTimeout);
}

#[test]
fn extended_block_sized_after_encoding() {
    let env = TestEnv::new();
    env.archive.push_message(DcpMsg::new("AAAA0001", vec![b'a'; 32_999]));
    env.archive.push_message(DcpMsg::new("BBBB0002", vec![b'b'; 60_000]));
    let mut session = plain_session(&env, "alice", 14);

    let out = run(&env, &mut session, MessageId::DcpBlockExt, Bytes::new()).unwrap();
    let xml = reply_text_of(&out);
    assert_eq!(xml.matches("<DcpMsg ").count(), 1);
    assert!(xml.contains("platformId=\"AAAA0001\""));

    let out = run(&env, &mut session, MessageId::DcpBlockExt, Bytes::new()).unwrap();
    let xml = reply_text_of(&out);
    assert_eq!(xml.matches("<DcpMsg ").count(), 1);
    assert!(xml.contains("platformId=\"BBBB0002\""));

    let err = run(&env, &mut session, MessageId::Dcp, Bytes::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::MsgTimeout);
}

#[test_case(MessageId::Dcp, 100_000 ; "single over body limit")]
#[test_case(MessageId::DcpBlock, 100_000 ; "legacy block over body limit")]
#[test_case(MessageId::DcpBlockExt, 80_000 ; "extended block over limit once encoded")]
fn oversized_message_is_skipped_without_hangup(id: MessageId, size: usize) {
    let env = TestEnv::new();
    env.archive.push_message(DcpMsg::new("AAAA0001", vec![b'a'; size]));
    env.archive.push_message(DcpMsg::new("BBBB0002", b"small".to_vec()));
    let mut session = plain_session(&env, "alice", 14);

    let err = run(&env, &mut session, id, Bytes::new()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ArchiveError);
    assert!(!err.hangup());

    let out = run(&env, &mut session, MessageId::Dcp, Bytes::new()).unwrap();
    assert_eq!(out.reply.unwrap().body().as_ref(), b"small");
}

// ---- netlists, events, outages ----

#[test]
fn netlists_private_then_shared() {
    let env = TestEnv::new();
    let mut session = plain_session(&env, "alice", 14);

    let out = run(&env, &mut session, MessageId::PutNetlist, named_body("mine.nl", b"AAAA0001\n")).unwrap();
    assert_eq!(out.reply.unwrap().len(), NAME_FIELD_LEN);

    let out = run(&env, &mut session, MessageId::GetNetlist, named_body("mine.nl", b"")).unwrap();
    assert_eq!(&out.reply.unwrap().body()[NAME_FIELD_LEN..], b"AAAA0001\n");

    fs::create_dir_all(&env.config.admin.netlist_dir).unwrap();
    fs::write(env.config.admin.netlist_dir.join("shared.nl"), b"BBBB0002\n").unwrap();
    let out = run(&env, &mut session, MessageId::GetNetlist, "shared.nl").unwrap();
    assert_eq!(&out.reply.unwrap().body()[NAME_FIELD_LEN..], b"BBBB0002\n");

    let err = run(&env, &mut session, MessageId::GetNetlist, "missing.nl").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoSuchFile);

    let err = run(&env, &mut session, MessageId::PutNetlist, named_body("../x", b"")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadNetlist);
    assert!(!err.hangup());
}

#[test_case("suspended" ; "suspension marker")]
#[test_case("searchcrit" ; "criteria file")]
#[test_case("mine.nl.tmp" ; "temp file")]
fn netlist_cannot_replace_sandbox_files(name: &str) {
    let env = TestEnv::new();
    let mut session = plain_session(&env, "alice", 14);

    let err = run(&env, &mut session, MessageId::PutNetlist, named_body(name, b"garbage\n")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadNetlist);
    assert!(!err.hangup());
    assert!(!session.user().unwrap().sandbox().file(name).exists());

    let mut again = new_session();
    run(&env, &mut again, MessageId::Hello, "alice 14").unwrap();
}

#[test]
fn events_advance_cursor() {
    let env = TestEnv::new();
    env.archive.push_event("archive started");
    env.archive.push_event("ddsrecv connected");
    let mut session = plain_session(&env, "alice", 14);

    let out = run(&env, &mut session, MessageId::Events, Bytes::new()).unwrap();
    assert_eq!(reply_text_of(&out), "archive started\nddsrecv connected\n");
    let out = run(&env, &mut session, MessageId::Events, Bytes::new()).unwrap();
    assert_eq!(reply_text_of(&out), "");
}

#[test]
fn outages_need_admin_to_assert() {
    let env = TestEnv::new();
    let doc = "<outage id=\"7\"/>";

    let mut user = auth_session(&env, "alice", false);
    let err = run(&env, &mut user, MessageId::AssertOutages, doc).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAdmin);

    let mut admin = auth_session(&env, "root", true);
    run(&env, &mut admin, MessageId::AssertOutages, doc).unwrap();
    let out = run(&env, &mut user, MessageId::GetOutages, Bytes::new()).unwrap();
    assert!(reply_text_of(&out).contains("id=\"7\""));

    let out = run(&env, &mut user, MessageId::Status, Bytes::new()).unwrap();
    assert!(reply_text_of(&out).contains("outages=\"1\""));
}

// ---- set user ----

fn pw_body(session: &Session, name: &str, password: &str) -> String {
    let key = session.user().unwrap().session_key().unwrap();
    format!("pw {name} {}", obfuscate_password(password, key))
}

#[test]
fn set_user_needs_authenticated_hello() {
    let env = TestEnv::new();
    let mut session = plain_session(&env, "alice", 14);
    let err = run(&env, &mut session, MessageId::User, "list").unwrap_err();
    assert!(err.is_auth_failed());
}

#[test]
fn change_own_password() {
    let env = TestEnv::new();
    let mut session = auth_session(&env, "alice", false);
    let new_password = "Tr1cky-Gl4cier!";
    let body = pw_body(&session, "alice", new_password);
    run(&env, &mut session, MessageId::User, body).unwrap();

    let entry = env.ctx.passwords.get("alice").unwrap();
    assert_eq!(entry.password_hash, password_hash("alice", new_password));
    assert_eq!(entry.history, vec![password_hash("alice", PASSWORD)]);

    // Back to the previous password is a reuse
    let body = pw_body(&session, "alice", PASSWORD);
    let err = run(&env, &mut session, MessageId::User, body).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadPassword);
    assert!(!err.hangup());
}

#[test]
fn weak_password_rejected_without_hangup() {
    let env = TestEnv::new();
    let mut session = auth_session(&env, "alice", false);
    let body = pw_body(&session, "alice", "short");
    let err = run(&env, &mut session, MessageId::User, body).unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadPassword);
    assert!(!err.hangup());
}

#[test]
fn other_users_password_needs_admin() {
    let env = TestEnv::new();
    env.add_user("bob", PASSWORD, false);
    let mut alice = auth_session(&env, "alice", false);
    let body = pw_body(&alice, "bob", "Tr1cky-Gl4cier!");
    let err = run(&env, &mut alice, MessageId::User, body).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAdmin);

    let mut root = auth_session(&env, "root", true);
    let body = pw_body(&root, "bob", "Tr1cky-Gl4cier!");
    run(&env, &mut root, MessageId::User, body).unwrap();
    assert_eq!(
        env.ctx.passwords.get("bob").unwrap().password_hash,
        password_hash("bob", "Tr1cky-Gl4cier!")
    );
}

#[test]
fn admin_lists_and_removes_users() {
    let env = TestEnv::new();
    env.add_user("bob", PASSWORD, false);
    let mut root = auth_session(&env, "root", true);

    let out = run(&env, &mut root, MessageId::User, "list").unwrap();
    assert_eq!(reply_text_of(&out), "bob dds\nroot dds,admin\n");

    run(&env, &mut root, MessageId::User, "rm bob").unwrap();
    assert!(env.ctx.passwords.get("bob").is_none());

    let err = run(&env, &mut root, MessageId::User, "rm bob").unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadKeyword);
    assert!(!err.hangup());

    let err = run(&env, &mut root, MessageId::User, "frobnicate").unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadKeyword);
}
