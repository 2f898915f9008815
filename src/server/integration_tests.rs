//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Wiremap.
//
// Wiremap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Wiremap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Wiremap. If not, see <http://www.gnu.org/licenses/>.

//! End-to-end tests: a real listener, the in-memory backend, and the
//! crate's own client talking RFC 3501 over a socket.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use super::Server;
use crate::backend::memory::{MemoryBackend, UpdateSenders};
use crate::backend::{ExpungeUpdate, MessageUpdate, Update};
use crate::client::Client;
use crate::model::message::{DELETED_FLAG, FLAGGED_FLAG, SEEN_FLAG};
use crate::model::{Message, SearchCriteria, StatusItem};
use crate::proto::{RespLine, StatusType};
use crate::support::error::Error;
use crate::wire::Field;

type TestClient = Client<BufReader<TcpStream>, BufWriter<TcpStream>>;

fn set_up() -> (Server, SocketAddr) {
    set_up_with(Arc::new(MemoryBackend::new()), true)
}

fn set_up_with(
    backend: Arc<MemoryBackend>,
    allow_insecure_auth: bool,
) -> (Server, SocketAddr) {
    let server = Server::new(backend);
    server.set_allow_insecure_auth(allow_insecure_auth);
    let addr = server.listen("127.0.0.1:0").unwrap();
    (server, addr)
}

fn connect(addr: SocketAddr) -> TestClient {
    let (client, greeting) = Client::connect(addr).unwrap();
    assert_eq!(StatusType::Ok, greeting.typ);
    assert_eq!(Some("CAPABILITY".to_owned()), greeting.code);
    client
}

fn logged_in(addr: SocketAddr) -> TestClient {
    let mut client = connect(addr);
    client.login("username", "password").unwrap();
    client
}

#[test]
fn greeting_and_capability() {
    let (server, addr) = set_up();
    let mut client = connect(addr);
    assert!(client.caps.contains("IMAP4rev1"));

    let caps = client.capability().unwrap();
    assert!(caps.contains("IMAP4rev1"));
    assert!(caps.contains("AUTH=PLAIN"));
    assert!(!caps.contains("LOGINDISABLED"));

    server.close();
}

#[test]
fn login_disabled_on_insecure_connections() {
    let (server, addr) =
        set_up_with(Arc::new(MemoryBackend::new()), false);
    let mut client = connect(addr);

    let caps = client.capability().unwrap();
    assert!(caps.contains("LOGINDISABLED"));
    assert!(!caps.contains("AUTH=PLAIN"));

    match client.login("username", "password") {
        Err(Error::No(info)) => assert_eq!(
            "Authentication disabled on insecure connections",
            info
        ),
        r => panic!("Unexpected login result: {:?}", r.err()),
    }

    server.close();
}

#[test]
fn authenticate_plain_round_trip() {
    let (server, addr) = set_up();
    let mut client = connect(addr);

    client.authenticate_plain("username", "password").unwrap();
    client.select("INBOX").unwrap();

    server.close();
}

#[test]
fn authenticate_plain_rejects_bad_credentials() {
    let (server, addr) = set_up();
    let mut client = connect(addr);

    assert_matches!(
        Err(Error::No(_)),
        client.authenticate_plain("username", "wrong")
    );

    server.close();
}

#[test]
fn bad_login_is_rejected() {
    let (server, addr) = set_up();
    let mut client = connect(addr);

    match client.login("username", "letmein") {
        Err(Error::No(info)) => {
            assert_eq!("Authentication failed", info)
        },
        r => panic!("Unexpected login result: {:?}", r.err()),
    }

    // The connection is still usable
    client.login("username", "password").unwrap();
    server.close();
}

#[test]
fn select_reports_mailbox_state() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);

    let status = client.select("INBOX").unwrap();
    assert_eq!(1, status.messages);
    assert_eq!(11, status.uid_next);
    assert_eq!(1, status.uid_validity);
    assert!(status.flags.contains(&SEEN_FLAG.to_owned()));
    assert!(status.permanent_flags.contains(&"\\*".to_owned()));
    assert!(!status.read_only);

    let examined = client.examine("INBOX").unwrap();
    assert!(examined.read_only);

    server.close();
}

#[test]
fn select_failure_leaves_authenticated() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);

    assert_matches!(
        Err(Error::No(_)),
        client.select("No/Such/Mailbox")
    );

    // Still Authenticated: SELECT of a real mailbox works, and
    // mailbox-scoped commands without a selection are refused
    match client.fetch("1", &["FLAGS"]) {
        Err(Error::No(info)) => {
            assert_eq!("No mailbox selected", info)
        },
        r => panic!("Unexpected fetch result: {:?}", r.err()),
    }
    client.select("INBOX").unwrap();

    server.close();
}

#[test]
fn uid_fetch_adds_uid_implicitly() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);

    // Two appends bring the mailbox to UIDs {10, 11, 12}
    client
        .append("INBOX", &[], None, b"Subject: two\r\n\r\nsecond")
        .unwrap();
    client
        .append(
            "INBOX",
            &[FLAGGED_FLAG],
            None,
            b"Subject: three\r\n\r\nthird",
        )
        .unwrap();

    let status = client.select("INBOX").unwrap();
    assert_eq!(3, status.messages);

    let messages = client.uid_fetch("1:*", &["FLAGS"]).unwrap();
    assert_eq!(3, messages.len());
    for message in &messages {
        // UID was not requested but must be reported
        assert!(message
            .items
            .iter()
            .any(|item| item.eq_ignore_ascii_case("UID")));
    }
    assert_eq!(
        vec![10, 11, 12],
        messages.iter().map(|m| m.uid).collect::<Vec<_>>()
    );
    assert!(messages[2].flags.contains(&FLAGGED_FLAG.to_owned()));

    // Explicitly requesting UID yields the very same output
    let explicit = client.uid_fetch("1:*", &["UID", "FLAGS"]).unwrap();
    assert_eq!(
        messages.iter().map(|m| (m.uid, m.flags.clone())).collect::<Vec<_>>(),
        explicit.iter().map(|m| (m.uid, m.flags.clone())).collect::<Vec<_>>()
    );

    // A narrower UID range selects by UID, not sequence number
    let narrow = client.uid_fetch("10:11", &["FLAGS"]).unwrap();
    assert_eq!(
        vec![10, 11],
        narrow.iter().map(|m| m.uid).collect::<Vec<_>>()
    );

    server.close();
}

#[test]
fn fetch_body_sections_and_partials() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);
    client.select("INBOX").unwrap();

    let messages = client
        .fetch("1", &["BODY.PEEK[TEXT]<0.2>", "RFC822.SIZE"])
        .unwrap();
    assert_eq!(1, messages.len());
    assert_eq!(
        b"Hi".as_slice(),
        messages[0]
            .section(&"BODY[TEXT]<0.2>".parse().unwrap())
            .unwrap()
    );
    assert!(messages[0].size > 0);

    server.close();
}

#[test]
fn store_echoes_fetch_unless_silent() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);
    client.select("INBOX").unwrap();

    let echoes = client
        .store("1", "+FLAGS", &[FLAGGED_FLAG])
        .unwrap();
    assert_eq!(1, echoes.len());
    assert!(echoes[0].flags.contains(&FLAGGED_FLAG.to_owned()));

    let echoes = client
        .store("1", "-FLAGS.SILENT", &[FLAGGED_FLAG])
        .unwrap();
    assert!(echoes.is_empty());

    let messages = client.fetch("1", &["FLAGS"]).unwrap();
    assert!(!messages[0].flags.contains(&FLAGGED_FLAG.to_owned()));

    server.close();
}

#[test]
fn store_refused_on_read_only_mailbox() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);
    client.examine("INBOX").unwrap();

    match client.store("1", "+FLAGS", &[DELETED_FLAG]) {
        Err(Error::No(info)) => {
            assert_eq!("Mailbox opened in read-only mode", info)
        },
        r => panic!("Unexpected store result: {:?}", r.err()),
    }

    server.close();
}

#[test]
fn expunge_reports_descending_sequence_numbers() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);

    client
        .append("INBOX", &[], None, b"Subject: two\r\n\r\nsecond")
        .unwrap();
    client
        .append("INBOX", &[], None, b"Subject: three\r\n\r\nthird")
        .unwrap();
    client.select("INBOX").unwrap();

    client
        .store("1:3", "+FLAGS.SILENT", &[DELETED_FLAG])
        .unwrap();
    let expunged = client.expunge().unwrap();
    assert_eq!(vec![3, 2, 1], expunged);

    let status = client
        .status("INBOX", &[StatusItem::Messages])
        .unwrap();
    assert_eq!(0, status.messages);

    server.close();
}

#[test]
fn search_and_uid_search() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);

    client
        .append(
            "INBOX",
            &[FLAGGED_FLAG],
            None,
            b"Subject: urgent\r\n\r\nrsvp",
        )
        .unwrap();
    client.select("INBOX").unwrap();

    let criteria = SearchCriteria {
        flagged: true,
        ..SearchCriteria::default()
    };
    assert_eq!(vec![2], client.search(&criteria).unwrap());
    assert_eq!(vec![11], client.uid_search(&criteria).unwrap());

    let criteria = SearchCriteria {
        subject: vec!["urgent".to_owned()],
        ..SearchCriteria::default()
    };
    assert_eq!(vec![2], client.search(&criteria).unwrap());

    server.close();
}

#[test]
fn copy_and_mailbox_management() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);

    client.create("Archive").unwrap();
    let names: Vec<String> = client
        .list("", "*")
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert!(names.contains(&"INBOX".to_owned()));
    assert!(names.contains(&"Archive".to_owned()));

    client.select("INBOX").unwrap();
    client.copy("1", "Archive").unwrap();
    let status = client
        .status("Archive", &[StatusItem::Messages])
        .unwrap();
    assert_eq!(1, status.messages);

    client.subscribe("Archive").unwrap();
    let subscribed: Vec<String> = client
        .lsub("", "*")
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert_eq!(vec!["Archive".to_owned()], subscribed);

    client.close().unwrap();
    client.rename("Archive", "Vault").unwrap();
    client.delete("Vault").unwrap();

    server.close();
}

#[test]
fn close_unselects_without_expunge_responses() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);
    client.select("INBOX").unwrap();
    client
        .store("1", "+FLAGS.SILENT", &[DELETED_FLAG])
        .unwrap();

    // CLOSE expunges but must not stream untagged EXPUNGE
    let (untagged, status) = client.execute("CLOSE", vec![]).unwrap();
    status.err().unwrap();
    assert!(untagged.is_empty());

    match client.fetch("1", &["FLAGS"]) {
        Err(Error::No(info)) => {
            assert_eq!("No mailbox selected", info)
        },
        r => panic!("Unexpected fetch result: {:?}", r.err()),
    }

    server.close();
}

#[test]
fn unknown_and_malformed_commands_get_bad() {
    let (server, addr) = set_up();
    let mut client = connect(addr);

    let (_, status) = client.execute("FROBNICATE", vec![]).unwrap();
    assert_eq!(StatusType::Bad, status.typ);
    assert_eq!("Unknown command", status.info);

    let (_, status) = client.execute("LOGIN", vec![]).unwrap();
    assert_eq!(StatusType::Bad, status.typ);

    // The connection survives both
    client.login("username", "password").unwrap();
    server.close();
}

#[test]
fn uid_with_unsupported_command() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);
    client.select("INBOX").unwrap();

    let (_, status) = client
        .execute("UID", vec![Field::from("NOOP")])
        .unwrap();
    assert_eq!(StatusType::No, status.typ);
    assert_eq!("Command unsupported with UID", status.info);

    server.close();
}

#[test]
fn registered_capabilities_follow_state() {
    let backend = Arc::new(MemoryBackend::new());
    let server = Server::new(backend);
    server.set_allow_insecure_auth(true);
    server.register_capability("XYZZY", super::ConnState::AUTH);
    let addr = server.listen("127.0.0.1:0").unwrap();

    let mut client = connect(addr);
    assert!(!client.capability().unwrap().contains("XYZZY"));

    client.login("username", "password").unwrap();
    assert!(client.capability().unwrap().contains("XYZZY"));

    client.select("INBOX").unwrap();
    assert!(client.capability().unwrap().contains("XYZZY"));

    server.close();
}

#[test]
fn noop_and_check_and_logout() {
    let (server, addr) = set_up();
    let mut client = logged_in(addr);

    client.noop().unwrap();
    client.select("INBOX").unwrap();
    client.check().unwrap();

    client.logout().unwrap();
    assert_matches!(Err(Error::AlreadyLoggedOut), client.logout());

    server.close();
}

fn updating_set_up() -> (Server, SocketAddr, UpdateSenders) {
    let backend = Arc::new(MemoryBackend::new());
    let senders = backend.enable_updates();
    let server = Server::new(backend);
    server.set_allow_insecure_auth(true);
    let addr = server.listen("127.0.0.1:0").unwrap();
    (server, addr, senders)
}

fn flags_update(seq_num: u32, flags: &[&str]) -> MessageUpdate {
    MessageUpdate {
        update: Update {
            username: "username".to_owned(),
            mailbox: "INBOX".to_owned(),
        },
        message: Message {
            seq_num,
            items: vec!["FLAGS".to_owned()],
            flags: flags.iter().map(|&f| f.to_owned()).collect(),
            ..Message::default()
        },
    }
}

#[test]
fn fanout_delivers_to_matching_connections_in_order() {
    let (server, addr, senders) = updating_set_up();

    let mut selected = logged_in(addr);
    selected.select("INBOX").unwrap();

    let mut unselected = logged_in(addr);

    senders
        .messages
        .send(flags_update(1, &[SEEN_FLAG]))
        .unwrap();
    senders
        .messages
        .send(flags_update(1, &[SEEN_FLAG, FLAGGED_FLAG]))
        .unwrap();
    senders
        .expunges
        .send(ExpungeUpdate {
            update: Update {
                username: "username".to_owned(),
                mailbox: "INBOX".to_owned(),
            },
            seq_num: 1,
        })
        .unwrap();

    // Three updates arrive. Ordering is only promised within a channel:
    // the two FETCHes must be in send order, the EXPUNGE lands anywhere.
    let mut fetches = Vec::new();
    let mut expunges = Vec::new();
    for _ in 0..3 {
        match selected.read_response().unwrap() {
            RespLine::Data(fields) => match fields.get(1) {
                Some(f) if *f == Field::from("FETCH") => {
                    fetches.push(fields)
                },
                Some(f) if *f == Field::from("EXPUNGE") => {
                    expunges.push(fields)
                },
                f => panic!("Unexpected data response: {:?}", f),
            },
            r => panic!("Unexpected response: {:?}", r),
        }
    }

    assert_eq!(2, fetches.len());
    assert_eq!(Field::from("1"), fetches[0][0]);
    assert_eq!(
        Field::List(vec![
            Field::from("FLAGS"),
            Field::List(vec![Field::from(SEEN_FLAG)]),
        ]),
        fetches[0][2]
    );
    assert_eq!(
        Field::List(vec![
            Field::from("FLAGS"),
            Field::List(vec![
                Field::from(SEEN_FLAG),
                Field::from(FLAGGED_FLAG),
            ]),
        ]),
        fetches[1][2]
    );
    assert_eq!(
        vec![vec![Field::from("1"), Field::from("EXPUNGE")]],
        expunges
    );

    // The connection without INBOX selected was filtered out: its next
    // NOOP gets only the tagged status
    let (untagged, status) = unselected.execute("NOOP", vec![]).unwrap();
    status.err().unwrap();
    assert!(untagged.is_empty());

    server.close();
}

#[test]
fn fanout_backend_suppresses_synthesised_updates() {
    let (server, addr, senders) = updating_set_up();
    let mut client = logged_in(addr);
    client.select("INBOX").unwrap();

    // With a backend update stream, STORE does not synthesise a FETCH
    // echo and EXPUNGE does not stream untagged responses itself
    let echoes = client
        .store("1", "+FLAGS", &[DELETED_FLAG])
        .unwrap();
    assert!(echoes.is_empty());

    let expunged = client.expunge().unwrap();
    assert!(expunged.is_empty());

    drop(senders);
    server.close();
}
