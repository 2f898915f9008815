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

//! An AST-level IMAP client.
//!
//! This is not a polished general-purpose client: it exposes the protocol
//! more or less directly and is mainly used for integration-testing the
//! server and for simple tooling. It does follow the full wire discipline:
//! logical lines with literals, and waiting for the server's `+`
//! continuation before sending each literal payload.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};

use chrono::{DateTime, FixedOffset};
use log::debug;

use crate::model::date::format_date;
use crate::model::{
    MailboxInfo, MailboxStatus, Message, SearchCriteria, StatusItem,
};
use crate::proto::{parse_response_line, Command, RespLine, StatusResp};
use crate::server::ConnState;
use crate::support::error::Error;
use crate::wire::{Field, TokenReader, Writer};

pub struct Client<R, W> {
    reader: TokenReader<R>,
    write: W,
    pub state: ConnState,
    /// Capabilities from the last CAPABILITY response or greeting code.
    pub caps: HashSet<String>,
    next_tag: u64,
    debug: bool,
}

impl Client<BufReader<TcpStream>, BufWriter<TcpStream>> {
    /// Connect over TCP and read the server's greeting.
    pub fn connect(
        addr: impl ToSocketAddrs,
    ) -> Result<(Self, StatusResp), Error> {
        let stream = TcpStream::connect(addr)?;
        let read = BufReader::new(stream.try_clone()?);
        let mut client = Client::new(read, BufWriter::new(stream));
        let greeting = client.read_greeting()?;
        Ok((client, greeting))
    }
}

impl<R: BufRead, W: Write> Client<R, W> {
    pub fn new(read: R, write: W) -> Self {
        Client {
            reader: TokenReader::new(read),
            write,
            state: ConnState::NOT_AUTHENTICATED,
            caps: HashSet::new(),
            next_tag: 0,
            debug: false,
        }
    }

    /// Log all wire traffic at debug level.
    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
        self.reader.set_trace(if enabled {
            Some("client".to_owned())
        } else {
            None
        });
    }

    /// Read and interpret the greeting that starts every session.
    pub fn read_greeting(&mut self) -> Result<StatusResp, Error> {
        let greeting = match self.read_response()? {
            RespLine::Status(status) if status.is_untagged() => status,
            r => {
                return Err(Error::Parse(format!(
                    "Expected a greeting, got {:?}",
                    r
                )))
            },
        };

        match greeting.typ {
            crate::proto::StatusType::Preauth => {
                self.state = ConnState::AUTHENTICATED
            },
            crate::proto::StatusType::Bye => {
                self.state = ConnState::LOGOUT
            },
            _ => self.state = ConnState::NOT_AUTHENTICATED,
        }

        if greeting.code.as_deref() == Some("CAPABILITY") {
            self.caps = greeting
                .args
                .iter()
                .filter_map(Field::as_str)
                .map(str::to_owned)
                .collect();
        }

        Ok(greeting)
    }

    /// Read one response line (untagged, tagged, or continuation).
    pub fn read_response(&mut self) -> Result<RespLine, Error> {
        let line = self.reader.read_logical_line()?;
        parse_response_line(&line)
    }

    fn alloc_tag(&mut self) -> String {
        let tag = format!("w{:04}", self.next_tag);
        self.next_tag += 1;
        tag
    }

    /// Run one command: send it (pausing at literal boundaries for the
    /// server's continuation), then collect responses until the matching
    /// tagged status.
    pub fn execute(
        &mut self,
        name: &str,
        args: Vec<Field>,
    ) -> Result<(Vec<RespLine>, StatusResp), Error> {
        let tag = self.alloc_tag();

        let command = Command::new(tag.clone(), name, args);
        let mut w = Writer::with_literal_tracking(Vec::<u8>::new());
        command.write_to(&mut w)?;
        let breaks = w.literal_breaks().to_vec();
        let buffer = w.into_inner();

        if self.debug {
            debug!(
                "client >> {}",
                String::from_utf8_lossy(&buffer).trim_end()
            );
        }

        let mut untagged = Vec::new();

        // Each literal payload may only go out once the server has
        // acknowledged its introducer with a continuation request.
        let mut start = 0;
        for brk in breaks {
            self.write.write_all(&buffer[start..brk])?;
            self.write.flush()?;
            if let Some(status) = self.wait_continuation(&mut untagged)? {
                // The server rejected the command instead of continuing
                return Ok((untagged, status));
            }
            start = brk;
        }
        self.write.write_all(&buffer[start..])?;
        self.write.flush()?;

        loop {
            match self.read_response()? {
                RespLine::Continuation(_) => continue,
                RespLine::Status(status) if !status.is_untagged() => {
                    if status.tag == tag {
                        return Ok((untagged, status));
                    }
                    // A stale tagged response; nothing useful to do with it
                },
                other => untagged.push(other),
            }
        }
    }

    fn wait_continuation(
        &mut self,
        untagged: &mut Vec<RespLine>,
    ) -> Result<Option<StatusResp>, Error> {
        loop {
            match self.read_response()? {
                RespLine::Continuation(_) => return Ok(None),
                RespLine::Status(status) if !status.is_untagged() => {
                    return Ok(Some(status))
                },
                other => untagged.push(other),
            }
        }
    }

    fn simple(&mut self, name: &str, args: Vec<Field>) -> Result<(), Error> {
        let (_, status) = self.execute(name, args)?;
        status.err()
    }

    // ---- Any state ----

    pub fn capability(&mut self) -> Result<HashSet<String>, Error> {
        let (untagged, status) = self.execute("CAPABILITY", vec![])?;
        status.err()?;

        let mut caps = HashSet::new();
        for resp in untagged {
            let fields = match resp {
                RespLine::Data(fields) => fields,
                _ => continue,
            };
            if fields.first().and_then(Field::as_str).map_or(false, |s| {
                s.eq_ignore_ascii_case("CAPABILITY")
            }) {
                caps.extend(
                    fields[1..]
                        .iter()
                        .filter_map(Field::as_str)
                        .map(str::to_owned),
                );
            }
        }

        self.caps = caps.clone();
        Ok(caps)
    }

    pub fn noop(&mut self) -> Result<(), Error> {
        self.simple("NOOP", vec![])
    }

    pub fn logout(&mut self) -> Result<(), Error> {
        if ConnState::LOGOUT == self.state {
            return Err(Error::AlreadyLoggedOut);
        }

        let (_, status) = self.execute("LOGOUT", vec![])?;
        self.state = ConnState::LOGOUT;
        status.err()
    }

    // ---- Not Authenticated state ----

    pub fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        self.simple(
            "LOGIN",
            vec![Field::from(username), Field::from(password)],
        )?;
        self.state = ConnState::AUTHENTICATED;
        Ok(())
    }

    /// AUTHENTICATE with the PLAIN mechanism: wait for the empty
    /// challenge, then send the base64 credentials.
    pub fn authenticate_plain(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        let tag = self.alloc_tag();
        let mut w = Writer::new(&mut self.write);
        Command::new(tag.clone(), "AUTHENTICATE", vec![Field::from("PLAIN")])
            .write_to(&mut w)?;
        self.write.flush()?;

        loop {
            match self.read_response()? {
                RespLine::Continuation(_) => {
                    let response = base64::encode(format!(
                        "\0{}\0{}",
                        username, password
                    ));
                    self.write.write_all(response.as_bytes())?;
                    self.write.write_all(b"\r\n")?;
                    self.write.flush()?;
                },
                RespLine::Status(status)
                    if !status.is_untagged() && status.tag == tag =>
                {
                    status.err()?;
                    self.state = ConnState::AUTHENTICATED;
                    return Ok(());
                },
                _ => continue,
            }
        }
    }

    // ---- Authenticated state ----

    pub fn select(&mut self, mailbox: &str) -> Result<MailboxStatus, Error> {
        self.do_select("SELECT", mailbox, false)
    }

    pub fn examine(
        &mut self,
        mailbox: &str,
    ) -> Result<MailboxStatus, Error> {
        self.do_select("EXAMINE", mailbox, true)
    }

    fn do_select(
        &mut self,
        verb: &str,
        mailbox: &str,
        read_only: bool,
    ) -> Result<MailboxStatus, Error> {
        let (untagged, status) =
            self.execute(verb, vec![Field::from(mailbox)])?;
        status.err()?;

        let mut result = MailboxStatus {
            name: mailbox.to_owned(),
            read_only,
            ..MailboxStatus::default()
        };

        for resp in untagged {
            match resp {
                RespLine::Data(fields) => match fields.as_slice() {
                    [n, word] if is_word(word, "EXISTS") => {
                        result.messages = n.as_number()?;
                    },
                    [n, word] if is_word(word, "RECENT") => {
                        result.recent = n.as_number()?;
                    },
                    [word, Field::List(flags)]
                        if is_word(word, "FLAGS") =>
                    {
                        result.flags = flags
                            .iter()
                            .filter_map(Field::as_str)
                            .map(str::to_owned)
                            .collect();
                    },
                    _ => (),
                },
                RespLine::Status(s) => match s.code.as_deref() {
                    Some("UNSEEN") => {
                        result.unseen = code_number(&s)?;
                    },
                    Some("UIDNEXT") => {
                        result.uid_next = code_number(&s)?;
                    },
                    Some("UIDVALIDITY") => {
                        result.uid_validity = code_number(&s)?;
                    },
                    Some("PERMANENTFLAGS") => {
                        if let Some(Field::List(flags)) = s.args.first() {
                            result.permanent_flags = flags
                                .iter()
                                .filter_map(Field::as_str)
                                .map(str::to_owned)
                                .collect();
                        }
                    },
                    Some("READ-ONLY") => result.read_only = true,
                    Some("READ-WRITE") => result.read_only = false,
                    _ => (),
                },
                RespLine::Continuation(_) => (),
            }
        }

        self.state = ConnState::SELECTED;
        Ok(result)
    }

    pub fn create(&mut self, mailbox: &str) -> Result<(), Error> {
        self.simple("CREATE", vec![Field::from(mailbox)])
    }

    pub fn delete(&mut self, mailbox: &str) -> Result<(), Error> {
        self.simple("DELETE", vec![Field::from(mailbox)])
    }

    pub fn rename(
        &mut self,
        existing_name: &str,
        new_name: &str,
    ) -> Result<(), Error> {
        self.simple(
            "RENAME",
            vec![Field::from(existing_name), Field::from(new_name)],
        )
    }

    pub fn subscribe(&mut self, mailbox: &str) -> Result<(), Error> {
        self.simple("SUBSCRIBE", vec![Field::from(mailbox)])
    }

    pub fn unsubscribe(&mut self, mailbox: &str) -> Result<(), Error> {
        self.simple("UNSUBSCRIBE", vec![Field::from(mailbox)])
    }

    pub fn list(
        &mut self,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<MailboxInfo>, Error> {
        self.do_list("LIST", reference, pattern)
    }

    pub fn lsub(
        &mut self,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<MailboxInfo>, Error> {
        self.do_list("LSUB", reference, pattern)
    }

    fn do_list(
        &mut self,
        verb: &str,
        reference: &str,
        pattern: &str,
    ) -> Result<Vec<MailboxInfo>, Error> {
        let (untagged, status) = self.execute(
            verb,
            vec![Field::from(reference), Field::from(pattern)],
        )?;
        status.err()?;

        let mut mailboxes = Vec::new();
        for resp in untagged {
            if let RespLine::Data(fields) = resp {
                if fields.first().map_or(false, |f| is_word(f, verb)) {
                    mailboxes.push(MailboxInfo::parse(&fields[1..])?);
                }
            }
        }
        Ok(mailboxes)
    }

    pub fn status(
        &mut self,
        mailbox: &str,
        items: &[StatusItem],
    ) -> Result<MailboxStatus, Error> {
        let (untagged, status) = self.execute(
            "STATUS",
            vec![
                Field::from(mailbox),
                Field::List(
                    items
                        .iter()
                        .map(|item| Field::from(item.name()))
                        .collect(),
                ),
            ],
        )?;
        status.err()?;

        let mut result = MailboxStatus {
            name: mailbox.to_owned(),
            ..MailboxStatus::default()
        };
        for resp in untagged {
            if let RespLine::Data(fields) = resp {
                if let [word, _, Field::List(items)] = fields.as_slice() {
                    if is_word(word, "STATUS") {
                        result.parse_items(items)?;
                    }
                }
            }
        }
        Ok(result)
    }

    pub fn append(
        &mut self,
        mailbox: &str,
        flags: &[&str],
        date: Option<DateTime<FixedOffset>>,
        message: &[u8],
    ) -> Result<(), Error> {
        let mut args = vec![Field::from(mailbox)];
        if !flags.is_empty() {
            args.push(Field::List(
                flags.iter().map(|&f| Field::from(f)).collect(),
            ));
        }
        if let Some(ref date) = date {
            args.push(Field::String(format_date(date)));
        }
        args.push(Field::Literal(message.to_vec()));

        self.simple("APPEND", args)
    }

    // ---- Selected state ----

    pub fn check(&mut self) -> Result<(), Error> {
        self.simple("CHECK", vec![])
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.simple("CLOSE", vec![])?;
        self.state = ConnState::AUTHENTICATED;
        Ok(())
    }

    pub fn expunge(&mut self) -> Result<Vec<u32>, Error> {
        let (untagged, status) = self.execute("EXPUNGE", vec![])?;
        status.err()?;

        let mut seq_nums = Vec::new();
        for resp in untagged {
            if let RespLine::Data(fields) = resp {
                if let [n, word] = fields.as_slice() {
                    if is_word(word, "EXPUNGE") {
                        seq_nums.push(n.as_number()?);
                    }
                }
            }
        }
        Ok(seq_nums)
    }

    pub fn search(
        &mut self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<u32>, Error> {
        let (untagged, status) =
            self.execute("SEARCH", criteria.format())?;
        status.err()?;
        collect_search_ids(untagged)
    }

    pub fn uid_search(
        &mut self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<u32>, Error> {
        let mut args = vec![Field::from("SEARCH")];
        args.extend(criteria.format());
        let (untagged, status) = self.execute("UID", args)?;
        status.err()?;
        collect_search_ids(untagged)
    }

    pub fn fetch(
        &mut self,
        seq_set: &str,
        items: &[&str],
    ) -> Result<Vec<Message>, Error> {
        let (untagged, status) =
            self.execute("FETCH", fetch_args(seq_set, items))?;
        status.err()?;
        collect_messages(untagged)
    }

    pub fn uid_fetch(
        &mut self,
        seq_set: &str,
        items: &[&str],
    ) -> Result<Vec<Message>, Error> {
        let mut args = vec![Field::from("FETCH")];
        args.extend(fetch_args(seq_set, items));
        let (untagged, status) = self.execute("UID", args)?;
        status.err()?;
        collect_messages(untagged)
    }

    pub fn store(
        &mut self,
        seq_set: &str,
        item: &str,
        flags: &[&str],
    ) -> Result<Vec<Message>, Error> {
        let (untagged, status) =
            self.execute("STORE", store_args(seq_set, item, flags))?;
        status.err()?;
        collect_messages(untagged)
    }

    pub fn uid_store(
        &mut self,
        seq_set: &str,
        item: &str,
        flags: &[&str],
    ) -> Result<Vec<Message>, Error> {
        let mut args = vec![Field::from("STORE")];
        args.extend(store_args(seq_set, item, flags));
        let (untagged, status) = self.execute("UID", args)?;
        status.err()?;
        collect_messages(untagged)
    }

    pub fn copy(
        &mut self,
        seq_set: &str,
        mailbox: &str,
    ) -> Result<(), Error> {
        self.simple(
            "COPY",
            vec![Field::from(seq_set), Field::from(mailbox)],
        )
    }

    pub fn uid_copy(
        &mut self,
        seq_set: &str,
        mailbox: &str,
    ) -> Result<(), Error> {
        self.simple(
            "UID",
            vec![
                Field::from("COPY"),
                Field::from(seq_set),
                Field::from(mailbox),
            ],
        )
    }
}

fn is_word(field: &Field, word: &str) -> bool {
    field
        .as_str()
        .map_or(false, |s| s.eq_ignore_ascii_case(word))
}

fn code_number(status: &StatusResp) -> Result<u32, Error> {
    status
        .args
        .first()
        .ok_or_else(|| {
            Error::Parse("Response code is missing its number".to_owned())
        })?
        .as_number()
}

fn fetch_args(seq_set: &str, items: &[&str]) -> Vec<Field> {
    vec![
        Field::from(seq_set),
        Field::List(items.iter().map(|&item| Field::from(item)).collect()),
    ]
}

fn store_args(seq_set: &str, item: &str, flags: &[&str]) -> Vec<Field> {
    vec![
        Field::from(seq_set),
        Field::from(item),
        Field::List(flags.iter().map(|&flag| Field::from(flag)).collect()),
    ]
}

fn collect_search_ids(untagged: Vec<RespLine>) -> Result<Vec<u32>, Error> {
    let mut ids = Vec::new();
    for resp in untagged {
        if let RespLine::Data(fields) = resp {
            if fields.first().map_or(false, |f| is_word(f, "SEARCH")) {
                for field in &fields[1..] {
                    ids.push(field.as_number()?);
                }
            }
        }
    }
    Ok(ids)
}

fn collect_messages(untagged: Vec<RespLine>) -> Result<Vec<Message>, Error> {
    let mut messages = Vec::new();
    for resp in untagged {
        if let RespLine::Data(fields) = resp {
            if let [n, word, Field::List(items)] = fields.as_slice() {
                if is_word(word, "FETCH") {
                    let mut message = Message::parse(items)?;
                    message.seq_num = n.as_number()?;
                    messages.push(message);
                }
            }
        }
    }
    Ok(messages)
}
