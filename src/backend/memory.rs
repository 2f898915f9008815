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

//! A trivial in-memory backend.
//!
//! Nothing persists and nothing scales; this exists to demo the engine and
//! to give the test suite a real mail store to talk to. Message envelopes
//! are recovered by a minimal header scan rather than a MIME parser, which
//! is as far as the engine's scope goes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::mpsc::{channel, sync_channel, Sender, SyncSender};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Utc};

use super::{
    Backend, ExpungeUpdate, Mailbox, MailboxUpdate, MessageUpdate,
    StatusUpdate, Updates, User,
};
use crate::model::message::{DELETED_FLAG, RECENT_FLAG, SEEN_FLAG};
use crate::model::{
    Address, BodySectionName, BodyStructure, Envelope, FlagsOp, MailboxInfo,
    MailboxStatus, Message, PartSpecifier, SearchCriteria, SeqSet,
    StatusItem,
};
use crate::support::error::Error;

const DELIMITER: &str = "/";

/// The sending half of a [`MemoryBackend`]'s update streams.
pub struct UpdateSenders {
    pub statuses: Sender<StatusUpdate>,
    pub mailboxes: Sender<MailboxUpdate>,
    pub messages: Sender<MessageUpdate>,
    pub expunges: Sender<ExpungeUpdate>,
}

pub struct MemoryBackend {
    users: Mutex<HashMap<String, MemUserEntry>>,
    pending_updates: Mutex<Option<Updates>>,
}

struct MemUserEntry {
    password: String,
    data: Arc<Mutex<UserData>>,
}

struct UserData {
    mailboxes: BTreeMap<String, MailboxData>,
    subscriptions: BTreeSet<String>,
}

struct MailboxData {
    uid_validity: u32,
    uid_next: u32,
    messages: Vec<MemMessage>,
}

#[derive(Clone)]
struct MemMessage {
    uid: u32,
    flags: Vec<String>,
    date: DateTime<FixedOffset>,
    body: Vec<u8>,
}

impl MemoryBackend {
    /// A backend with the canonical test account: user `username`,
    /// password `password`, an INBOX holding one message.
    pub fn new() -> Self {
        let backend = MemoryBackend {
            users: Mutex::new(HashMap::new()),
            pending_updates: Mutex::new(None),
        };
        backend.add_user("username", "password");
        backend
    }

    pub fn add_user(&self, username: &str, password: &str) {
        let mut inbox = MailboxData {
            uid_validity: 1,
            uid_next: 10,
            messages: Vec::new(),
        };
        inbox.append(
            &[SEEN_FLAG.to_owned()],
            None,
            b"From: contact@example.org\r\n\
              To: contact@example.org\r\n\
              Subject: A little message, just for you\r\n\
              Date: Wed, 11 May 2016 14:31:59 +0000\r\n\
              Message-ID: <0000000@localhost>\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              Hi there :)",
        );

        let mut mailboxes = BTreeMap::new();
        mailboxes.insert("INBOX".to_owned(), inbox);

        self.users.lock().unwrap().insert(
            username.to_owned(),
            MemUserEntry {
                password: password.to_owned(),
                data: Arc::new(Mutex::new(UserData {
                    mailboxes,
                    subscriptions: BTreeSet::new(),
                })),
            },
        );
    }

    /// Switch the backend into update-producing mode and hand back the
    /// sending halves. Must be called before the server starts serving.
    pub fn enable_updates(&self) -> UpdateSenders {
        let (status_tx, status_rx) = channel();
        let (mailbox_tx, mailbox_rx) = channel();
        let (message_tx, message_rx) = channel();
        let (expunge_tx, expunge_rx) = channel();

        *self.pending_updates.lock().unwrap() = Some(Updates {
            statuses: status_rx,
            mailboxes: mailbox_rx,
            messages: message_rx,
            expunges: expunge_rx,
        });

        UpdateSenders {
            statuses: status_tx,
            mailboxes: mailbox_tx,
            messages: message_tx,
            expunges: expunge_tx,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn User>, Error> {
        let users = self.users.lock().unwrap();
        let entry = users
            .get(username)
            .filter(|e| e.password == password)
            .ok_or(Error::AuthenticationFailed)?;

        Ok(Box::new(MemUser {
            username: username.to_owned(),
            data: Arc::clone(&entry.data),
        }))
    }

    fn updates(&self) -> Option<Updates> {
        self.pending_updates.lock().unwrap().take()
    }
}

struct MemUser {
    username: String,
    data: Arc<Mutex<UserData>>,
}

impl User for MemUser {
    fn username(&self) -> &str {
        &self.username
    }

    fn list_mailboxes(
        &self,
        subscribed_only: bool,
    ) -> Result<Vec<MailboxInfo>, Error> {
        let data = self.data.lock().unwrap();
        Ok(data
            .mailboxes
            .keys()
            .filter(|name| {
                !subscribed_only || data.subscriptions.contains(*name)
            })
            .map(|name| MailboxInfo {
                attributes: Vec::new(),
                delimiter: DELIMITER.to_owned(),
                name: name.clone(),
            })
            .collect())
    }

    fn get_mailbox(&self, name: &str) -> Result<Box<dyn Mailbox>, Error> {
        let data = self.data.lock().unwrap();
        if !data.mailboxes.contains_key(name) {
            return Err(Error::Backend("No such mailbox".to_owned()));
        }

        Ok(Box::new(MemMailbox {
            name: name.to_owned(),
            data: Arc::clone(&self.data),
        }))
    }

    fn create_mailbox(&self, name: &str) -> Result<(), Error> {
        let mut data = self.data.lock().unwrap();
        if data.mailboxes.contains_key(name) {
            return Err(Error::Backend("Mailbox already exists".to_owned()));
        }

        data.mailboxes.insert(
            name.to_owned(),
            MailboxData {
                uid_validity: 1,
                uid_next: 1,
                messages: Vec::new(),
            },
        );
        Ok(())
    }

    fn delete_mailbox(&self, name: &str) -> Result<(), Error> {
        if "INBOX" == name {
            return Err(Error::Backend("Cannot delete INBOX".to_owned()));
        }

        let mut data = self.data.lock().unwrap();
        if data.mailboxes.remove(name).is_none() {
            return Err(Error::Backend("No such mailbox".to_owned()));
        }
        data.subscriptions.remove(name);
        Ok(())
    }

    fn rename_mailbox(
        &self,
        existing_name: &str,
        new_name: &str,
    ) -> Result<(), Error> {
        let mut data = self.data.lock().unwrap();
        if data.mailboxes.contains_key(new_name) {
            return Err(Error::Backend("Mailbox already exists".to_owned()));
        }
        if !data.mailboxes.contains_key(existing_name) {
            return Err(Error::Backend("No such mailbox".to_owned()));
        }

        if "INBOX" == existing_name {
            // Renaming INBOX moves its messages and leaves it empty
            let inbox = data
                .mailboxes
                .get_mut("INBOX")
                .expect("INBOX existence checked above");
            let moved = MailboxData {
                uid_validity: inbox.uid_validity,
                uid_next: inbox.uid_next,
                messages: std::mem::take(&mut inbox.messages),
            };
            data.mailboxes.insert(new_name.to_owned(), moved);
        } else {
            let mailbox = data
                .mailboxes
                .remove(existing_name)
                .expect("existence checked above");
            data.mailboxes.insert(new_name.to_owned(), mailbox);
        }
        Ok(())
    }
}

struct MemMailbox {
    name: String,
    data: Arc<Mutex<UserData>>,
}

impl MemMailbox {
    fn with_data<T>(
        &self,
        f: impl FnOnce(&mut MailboxData) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut data = self.data.lock().unwrap();
        let mailbox = data
            .mailboxes
            .get_mut(&self.name)
            .ok_or_else(|| Error::Backend("No such mailbox".to_owned()))?;
        f(mailbox)
    }
}

impl Mailbox for MemMailbox {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> Result<MailboxInfo, Error> {
        Ok(MailboxInfo {
            attributes: Vec::new(),
            delimiter: DELIMITER.to_owned(),
            name: self.name.clone(),
        })
    }

    fn status(&self, _items: &[StatusItem]) -> Result<MailboxStatus, Error> {
        self.with_data(|mailbox| {
            let mut flags: BTreeSet<String> = [
                "\\Answered",
                "\\Flagged",
                "\\Deleted",
                "\\Seen",
                "\\Draft",
            ]
            .iter()
            .map(|&f| f.to_owned())
            .collect();
            for message in &mailbox.messages {
                flags.extend(message.flags.iter().cloned());
            }

            let mut permanent_flags: Vec<String> =
                flags.iter().cloned().collect();
            permanent_flags.push("\\*".to_owned());

            Ok(MailboxStatus {
                name: self.name.clone(),
                flags: flags.into_iter().collect(),
                permanent_flags,
                messages: mailbox.messages.len() as u32,
                recent: mailbox
                    .messages
                    .iter()
                    .filter(|m| has_flag(&m.flags, RECENT_FLAG))
                    .count() as u32,
                unseen: mailbox
                    .messages
                    .iter()
                    .position(|m| !has_flag(&m.flags, SEEN_FLAG))
                    .map(|ix| ix as u32 + 1)
                    .unwrap_or(0),
                uid_next: mailbox.uid_next,
                uid_validity: mailbox.uid_validity,
                read_only: false,
            })
        })
    }

    fn set_subscribed(&mut self, subscribed: bool) -> Result<(), Error> {
        let mut data = self.data.lock().unwrap();
        if subscribed {
            data.subscriptions.insert(self.name.clone());
        } else {
            data.subscriptions.remove(&self.name);
        }
        Ok(())
    }

    fn check(&mut self) -> Result<(), Error> {
        // Nothing to checkpoint in memory
        Ok(())
    }

    fn list_messages(
        &self,
        uid: bool,
        seq_set: &SeqSet,
        items: &[String],
        sender: SyncSender<Message>,
    ) -> Result<(), Error> {
        let selected = self.with_data(|mailbox| {
            let mut selected = Vec::new();
            for (ix, message) in mailbox.messages.iter().enumerate() {
                let seq_num = ix as u32 + 1;
                let matches = if uid {
                    seq_set.contains(message.uid, mailbox.max_uid())
                } else {
                    seq_set.contains(seq_num, mailbox.messages.len() as u32)
                };
                if matches {
                    selected.push(build_message(message, seq_num, items)?);
                }
            }
            Ok(selected)
        })?;

        for message in selected {
            if sender.send(message).is_err() {
                // Receiver gone; the write side already failed
                break;
            }
        }
        Ok(())
    }

    fn search_messages(
        &self,
        uid: bool,
        criteria: &SearchCriteria,
    ) -> Result<Vec<u32>, Error> {
        self.with_data(|mailbox| {
            let total = mailbox.messages.len() as u32;
            let max_uid = mailbox.max_uid();
            Ok(mailbox
                .messages
                .iter()
                .enumerate()
                .filter(|(ix, message)| {
                    matches(
                        criteria,
                        message,
                        *ix as u32 + 1,
                        total,
                        max_uid,
                    )
                })
                .map(|(ix, message)| {
                    if uid {
                        message.uid
                    } else {
                        ix as u32 + 1
                    }
                })
                .collect())
        })
    }

    fn create_message(
        &mut self,
        flags: &[String],
        date: Option<DateTime<FixedOffset>>,
        body: &[u8],
    ) -> Result<(), Error> {
        self.with_data(|mailbox| {
            mailbox.append(flags, date, body);
            Ok(())
        })
    }

    fn update_messages_flags(
        &mut self,
        uid: bool,
        seq_set: &SeqSet,
        op: FlagsOp,
        flags: &[String],
    ) -> Result<(), Error> {
        self.with_data(|mailbox| {
            let total = mailbox.messages.len() as u32;
            let max_uid = mailbox.max_uid();
            for (ix, message) in mailbox.messages.iter_mut().enumerate() {
                let matches = if uid {
                    seq_set.contains(message.uid, max_uid)
                } else {
                    seq_set.contains(ix as u32 + 1, total)
                };
                if !matches {
                    continue;
                }

                match op {
                    FlagsOp::Set => message.flags = flags.to_vec(),
                    FlagsOp::Add => {
                        for flag in flags {
                            if !has_flag(&message.flags, flag) {
                                message.flags.push(flag.clone());
                            }
                        }
                    },
                    FlagsOp::Remove => message.flags.retain(|f| {
                        !flags.iter().any(|r| r.eq_ignore_ascii_case(f))
                    }),
                }
            }
            Ok(())
        })
    }

    fn copy_messages(
        &self,
        uid: bool,
        seq_set: &SeqSet,
        dest_name: &str,
    ) -> Result<(), Error> {
        let mut data = self.data.lock().unwrap();
        let data = &mut *data;

        let source = data
            .mailboxes
            .get(&self.name)
            .ok_or_else(|| Error::Backend("No such mailbox".to_owned()))?;

        let total = source.messages.len() as u32;
        let max_uid = source.max_uid();
        let copied: Vec<MemMessage> = source
            .messages
            .iter()
            .enumerate()
            .filter(|(ix, message)| {
                if uid {
                    seq_set.contains(message.uid, max_uid)
                } else {
                    seq_set.contains(*ix as u32 + 1, total)
                }
            })
            .map(|(_, message)| message.clone())
            .collect();

        let dest = data.mailboxes.get_mut(dest_name).ok_or_else(|| {
            Error::Backend("No such destination mailbox".to_owned())
        })?;
        for message in copied {
            dest.append(&message.flags, Some(message.date), &message.body);
        }
        Ok(())
    }

    fn expunge(&mut self) -> Result<(), Error> {
        self.with_data(|mailbox| {
            mailbox
                .messages
                .retain(|m| !has_flag(&m.flags, DELETED_FLAG));
            Ok(())
        })
    }
}

impl MailboxData {
    fn append(
        &mut self,
        flags: &[String],
        date: Option<DateTime<FixedOffset>>,
        body: &[u8],
    ) {
        let uid = self.uid_next;
        self.uid_next += 1;
        self.messages.push(MemMessage {
            uid,
            flags: flags.to_vec(),
            date: date.unwrap_or_else(|| {
                Utc::now().with_timezone(&FixedOffset::east_opt(0).unwrap())
            }),
            body: body.to_vec(),
        });
    }

    fn max_uid(&self) -> u32 {
        self.messages.last().map(|m| m.uid).unwrap_or(0)
    }
}

fn has_flag(flags: &[String], name: &str) -> bool {
    flags.iter().any(|f| f.eq_ignore_ascii_case(name))
}

/// Build the requested FETCH items for one message.
fn build_message(
    message: &MemMessage,
    seq_num: u32,
    items: &[String],
) -> Result<Message, Error> {
    let mut result = Message {
        seq_num,
        ..Message::default()
    };

    for item in items {
        match item.to_ascii_uppercase().as_str() {
            "FLAGS" => {
                result.flags = message.flags.clone();
                result.items.push("FLAGS".to_owned());
            },
            "UID" => {
                result.uid = message.uid;
                result.items.push("UID".to_owned());
            },
            "INTERNALDATE" => {
                result.internal_date = Some(message.date);
                result.items.push("INTERNALDATE".to_owned());
            },
            "RFC822.SIZE" => {
                result.size = message.body.len() as u32;
                result.items.push("RFC822.SIZE".to_owned());
            },
            "ENVELOPE" => {
                result.envelope = Some(scan_envelope(&message.body));
                result.items.push("ENVELOPE".to_owned());
            },
            "BODY" => {
                result.body_structure =
                    Some(scan_body_structure(&message.body, false));
                result.items.push("BODY".to_owned());
            },
            "BODYSTRUCTURE" => {
                result.body_structure =
                    Some(scan_body_structure(&message.body, true));
                result.items.push("BODYSTRUCTURE".to_owned());
            },
            _ => {
                let mut section: BodySectionName = item.parse()?;
                // Responses always use the non-peek form
                section.peek = false;
                let data = extract_section(&message.body, &section);
                result.items.push(section.to_string());
                result.body.push((section, data));
            },
        }
    }

    Ok(result)
}

fn split_message(body: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find(body, b"\r\n\r\n") {
        (&body[..pos + 4], &body[pos + 4..])
    } else if let Some(pos) = find(body, b"\n\n") {
        (&body[..pos + 2], &body[pos + 2..])
    } else {
        (body, &[])
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn extract_section(body: &[u8], section: &BodySectionName) -> Vec<u8> {
    // A non-multipart message has exactly one part, addressable as 1
    if !section.part.path.is_empty() && section.part.path != [1] {
        return Vec::new();
    }

    let (header, text) = split_message(body);
    let data: Vec<u8> = match section.part.specifier {
        PartSpecifier::Entire => body.to_vec(),
        PartSpecifier::Text => text.to_vec(),
        PartSpecifier::Header | PartSpecifier::Mime
            if section.part.fields.is_empty() =>
        {
            header.to_vec()
        },
        PartSpecifier::Header | PartSpecifier::Mime => {
            let mut filtered = Vec::new();
            for (name, value) in scan_headers(header) {
                let listed = section
                    .part
                    .fields
                    .iter()
                    .any(|f| f.eq_ignore_ascii_case(&name));
                if listed != section.part.not_fields {
                    filtered
                        .extend_from_slice(format!("{}: ", name).as_bytes());
                    filtered.extend_from_slice(value.as_bytes());
                    filtered.extend_from_slice(b"\r\n");
                }
            }
            filtered.extend_from_slice(b"\r\n");
            filtered
        },
    };

    section.extract_partial(&data).to_vec()
}

/// Unfold and collect the header block into (name, value) pairs.
fn scan_headers(header: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(header);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.is_empty() {
            break;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation of the previous header
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
    }

    headers
}

fn header_value<'a>(
    headers: &'a [(String, String)],
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn scan_envelope(body: &[u8]) -> Envelope {
    let (header, _) = split_message(body);
    let headers = scan_headers(header);

    Envelope {
        date: header_value(&headers, "Date")
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok()),
        subject: header_value(&headers, "Subject").map(str::to_owned),
        from: scan_addresses(&headers, "From"),
        sender: scan_addresses(&headers, "Sender"),
        reply_to: scan_addresses(&headers, "Reply-To"),
        to: scan_addresses(&headers, "To"),
        cc: scan_addresses(&headers, "Cc"),
        bcc: scan_addresses(&headers, "Bcc"),
        in_reply_to: header_value(&headers, "In-Reply-To")
            .map(str::to_owned),
        message_id: header_value(&headers, "Message-ID").map(str::to_owned),
    }
}

/// Parse `Name <box@host>` / `box@host` address lists. Good enough for the
/// memory store; a real backend would use a real parser.
fn scan_addresses(
    headers: &[(String, String)],
    name: &str,
) -> Vec<Address> {
    let value = match header_value(headers, name) {
        Some(v) => v,
        None => return Vec::new(),
    };

    value
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            let (personal, spec) = match (part.find('<'), part.find('>')) {
                (Some(open), Some(close)) if close > open => (
                    Some(part[..open].trim().trim_matches('"').to_owned())
                        .filter(|p| !p.is_empty()),
                    &part[open + 1..close],
                ),
                _ => (None, part),
            };

            let (mailbox, host) = spec.split_once('@')?;
            Some(Address {
                personal_name: personal,
                at_domain_list: None,
                mailbox_name: Some(mailbox.to_owned()),
                host_name: Some(host.to_owned()),
            })
        })
        .collect()
}

fn scan_body_structure(body: &[u8], extended: bool) -> BodyStructure {
    let (header, text) = split_message(body);
    let headers = scan_headers(header);

    let (mime_type, mime_sub_type) = header_value(&headers, "Content-Type")
        .and_then(|v| v.split(';').next())
        .and_then(|v| v.trim().split_once('/'))
        .map(|(t, s)| (t.to_owned(), s.to_owned()))
        .unwrap_or_else(|| ("text".to_owned(), "plain".to_owned()));

    BodyStructure {
        mime_type,
        mime_sub_type,
        encoding: "7bit".to_owned(),
        size: text.len() as u32,
        lines: text.iter().filter(|&&b| b == b'\n').count() as u32 + 1,
        extended,
        ..BodyStructure::default()
    }
}

fn matches(
    criteria: &SearchCriteria,
    message: &MemMessage,
    seq_num: u32,
    total: u32,
    max_uid: u32,
) -> bool {
    if let Some(ref set) = criteria.seq_set {
        if !set.contains(seq_num, total) {
            return false;
        }
    }
    if let Some(ref set) = criteria.uid {
        if !set.contains(message.uid, max_uid) {
            return false;
        }
    }

    let flag_checks = [
        (criteria.answered, "\\Answered", true),
        (criteria.deleted, "\\Deleted", true),
        (criteria.draft, "\\Draft", true),
        (criteria.flagged, "\\Flagged", true),
        (criteria.recent, "\\Recent", true),
        (criteria.seen, "\\Seen", true),
        (criteria.unanswered, "\\Answered", false),
        (criteria.undeleted, "\\Deleted", false),
        (criteria.undraft, "\\Draft", false),
        (criteria.unflagged, "\\Flagged", false),
        (criteria.unseen, "\\Seen", false),
        (criteria.old, "\\Recent", false),
    ];
    for (requested, flag, must_have) in flag_checks {
        if requested && has_flag(&message.flags, flag) != must_have {
            return false;
        }
    }
    if criteria.new
        && !(has_flag(&message.flags, RECENT_FLAG)
            && !has_flag(&message.flags, SEEN_FLAG))
    {
        return false;
    }

    for keyword in &criteria.keyword {
        if !has_flag(&message.flags, keyword) {
            return false;
        }
    }
    for keyword in &criteria.unkeyword {
        if has_flag(&message.flags, keyword) {
            return false;
        }
    }

    let internal = message.date.date_naive();
    if criteria.before.map_or(false, |d| internal >= d) {
        return false;
    }
    if criteria.on.map_or(false, |d| internal != d) {
        return false;
    }
    if criteria.since.map_or(false, |d| internal < d) {
        return false;
    }

    let (header, text) = split_message(&message.body);
    let headers = scan_headers(header);

    let sent = header_value(&headers, "Date")
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|d| d.date_naive());
    if let Some(d) = criteria.sent_before {
        if !sent.map_or(false, |s| s < d) {
            return false;
        }
    }
    if let Some(d) = criteria.sent_on {
        if !sent.map_or(false, |s| s == d) {
            return false;
        }
    }
    if let Some(d) = criteria.sent_since {
        if !sent.map_or(false, |s| s >= d) {
            return false;
        }
    }

    if criteria
        .larger
        .map_or(false, |n| message.body.len() as u32 <= n)
    {
        return false;
    }
    if criteria
        .smaller
        .map_or(false, |n| message.body.len() as u32 >= n)
    {
        return false;
    }

    let header_contains = |name: &str, needle: &str| {
        header_value(&headers, name).map_or(false, |v| {
            v.to_ascii_lowercase()
                .contains(&needle.to_ascii_lowercase())
        })
    };
    for (values, name) in [
        (&criteria.from, "From"),
        (&criteria.to, "To"),
        (&criteria.cc, "Cc"),
        (&criteria.bcc, "Bcc"),
        (&criteria.subject, "Subject"),
    ] {
        for needle in values.iter() {
            if !header_contains(name, needle) {
                return false;
            }
        }
    }
    for (name, needle) in &criteria.header {
        if !header_contains(name, needle) {
            return false;
        }
    }

    let text_lossy = String::from_utf8_lossy(text).to_ascii_lowercase();
    for needle in &criteria.body {
        if !text_lossy.contains(&needle.to_ascii_lowercase()) {
            return false;
        }
    }
    if !criteria.text.is_empty() {
        let whole =
            String::from_utf8_lossy(&message.body).to_ascii_lowercase();
        for needle in &criteria.text {
            if !whole.contains(&needle.to_ascii_lowercase()) {
                return false;
            }
        }
    }

    for sub in &criteria.not {
        if matches(sub, message, seq_num, total, max_uid) {
            return false;
        }
    }
    for (lhs, rhs) in &criteria.or {
        if !matches(lhs, message, seq_num, total, max_uid)
            && !matches(rhs, message, seq_num, total, max_uid)
        {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::message::FLAGGED_FLAG;

    fn inbox() -> (MemoryBackend, Box<dyn Mailbox>) {
        let backend = MemoryBackend::new();
        let user = backend.login("username", "password").unwrap();
        let mailbox = user.get_mailbox("INBOX").unwrap();
        (backend, mailbox)
    }

    #[test]
    fn login_checks_credentials() {
        let backend = MemoryBackend::new();
        assert!(backend.login("username", "password").is_ok());
        assert_matches!(
            Err(Error::AuthenticationFailed),
            backend.login("username", "hunter2")
        );
        assert_matches!(
            Err(Error::AuthenticationFailed),
            backend.login("nobody", "password")
        );
    }

    #[test]
    fn status_counters() {
        let (_backend, mailbox) = inbox();
        let status = mailbox.status(StatusItem::ALL).unwrap();
        assert_eq!(1, status.messages);
        assert_eq!(11, status.uid_next);
        assert_eq!(0, status.unseen);
        assert!(status.flags.contains(&SEEN_FLAG.to_owned()));
        assert!(status
            .permanent_flags
            .contains(&"\\*".to_owned()));
    }

    #[test]
    fn fetch_items() {
        let (_backend, mailbox) = inbox();
        let (tx, rx) = sync_channel(16);
        mailbox
            .list_messages(
                false,
                &SeqSet::all(),
                &[
                    "UID".to_owned(),
                    "FLAGS".to_owned(),
                    "RFC822.SIZE".to_owned(),
                    "ENVELOPE".to_owned(),
                    "BODY[TEXT]".to_owned(),
                ],
                tx,
            )
            .unwrap();

        let messages: Vec<Message> = rx.iter().collect();
        assert_eq!(1, messages.len());
        let message = &messages[0];
        assert_eq!(10, message.uid);
        assert_eq!(1, message.seq_num);
        assert!(has_flag(&message.flags, SEEN_FLAG));
        assert!(message.size > 0);
        assert_eq!(
            Some("A little message, just for you".to_owned()),
            message.envelope.as_ref().unwrap().subject
        );
        let from = &message.envelope.as_ref().unwrap().from[0];
        assert_eq!(Some("contact".to_owned()), from.mailbox_name);
        assert_eq!(Some("example.org".to_owned()), from.host_name);
        assert_eq!(
            b"Hi there :)".as_slice(),
            message
                .section(&"BODY[TEXT]".parse().unwrap())
                .unwrap()
        );
    }

    #[test]
    fn header_fields_sections() {
        let (_backend, mailbox) = inbox();
        let (tx, rx) = sync_channel(16);
        mailbox
            .list_messages(
                false,
                &SeqSet::all(),
                &["BODY.PEEK[HEADER.FIELDS (Subject)]".to_owned()],
                tx,
            )
            .unwrap();

        let message = rx.iter().next().unwrap();
        let section = message
            .section(
                &"BODY[HEADER.FIELDS (Subject)]".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(
            "Subject: A little message, just for you\r\n\r\n",
            String::from_utf8_lossy(section)
        );
    }

    #[test]
    fn flags_and_search() {
        let (_backend, mut mailbox) = inbox();
        mailbox
            .create_message(&[FLAGGED_FLAG.to_owned()], None, b"Subject: x\r\n\r\nbody two")
            .unwrap();

        // Search by flag
        let criteria = SearchCriteria {
            flagged: true,
            ..SearchCriteria::default()
        };
        assert_eq!(
            vec![2],
            mailbox.search_messages(false, &criteria).unwrap()
        );
        assert_eq!(
            vec![11],
            mailbox.search_messages(true, &criteria).unwrap()
        );

        // Add \Deleted to both, then expunge
        mailbox
            .update_messages_flags(
                false,
                &SeqSet::all(),
                FlagsOp::Add,
                &[DELETED_FLAG.to_owned()],
            )
            .unwrap();
        let criteria = SearchCriteria {
            deleted: true,
            ..SearchCriteria::default()
        };
        assert_eq!(
            vec![1, 2],
            mailbox.search_messages(false, &criteria).unwrap()
        );

        mailbox.expunge().unwrap();
        assert_eq!(
            0,
            mailbox.status(StatusItem::ALL).unwrap().messages
        );
    }

    #[test]
    fn flag_set_and_remove() {
        let (_backend, mut mailbox) = inbox();
        mailbox
            .update_messages_flags(
                false,
                &SeqSet::all(),
                FlagsOp::Set,
                &[FLAGGED_FLAG.to_owned()],
            )
            .unwrap();
        let status = mailbox.status(StatusItem::ALL).unwrap();
        assert_eq!(1, status.unseen);

        mailbox
            .update_messages_flags(
                false,
                &SeqSet::all(),
                FlagsOp::Remove,
                &[FLAGGED_FLAG.to_owned()],
            )
            .unwrap();
        let criteria = SearchCriteria {
            flagged: true,
            ..SearchCriteria::default()
        };
        assert!(mailbox.search_messages(false, &criteria).unwrap().is_empty());
    }

    #[test]
    fn copy_between_mailboxes() {
        let backend = MemoryBackend::new();
        let user = backend.login("username", "password").unwrap();
        user.create_mailbox("Archive").unwrap();

        let inbox = user.get_mailbox("INBOX").unwrap();
        inbox
            .copy_messages(false, &SeqSet::all(), "Archive")
            .unwrap();

        let archive = user.get_mailbox("Archive").unwrap();
        assert_eq!(1, archive.status(StatusItem::ALL).unwrap().messages);
    }

    #[test]
    fn mailbox_management() {
        let backend = MemoryBackend::new();
        let user = backend.login("username", "password").unwrap();

        user.create_mailbox("Drafts").unwrap();
        assert!(user.create_mailbox("Drafts").is_err());
        assert_eq!(2, user.list_mailboxes(false).unwrap().len());

        user.get_mailbox("Drafts")
            .unwrap()
            .set_subscribed(true)
            .unwrap();
        let subscribed = user.list_mailboxes(true).unwrap();
        assert_eq!(1, subscribed.len());
        assert_eq!("Drafts", subscribed[0].name);

        user.rename_mailbox("Drafts", "Sketches").unwrap();
        assert!(user.get_mailbox("Drafts").is_err());
        assert!(user.get_mailbox("Sketches").is_ok());

        user.delete_mailbox("Sketches").unwrap();
        assert!(user.delete_mailbox("INBOX").is_err());
    }

    #[test]
    fn search_by_text_and_size() {
        let (_backend, mailbox) = inbox();

        let criteria = SearchCriteria {
            text: vec!["hi there".to_owned()],
            ..SearchCriteria::default()
        };
        assert_eq!(
            vec![1],
            mailbox.search_messages(false, &criteria).unwrap()
        );

        let criteria = SearchCriteria {
            larger: Some(1_000_000),
            ..SearchCriteria::default()
        };
        assert!(mailbox
            .search_messages(false, &criteria)
            .unwrap()
            .is_empty());
    }
}
