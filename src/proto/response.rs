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

//! Server responses.
//!
//! Every response type knows how to write its complete line (or lines) to a
//! [`Writer`]; the connection serialises a response under its write lock
//! and flushes before releasing, which is what keeps a command's untagged
//! output, its tagged status, and unsolicited updates from interleaving at
//! the byte level.
//!
//! The streamed responses (FETCH, EXPUNGE) drain an `mpsc` channel while
//! they write, so a backend can produce messages concurrently with the
//! connection writing them out; the channel's bound is the backpressure.

use std::io::{self, Write};
use std::sync::mpsc::Receiver;

use crate::model::{
    MailboxInfo, MailboxStatus, Message, StatusItem,
};
use crate::support::error::Error;
use crate::wire::{parse_fields, Field, Writer};

/// Anything the server can send down a connection.
///
/// `write_to` takes `&mut self` because the streaming responses consume
/// their channel as they write.
pub trait Response: Send {
    fn write_to(&mut self, w: &mut Writer<&mut dyn Write>)
        -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusType {
    Ok,
    No,
    Bad,
    Preauth,
    Bye,
}

impl StatusType {
    pub fn name(self) -> &'static str {
        match self {
            StatusType::Ok => "OK",
            StatusType::No => "NO",
            StatusType::Bad => "BAD",
            StatusType::Preauth => "PREAUTH",
            StatusType::Bye => "BYE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OK" => Some(StatusType::Ok),
            "NO" => Some(StatusType::No),
            "BAD" => Some(StatusType::Bad),
            "PREAUTH" => Some(StatusType::Preauth),
            "BYE" => Some(StatusType::Bye),
            _ => None,
        }
    }
}

/// A status response: `tag type [code args] info`.
///
/// A tag of `*` makes it untagged.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusResp {
    pub tag: String,
    pub typ: StatusType,
    pub code: Option<String>,
    pub args: Vec<Field>,
    pub info: String,
}

impl StatusResp {
    pub fn ok(tag: impl Into<String>, info: impl Into<String>) -> Self {
        Self::tagged(tag, StatusType::Ok, info)
    }

    pub fn no(tag: impl Into<String>, info: impl Into<String>) -> Self {
        Self::tagged(tag, StatusType::No, info)
    }

    pub fn bad(tag: impl Into<String>, info: impl Into<String>) -> Self {
        Self::tagged(tag, StatusType::Bad, info)
    }

    pub fn tagged(
        tag: impl Into<String>,
        typ: StatusType,
        info: impl Into<String>,
    ) -> Self {
        StatusResp {
            tag: tag.into(),
            typ,
            code: None,
            args: Vec::new(),
            info: info.into(),
        }
    }

    pub fn untagged(typ: StatusType, info: impl Into<String>) -> Self {
        Self::tagged("*", typ, info)
    }

    pub fn with_code(
        mut self,
        code: impl Into<String>,
        args: Vec<Field>,
    ) -> Self {
        self.code = Some(code.into());
        self.args = args;
        self
    }

    pub fn is_untagged(&self) -> bool {
        "*" == self.tag
    }

    /// The failure carried by this status, if any.
    pub fn err(&self) -> Result<(), Error> {
        match self.typ {
            StatusType::No => Err(Error::No(self.info.clone())),
            StatusType::Bad => Err(Error::Bad(self.info.clone())),
            _ => Ok(()),
        }
    }
}

impl Response for StatusResp {
    fn write_to(
        &mut self,
        w: &mut Writer<&mut dyn Write>,
    ) -> io::Result<()> {
        w.verbatim(&self.tag)?;
        w.verbatim(" ")?;
        w.verbatim(self.typ.name())?;

        if let Some(ref code) = self.code {
            w.verbatim(" [")?;
            w.verbatim(code)?;
            for arg in &self.args {
                w.verbatim(" ")?;
                w.write_field(arg)?;
            }
            w.verbatim("]")?;
        }

        if !self.info.is_empty() {
            w.verbatim(" ")?;
            w.verbatim(&self.info)?;
        }

        w.end_line()
    }
}

/// `* CAPABILITY name name...`
pub struct CapabilityResp {
    pub caps: Vec<String>,
}

impl Response for CapabilityResp {
    fn write_to(
        &mut self,
        w: &mut Writer<&mut dyn Write>,
    ) -> io::Result<()> {
        w.verbatim("* CAPABILITY")?;
        for cap in &self.caps {
            w.verbatim(" ")?;
            w.verbatim(cap)?;
        }
        w.end_line()
    }
}

/// `* LIST (attrs) "delim" name`, one line per mailbox. Also used for LSUB.
pub struct ListResp {
    pub name: &'static str,
    pub mailboxes: Vec<MailboxInfo>,
}

impl Response for ListResp {
    fn write_to(
        &mut self,
        w: &mut Writer<&mut dyn Write>,
    ) -> io::Result<()> {
        for mailbox in &self.mailboxes {
            w.verbatim("* ")?;
            w.verbatim(self.name)?;
            w.verbatim(" ")?;
            w.write_fields(&mailbox.format())?;
            w.end_line()?;
        }
        Ok(())
    }
}

/// `* SEARCH id id id...`
pub struct SearchResp {
    pub ids: Vec<u32>,
}

impl Response for SearchResp {
    fn write_to(
        &mut self,
        w: &mut Writer<&mut dyn Write>,
    ) -> io::Result<()> {
        w.verbatim("* SEARCH")?;
        for id in &self.ids {
            w.verbatim(" ")?;
            w.number(*id)?;
        }
        w.end_line()
    }
}

/// `* STATUS name (item value ...)`
pub struct StatusItemsResp {
    pub status: MailboxStatus,
    pub items: Vec<StatusItem>,
}

impl Response for StatusItemsResp {
    fn write_to(
        &mut self,
        w: &mut Writer<&mut dyn Write>,
    ) -> io::Result<()> {
        w.verbatim("* STATUS ")?;
        w.write_field(&Field::String(self.status.name.clone()))?;
        w.verbatim(" ")?;
        w.write_list(&self.status.format_items(&self.items))?;
        w.end_line()
    }
}

/// The untagged bundle a SELECT or EXAMINE emits before its tagged OK. The
/// same bundle describes a mailbox whose attributes changed, which is why
/// the mailbox-update fan-out reuses it.
pub struct SelectResp {
    pub status: MailboxStatus,
}

impl Response for SelectResp {
    fn write_to(
        &mut self,
        w: &mut Writer<&mut dyn Write>,
    ) -> io::Result<()> {
        let status = &self.status;

        w.verbatim("* ")?;
        w.number(status.messages)?;
        w.verbatim(" EXISTS")?;
        w.end_line()?;

        w.verbatim("* ")?;
        w.number(status.recent)?;
        w.verbatim(" RECENT")?;
        w.end_line()?;

        if status.unseen > 0 {
            w.verbatim("* OK [UNSEEN ")?;
            w.number(status.unseen)?;
            w.verbatim("] First unseen message")?;
            w.end_line()?;
        }

        w.verbatim("* FLAGS ")?;
        w.write_list(&string_fields(&status.flags))?;
        w.end_line()?;

        w.verbatim("* OK [PERMANENTFLAGS ")?;
        w.write_list(&string_fields(&status.permanent_flags))?;
        w.verbatim("] Flags permitted")?;
        w.end_line()?;

        w.verbatim("* OK [UIDNEXT ")?;
        w.number(status.uid_next)?;
        w.verbatim("] Predicted next UID")?;
        w.end_line()?;

        w.verbatim("* OK [UIDVALIDITY ")?;
        w.number(status.uid_validity)?;
        w.verbatim("] UIDs valid")?;
        w.end_line()
    }
}

fn string_fields(strings: &[String]) -> Vec<Field> {
    strings.iter().map(|s| Field::String(s.clone())).collect()
}

/// `* seq FETCH (item value ...)`, one line per message received on the
/// channel.
///
/// The producer runs concurrently; dropping the receiver on a write error
/// is what unwinds it.
pub struct FetchResp {
    pub messages: Receiver<Message>,
}

impl Response for FetchResp {
    fn write_to(
        &mut self,
        w: &mut Writer<&mut dyn Write>,
    ) -> io::Result<()> {
        for message in self.messages.iter() {
            w.verbatim("* ")?;
            w.number(message.seq_num)?;
            w.verbatim(" FETCH ")?;
            w.write_list(&message.format())?;
            w.end_line()?;
        }
        Ok(())
    }
}

/// `* seq EXPUNGE`, one line per sequence number received on the channel.
pub struct ExpungeResp {
    pub seq_nums: Receiver<u32>,
}

impl Response for ExpungeResp {
    fn write_to(
        &mut self,
        w: &mut Writer<&mut dyn Write>,
    ) -> io::Result<()> {
        for seq_num in self.seq_nums.iter() {
            w.verbatim("* ")?;
            w.number(seq_num)?;
            w.verbatim(" EXPUNGE")?;
            w.end_line()?;
        }
        Ok(())
    }
}

/// One parsed line from a server, as seen by the client.
#[derive(Clone, Debug, PartialEq)]
pub enum RespLine {
    /// A `+` continuation request; the value is the trailing text.
    Continuation(String),
    /// A tagged or untagged status response.
    Status(StatusResp),
    /// An untagged data response: the fields after the `*`.
    Data(Vec<Field>),
}

/// Parse one complete logical line received from a server.
pub fn parse_response_line(line: &[u8]) -> Result<RespLine, Error> {
    if line == b"+" || line.starts_with(b"+ ") {
        let text = if line.len() > 2 { &line[2..] } else { b"" };
        return Ok(RespLine::Continuation(
            String::from_utf8_lossy(text).into_owned(),
        ));
    }

    let space = line.iter().position(|&b| b == b' ').ok_or_else(|| {
        Error::Parse(format!(
            "Malformed response line: {}",
            String::from_utf8_lossy(line)
        ))
    })?;
    let (tag, rest) = line.split_at(space);
    let tag = String::from_utf8_lossy(tag).into_owned();
    let rest = &rest[1..];

    let word_end = rest
        .iter()
        .position(|&b| b == b' ')
        .unwrap_or(rest.len());
    let word = String::from_utf8_lossy(&rest[..word_end]);

    if let Some(typ) = StatusType::parse(&word) {
        let text = if word_end < rest.len() {
            &rest[word_end + 1..]
        } else {
            b""
        };
        return Ok(RespLine::Status(parse_status(tag, typ, text)?));
    }

    if "*" != tag {
        return Err(Error::Parse(format!(
            "Unexpected tagged response: {}",
            String::from_utf8_lossy(line)
        )));
    }

    Ok(RespLine::Data(parse_fields(rest)?))
}

fn parse_status(
    tag: String,
    typ: StatusType,
    text: &[u8],
) -> Result<StatusResp, Error> {
    let mut status = StatusResp {
        tag,
        typ,
        code: None,
        args: Vec::new(),
        info: String::new(),
    };

    let mut text = text;
    if text.first() == Some(&b'[') {
        let close = text.iter().position(|&b| b == b']').ok_or_else(|| {
            Error::Parse("Unterminated response code".to_owned())
        })?;
        let mut code_fields = parse_fields(&text[1..close])?;
        if code_fields.is_empty() {
            return Err(Error::Parse("Empty response code".to_owned()));
        }
        status.code = Some(code_fields.remove(0).to_text()?);
        status.args = code_fields;

        text = &text[close + 1..];
        if text.first() == Some(&b' ') {
            text = &text[1..];
        }
    }

    status.info = String::from_utf8_lossy(text).into_owned();
    Ok(status)
}
