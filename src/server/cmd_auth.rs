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

//! Handlers requiring the Authenticated (or Selected) state.

use chrono::{DateTime, FixedOffset};

use super::conn::Conn;
use super::Handler;
use crate::backend::User;
use crate::model::date::parse_date;
use crate::model::mailbox::NOSELECT_ATTR;
use crate::model::{MailboxInfo, StatusItem};
use crate::proto::{ListResp, SelectResp, StatusItemsResp};
use crate::support::error::Error;
use crate::wire::{parse_string_list, Field};

fn require_user(conn: &Conn) -> Result<&dyn User, Error> {
    conn.user.as_deref().ok_or(Error::NotAuthenticated)
}

fn one_mailbox_arg(name: &str, args: &[Field]) -> Result<String, Error> {
    match args {
        [mailbox] => mailbox.to_text(),
        _ => Err(Error::Parse(format!(
            "{} expects a mailbox name",
            name
        ))),
    }
}

pub struct Select {
    pub read_only: bool,
    mailbox: String,
}

impl Select {
    pub fn new(read_only: bool) -> Self {
        Select {
            read_only,
            mailbox: String::new(),
        }
    }
}

impl Handler for Select {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        self.mailbox = one_mailbox_arg(
            if self.read_only { "EXAMINE" } else { "SELECT" },
            &args,
        )?;
        Ok(())
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        // SELECT and EXAMINE unselect any selected mailbox regardless of
        // whether they succeed.
        conn.unselect();

        let (mailbox, status) = {
            let user = require_user(conn)?;
            let mailbox = user.get_mailbox(&self.mailbox)?;
            let mut status = mailbox.status(StatusItem::ALL)?;
            status.read_only = self.read_only;
            (mailbox, status)
        };

        conn.write_res(&mut SelectResp { status })?;
        conn.select(mailbox, self.read_only);
        Ok(())
    }
}

#[derive(Default)]
pub struct Create {
    mailbox: String,
}

impl Handler for Create {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        self.mailbox = one_mailbox_arg("CREATE", &args)?;
        Ok(())
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        require_user(conn)?.create_mailbox(&self.mailbox)
    }
}

#[derive(Default)]
pub struct Delete {
    mailbox: String,
}

impl Handler for Delete {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        self.mailbox = one_mailbox_arg("DELETE", &args)?;
        Ok(())
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        require_user(conn)?.delete_mailbox(&self.mailbox)
    }
}

#[derive(Default)]
pub struct Rename {
    existing_name: String,
    new_name: String,
}

impl Handler for Rename {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        match args.as_slice() {
            [existing, new] => {
                self.existing_name = existing.to_text()?;
                self.new_name = new.to_text()?;
                Ok(())
            },
            _ => Err(Error::Parse(
                "RENAME expects two mailbox names".to_owned(),
            )),
        }
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        require_user(conn)?
            .rename_mailbox(&self.existing_name, &self.new_name)
    }
}

pub struct Subscribe {
    pub subscribed: bool,
    mailbox: String,
}

impl Subscribe {
    pub fn new(subscribed: bool) -> Self {
        Subscribe {
            subscribed,
            mailbox: String::new(),
        }
    }
}

impl Handler for Subscribe {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        self.mailbox = one_mailbox_arg(
            if self.subscribed {
                "SUBSCRIBE"
            } else {
                "UNSUBSCRIBE"
            },
            &args,
        )?;
        Ok(())
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        let mut mailbox =
            require_user(conn)?.get_mailbox(&self.mailbox)?;
        mailbox.set_subscribed(self.subscribed)
    }
}

pub struct List {
    pub subscribed: bool,
    reference: String,
    pattern: String,
}

impl List {
    pub fn new(subscribed: bool) -> Self {
        List {
            subscribed,
            reference: String::new(),
            pattern: String::new(),
        }
    }
}

impl Handler for List {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        match args.as_slice() {
            [reference, pattern] => {
                self.reference = reference.to_text()?;
                self.pattern = pattern.to_text()?;
                Ok(())
            },
            _ => Err(Error::Parse(
                "LIST expects a reference and a pattern".to_owned(),
            )),
        }
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        let mailboxes = if self.pattern.is_empty() {
            // An empty pattern asks for the hierarchy delimiter
            vec![MailboxInfo {
                attributes: vec![NOSELECT_ATTR.to_owned()],
                delimiter: "/".to_owned(),
                name: String::new(),
            }]
        } else {
            let pattern = format!("{}{}", self.reference, self.pattern);
            require_user(conn)?
                .list_mailboxes(self.subscribed)?
                .into_iter()
                .filter(|info| matches_pattern(&pattern, &info.name))
                .collect()
        };

        conn.write_res(&mut ListResp {
            name: if self.subscribed { "LSUB" } else { "LIST" },
            mailboxes,
        })
    }
}

/// Mailbox name pattern matching: `*` matches anything, `%` matches
/// anything except the hierarchy delimiter.
fn matches_pattern(pattern: &str, name: &str) -> bool {
    fn matches_at(pattern: &[u8], name: &[u8]) -> bool {
        match pattern.first() {
            None => name.is_empty(),
            Some(b'*') => (0..=name.len())
                .any(|skip| matches_at(&pattern[1..], &name[skip..])),
            Some(b'%') => (0..=name.len())
                .take_while(|&skip| {
                    !name[..skip].contains(&b'/')
                })
                .any(|skip| matches_at(&pattern[1..], &name[skip..])),
            Some(&c) => {
                name.first() == Some(&c)
                    && matches_at(&pattern[1..], &name[1..])
            },
        }
    }

    matches_at(pattern.as_bytes(), name.as_bytes())
}

#[derive(Default)]
pub struct Status {
    mailbox: String,
    items: Vec<StatusItem>,
}

impl Handler for Status {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        match args.as_slice() {
            [mailbox, Field::List(items)] => {
                self.mailbox = mailbox.to_text()?;
                self.items = items
                    .iter()
                    .map(|item| StatusItem::parse(&item.to_text()?))
                    .collect::<Result<_, _>>()?;
                Ok(())
            },
            _ => Err(Error::Parse(
                "STATUS expects a mailbox and an item list".to_owned(),
            )),
        }
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        let status = require_user(conn)?
            .get_mailbox(&self.mailbox)?
            .status(&self.items)?;
        conn.write_res(&mut StatusItemsResp {
            status,
            items: self.items.clone(),
        })
    }
}

#[derive(Default)]
pub struct Append {
    mailbox: String,
    flags: Vec<String>,
    date: Option<DateTime<FixedOffset>>,
    message: Vec<u8>,
}

impl Handler for Append {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        if args.len() < 2 {
            return Err(Error::Parse(
                "APPEND expects a mailbox and a message literal".to_owned(),
            ));
        }

        self.mailbox = args[0].to_text()?;
        self.message = args[args.len() - 1]
            .as_bytes()
            .ok_or_else(|| {
                Error::Parse(
                    "APPEND message must be a literal".to_owned(),
                )
            })?
            .to_vec();

        for arg in &args[1..args.len() - 1] {
            match *arg {
                Field::List(ref flags) => {
                    self.flags = parse_string_list(flags)?;
                },
                ref arg => {
                    self.date = Some(parse_date(arg.as_str().ok_or_else(
                        || {
                            Error::Parse(
                                "Bad APPEND argument".to_owned(),
                            )
                        },
                    )?)?);
                },
            }
        }

        Ok(())
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        let mut mailbox =
            require_user(conn)?.get_mailbox(&self.mailbox)?;
        mailbox.create_message(&self.flags, self.date, &self.message)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pattern_matching() {
        assert!(matches_pattern("*", "INBOX"));
        assert!(matches_pattern("INBOX", "INBOX"));
        assert!(!matches_pattern("INBOX", "Archive"));
        assert!(matches_pattern("Archive/*", "Archive/2024/tax"));
        assert!(matches_pattern("Archive/%", "Archive/2024"));
        assert!(!matches_pattern("Archive/%", "Archive/2024/tax"));
        assert!(matches_pattern("%", "INBOX"));
        assert!(!matches_pattern("%", "Archive/2024"));
        assert!(matches_pattern("*/tax", "Archive/2024/tax"));
        assert!(!matches_pattern("", "INBOX"));
        assert!(matches_pattern("IN%X", "INBOX"));
    }
}
