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

//! Handlers requiring the Selected state.

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;

use log::warn;

use super::conn::Conn;
use super::Handler;
use crate::model::{FlagsOp, SearchCriteria, SeqSet};
use crate::proto::{ExpungeResp, FetchResp, SearchResp};
use crate::support::error::Error;
use crate::wire::{parse_string_list, Field};

fn require_writable(conn: &Conn) -> Result<(), Error> {
    if conn.mailbox.is_none() {
        Err(Error::NoMailboxSelected)
    } else if conn.mailbox_read_only {
        Err(Error::MailboxReadOnly)
    } else {
        Ok(())
    }
}

pub struct Check;

impl Handler for Check {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        super::cmd_any::no_arguments("CHECK", &args)
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        require_writable(conn)?;
        conn.mailbox
            .as_mut()
            .ok_or(Error::NoMailboxSelected)?
            .check()
    }
}

pub struct Close;

impl Handler for Close {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        super::cmd_any::no_arguments("CLOSE", &args)
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        let mut mailbox =
            conn.mailbox.take().ok_or(Error::NoMailboxSelected)?;

        // Expunge first, then unselect; per RFC 3501 the expunge is
        // skipped read-only and its failure does not fail the CLOSE. No
        // untagged EXPUNGE responses are sent either way.
        if !conn.mailbox_read_only {
            if let Err(e) = mailbox.expunge() {
                warn!(
                    "{} Implicit EXPUNGE failed: {}",
                    conn.log_prefix(),
                    e
                );
            }
        }

        conn.unselect();
        Ok(())
    }
}

pub struct Expunge;

impl Handler for Expunge {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        super::cmd_any::no_arguments("EXPUNGE", &args)
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        require_writable(conn)?;

        // When the backend has no update stream, the untagged EXPUNGE
        // responses must be synthesised here, which requires knowing the
        // doomed sequence numbers before the backend removes them.
        let updating = conn.server.updating.load(Ordering::SeqCst);
        let seq_nums = if updating {
            Vec::new()
        } else {
            conn.mailbox
                .as_ref()
                .ok_or(Error::NoMailboxSelected)?
                .search_messages(
                    false,
                    &SearchCriteria {
                        deleted: true,
                        ..SearchCriteria::default()
                    },
                )?
        };

        conn.mailbox
            .as_mut()
            .ok_or(Error::NoMailboxSelected)?
            .expunge()?;

        if !updating {
            let (sender, receiver) = mpsc::sync_channel(1);
            // Descending order: expunging a low sequence number renumbers
            // everything above it, so each emitted number must be higher
            // than the next.
            let feeder = thread::spawn(move || {
                for seq_num in seq_nums.into_iter().rev() {
                    if sender.send(seq_num).is_err() {
                        break;
                    }
                }
            });

            let result = conn.write_res(&mut ExpungeResp {
                seq_nums: receiver,
            });
            let _ = feeder.join();
            result?;
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct Search {
    criteria: SearchCriteria,
}

impl Search {
    fn do_handle(&self, uid: bool, conn: &mut Conn) -> Result<(), Error> {
        let ids = conn
            .mailbox
            .as_ref()
            .ok_or(Error::NoMailboxSelected)?
            .search_messages(uid, &self.criteria)?;
        conn.write_res(&mut SearchResp { ids })
    }
}

impl Handler for Search {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        let mut args = args.as_slice();

        // Only the charsets every server must know
        if args.len() >= 2
            && args[0]
                .as_str()
                .map_or(false, |s| s.eq_ignore_ascii_case("CHARSET"))
        {
            let charset = args[1].to_text()?;
            if !charset.eq_ignore_ascii_case("UTF-8")
                && !charset.eq_ignore_ascii_case("US-ASCII")
            {
                return Err(Error::Backend(format!(
                    "Unsupported charset: {}",
                    charset
                )));
            }
            args = &args[2..];
        }

        if args.is_empty() {
            return Err(Error::Parse(
                "SEARCH expects at least one key".to_owned(),
            ));
        }

        self.criteria = SearchCriteria::parse(args)?;
        Ok(())
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        self.do_handle(false, conn)
    }

    fn handle_uid(&mut self, conn: &mut Conn) -> Result<(), Error> {
        self.do_handle(true, conn)
    }
}

#[derive(Default)]
pub struct Fetch {
    seq_set: SeqSet,
    items: Vec<String>,
}

impl Fetch {
    fn do_handle(&self, uid: bool, conn: &mut Conn) -> Result<(), Error> {
        let mailbox =
            conn.mailbox.as_ref().ok_or(Error::NoMailboxSelected)?;

        // The backend pushes messages into a bounded channel from a helper
        // thread while this thread formats and writes them under the write
        // lock; the channel bound is the backpressure. Both legs must
        // finish before the tagged status.
        let (sender, receiver) = mpsc::sync_channel(4);
        let mut response = FetchResp { messages: receiver };

        thread::scope(|scope| {
            let producer = scope.spawn(move || {
                mailbox.list_messages(
                    uid,
                    &self.seq_set,
                    &self.items,
                    sender,
                )
            });

            let write_result = conn.write_res(&mut response);
            let backend_result = match producer.join() {
                Ok(result) => result,
                Err(_) => {
                    Err(Error::Backend("Backend panicked".to_owned()))
                },
            };

            // A backend failure stands even if the partial output was
            // written fine; it becomes the tagged NO.
            backend_result.and(write_result)
        })
    }
}

impl Handler for Fetch {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        match args.as_slice() {
            [seq_set, items] => {
                self.seq_set = seq_set.to_text()?.parse()?;
                self.items = parse_fetch_items(items)?;
                Ok(())
            },
            _ => Err(Error::Parse(
                "FETCH expects a sequence set and items".to_owned(),
            )),
        }
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        self.do_handle(false, conn)
    }

    fn handle_uid(&mut self, conn: &mut Conn) -> Result<(), Error> {
        // UID FETCH implicitly fetches the UID
        if !self
            .items
            .iter()
            .any(|item| item.eq_ignore_ascii_case("UID"))
        {
            self.items.push("UID".to_owned());
        }

        self.do_handle(true, conn)
    }
}

fn parse_fetch_items(field: &Field) -> Result<Vec<String>, Error> {
    match *field {
        Field::List(ref items) => parse_string_list(items),
        ref item => {
            let item = item.to_text()?;
            // The one-atom macros from RFC 3501 section 6.4.5
            Ok(match item.to_ascii_uppercase().as_str() {
                "ALL" => vec![
                    "FLAGS".to_owned(),
                    "INTERNALDATE".to_owned(),
                    "RFC822.SIZE".to_owned(),
                    "ENVELOPE".to_owned(),
                ],
                "FAST" => vec![
                    "FLAGS".to_owned(),
                    "INTERNALDATE".to_owned(),
                    "RFC822.SIZE".to_owned(),
                ],
                "FULL" => vec![
                    "FLAGS".to_owned(),
                    "INTERNALDATE".to_owned(),
                    "RFC822.SIZE".to_owned(),
                    "ENVELOPE".to_owned(),
                    "BODY".to_owned(),
                ],
                _ => vec![item],
            })
        },
    }
}

pub struct Store {
    seq_set: SeqSet,
    op: FlagsOp,
    silent: bool,
    flags: Vec<String>,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            seq_set: SeqSet::default(),
            op: FlagsOp::Set,
            silent: false,
            flags: Vec::new(),
        }
    }
}

impl Store {
    fn do_handle(&self, uid: bool, conn: &mut Conn) -> Result<(), Error> {
        require_writable(conn)?;

        // While the backend mutates the flags, suppress the fan-out's
        // FETCH echo to this connection if the client asked for silence.
        conn.set_silent(self.silent);
        let result = conn
            .mailbox
            .as_mut()
            .ok_or(Error::NoMailboxSelected)
            .and_then(|mailbox| {
                mailbox.update_messages_flags(
                    uid,
                    &self.seq_set,
                    self.op,
                    &self.flags,
                )
            });
        conn.set_silent(false);
        result?;

        // Without a backend update stream, the FETCH echo has to be
        // synthesised here.
        if !conn.server.updating.load(Ordering::SeqCst) && !self.silent {
            let mut items = vec!["FLAGS".to_owned()];
            if uid {
                items.push("UID".to_owned());
            }
            let echo = Fetch {
                seq_set: self.seq_set.clone(),
                items,
            };
            echo.do_handle(uid, conn)?;
        }

        Ok(())
    }
}

impl Handler for Store {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        if args.len() < 3 {
            return Err(Error::Parse(
                "STORE expects a sequence set, an item, and flags"
                    .to_owned(),
            ));
        }

        self.seq_set = args[0].to_text()?.parse()?;
        let (op, silent) =
            FlagsOp::parse_store_item(&args[1].to_text()?)?;
        self.op = op;
        self.silent = silent;

        self.flags = match args[2] {
            // Both `(\Seen \Flagged)` and bare `\Seen \Flagged` are seen
            // in the wild
            Field::List(ref flags) => parse_string_list(flags)?,
            _ => parse_string_list(&args[2..])?,
        };

        Ok(())
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        self.do_handle(false, conn)
    }

    fn handle_uid(&mut self, conn: &mut Conn) -> Result<(), Error> {
        self.do_handle(true, conn)
    }
}

#[derive(Default)]
pub struct Copy {
    seq_set: SeqSet,
    mailbox: String,
}

impl Copy {
    fn do_handle(&self, uid: bool, conn: &mut Conn) -> Result<(), Error> {
        conn.mailbox
            .as_ref()
            .ok_or(Error::NoMailboxSelected)?
            .copy_messages(uid, &self.seq_set, &self.mailbox)
    }
}

impl Handler for Copy {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        match args.as_slice() {
            [seq_set, mailbox] => {
                self.seq_set = seq_set.to_text()?.parse()?;
                self.mailbox = mailbox.to_text()?;
                Ok(())
            },
            _ => Err(Error::Parse(
                "COPY expects a sequence set and a mailbox".to_owned(),
            )),
        }
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        self.do_handle(false, conn)
    }

    fn handle_uid(&mut self, conn: &mut Conn) -> Result<(), Error> {
        self.do_handle(true, conn)
    }
}

/// The UID prefix command: delegates to the inner verb's UID variant.
#[derive(Default)]
pub struct Uid {
    args: Vec<Field>,
}

impl Handler for Uid {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        if args.is_empty() {
            return Err(Error::Parse(
                "UID expects a command".to_owned(),
            ));
        }
        self.args = args;
        Ok(())
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        let name = self.args[0]
            .as_str()
            .map(str::to_ascii_uppercase)
            .ok_or_else(|| {
                Error::Parse("UID expects a command name".to_owned())
            })?;

        let handler = {
            let commands = conn.server.commands.read().unwrap();
            commands.get(&name).map(|factory| factory())
        };
        let mut handler = handler.ok_or(Error::UnknownCommand)?;

        handler.parse(self.args[1..].to_vec())?;
        handler.handle_uid(conn)
    }
}
