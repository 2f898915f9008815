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

//! The mailbox backend contract.
//!
//! A backend is the actual mail store; the engine only drives it. The base
//! traits cover everything RFC 3501 requires. Unsolicited-update support is
//! a separate capability which the server probes once at serve time: a
//! backend that returns channels from [`Backend::updates`] takes over
//! responsibility for producing FETCH/EXPUNGE updates after flag changes
//! and expunges, and the server fans them out to every matching connection.

use std::sync::mpsc::{Receiver, SyncSender};

use chrono::{DateTime, FixedOffset};

use crate::model::{
    FlagsOp, MailboxInfo, MailboxStatus, Message, SearchCriteria, SeqSet,
    StatusItem,
};
use crate::proto::StatusResp;
use crate::support::error::Error;

pub mod memory;

pub trait Backend: Send + Sync {
    /// Check credentials and produce a user session handle.
    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn User>, Error>;

    /// Take the backend's unsolicited update streams, if it has any.
    ///
    /// Called at most once, when the server starts serving. `None` means
    /// the engine synthesises FETCH and EXPUNGE updates itself where the
    /// protocol requires them.
    fn updates(&self) -> Option<Updates> {
        None
    }
}

pub trait User: Send {
    fn username(&self) -> &str;

    /// All mailboxes, or only the subscribed ones.
    fn list_mailboxes(
        &self,
        subscribed_only: bool,
    ) -> Result<Vec<MailboxInfo>, Error>;

    fn get_mailbox(&self, name: &str) -> Result<Box<dyn Mailbox>, Error>;

    fn create_mailbox(&self, name: &str) -> Result<(), Error>;

    fn delete_mailbox(&self, name: &str) -> Result<(), Error>;

    fn rename_mailbox(
        &self,
        existing_name: &str,
        new_name: &str,
    ) -> Result<(), Error>;
}

impl std::fmt::Debug for dyn User + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username())
            .finish()
    }
}

// `Sync` because FETCH shares the mailbox handle with the helper thread
// that streams messages out of it.
pub trait Mailbox: Send + Sync {
    fn name(&self) -> &str;

    fn info(&self) -> Result<MailboxInfo, Error>;

    fn status(&self, items: &[StatusItem]) -> Result<MailboxStatus, Error>;

    fn set_subscribed(&mut self, subscribed: bool) -> Result<(), Error>;

    /// Perform an implementation-defined checkpoint.
    fn check(&mut self) -> Result<(), Error>;

    /// Send the requested items of every message in `seq_set` down
    /// `sender`, in mailbox order.
    ///
    /// The channel is bounded, so a slow consumer throttles the listing.
    /// The receiving side writes concurrently; a send error means the
    /// receiver is gone and the listing should stop.
    fn list_messages(
        &self,
        uid: bool,
        seq_set: &SeqSet,
        items: &[String],
        sender: SyncSender<Message>,
    ) -> Result<(), Error>;

    /// Sequence numbers (or UIDs when `uid`) of the matching messages, in
    /// ascending order.
    fn search_messages(
        &self,
        uid: bool,
        criteria: &SearchCriteria,
    ) -> Result<Vec<u32>, Error>;

    fn create_message(
        &mut self,
        flags: &[String],
        date: Option<DateTime<FixedOffset>>,
        body: &[u8],
    ) -> Result<(), Error>;

    fn update_messages_flags(
        &mut self,
        uid: bool,
        seq_set: &SeqSet,
        op: FlagsOp,
        flags: &[String],
    ) -> Result<(), Error>;

    fn copy_messages(
        &self,
        uid: bool,
        seq_set: &SeqSet,
        dest_name: &str,
    ) -> Result<(), Error>;

    /// Remove every `\Deleted` message.
    fn expunge(&mut self) -> Result<(), Error>;
}

/// Which connections an update is for. An empty string is a wildcard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Update {
    pub username: String,
    pub mailbox: String,
}

/// A raw status response to relay, e.g. an alert.
pub struct StatusUpdate {
    pub update: Update,
    pub status: StatusResp,
}

/// A mailbox's attributes changed.
pub struct MailboxUpdate {
    pub update: Update,
    pub status: MailboxStatus,
}

/// A message's attributes (typically flags) changed.
pub struct MessageUpdate {
    pub update: Update,
    pub message: Message,
}

/// A message was expunged.
pub struct ExpungeUpdate {
    pub update: Update,
    pub seq_num: u32,
}

/// The four unsolicited-update streams a backend can expose.
///
/// Per-channel ordering is preserved all the way to each connection; no
/// ordering holds across channels.
pub struct Updates {
    pub statuses: Receiver<StatusUpdate>,
    pub mailboxes: Receiver<MailboxUpdate>,
    pub messages: Receiver<MessageUpdate>,
    pub expunges: Receiver<ExpungeUpdate>,
}
