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

//! The IMAP data model.
//!
//! Every type here round-trips through `parse(fields)` / `format()` over
//! token lists from the [`crate::wire`] codec. Numeric conversion happens
//! here, not in the codec.

pub mod body;
pub mod date;
pub mod envelope;
pub mod mailbox;
pub mod message;
pub mod search;
pub mod section;
pub mod seqset;

pub use self::body::BodyStructure;
pub use self::envelope::{Address, Envelope};
pub use self::mailbox::{MailboxInfo, MailboxStatus, StatusItem};
pub use self::message::{FlagsOp, Message};
pub use self::search::SearchCriteria;
pub use self::section::{BodyPartName, BodySectionName, PartSpecifier};
pub use self::seqset::{Seq, SeqSet};
