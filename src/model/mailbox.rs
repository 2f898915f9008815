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

use crate::support::error::Error;
use crate::wire::{parse_string_list, Field};

/// The mailbox every account has.
pub const INBOX: &str = "INBOX";

// Mailbox attributes for LIST responses.
pub const NOSELECT_ATTR: &str = "\\Noselect";
pub const NOINFERIORS_ATTR: &str = "\\Noinferiors";
pub const MARKED_ATTR: &str = "\\Marked";
pub const UNMARKED_ATTR: &str = "\\Unmarked";

/// One row of a LIST or LSUB response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxInfo {
    pub attributes: Vec<String>,
    pub delimiter: String,
    pub name: String,
}

impl MailboxInfo {
    /// Parse the fields following `* LIST`.
    pub fn parse(fields: &[Field]) -> Result<Self, Error> {
        if fields.len() < 3 {
            return Err(Error::Parse(
                "LIST response has too few fields".to_owned(),
            ));
        }

        Ok(MailboxInfo {
            attributes: parse_string_list(
                fields[0].as_list().ok_or_else(|| {
                    Error::Parse(
                        "LIST attributes must be a list".to_owned(),
                    )
                })?,
            )?,
            delimiter: match fields[1] {
                Field::Nil => String::new(),
                ref f => f.to_text()?,
            },
            name: fields[2].to_text()?,
        })
    }

    pub fn format(&self) -> Vec<Field> {
        vec![
            Field::List(
                self.attributes
                    .iter()
                    .map(|a| Field::String(a.clone()))
                    .collect(),
            ),
            if self.delimiter.is_empty() {
                Field::Nil
            } else {
                Field::String(self.delimiter.clone())
            },
            Field::String(self.name.clone()),
        ]
    }
}

/// The items a STATUS command may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusItem {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

impl StatusItem {
    pub const ALL: &'static [StatusItem] = &[
        StatusItem::Messages,
        StatusItem::Recent,
        StatusItem::UidNext,
        StatusItem::UidValidity,
        StatusItem::Unseen,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StatusItem::Messages => "MESSAGES",
            StatusItem::Recent => "RECENT",
            StatusItem::UidNext => "UIDNEXT",
            StatusItem::UidValidity => "UIDVALIDITY",
            StatusItem::Unseen => "UNSEEN",
        }
    }

    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "MESSAGES" => Ok(StatusItem::Messages),
            "RECENT" => Ok(StatusItem::Recent),
            "UIDNEXT" => Ok(StatusItem::UidNext),
            "UIDVALIDITY" => Ok(StatusItem::UidValidity),
            "UNSEEN" => Ok(StatusItem::Unseen),
            _ => Err(Error::Parse(format!("Unknown STATUS item: {}", s))),
        }
    }
}

/// A snapshot of a mailbox's counters and flags, as produced for SELECT,
/// EXAMINE and STATUS.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailboxStatus {
    pub name: String,
    pub flags: Vec<String>,
    pub permanent_flags: Vec<String>,
    pub messages: u32,
    pub recent: u32,
    /// Sequence number of the first unseen message; 0 when none.
    pub unseen: u32,
    pub uid_next: u32,
    pub uid_validity: u32,
    pub read_only: bool,
}

impl MailboxStatus {
    /// Format the item/value pairs for a `* STATUS` response.
    pub fn format_items(&self, items: &[StatusItem]) -> Vec<Field> {
        let mut fields = Vec::with_capacity(2 * items.len());
        for item in items {
            fields.push(Field::from(item.name()));
            fields.push(Field::from(match item {
                StatusItem::Messages => self.messages,
                StatusItem::Recent => self.recent,
                StatusItem::UidNext => self.uid_next,
                StatusItem::UidValidity => self.uid_validity,
                StatusItem::Unseen => self.unseen,
            }));
        }
        fields
    }

    /// Read item/value pairs from a `* STATUS` response into this status.
    pub fn parse_items(&mut self, fields: &[Field]) -> Result<(), Error> {
        if fields.len() % 2 != 0 {
            return Err(Error::Parse(
                "STATUS items have a key without a value".to_owned(),
            ));
        }

        for pair in fields.chunks(2) {
            let value = pair[1].as_number()?;
            match StatusItem::parse(&pair[0].to_text()?)? {
                StatusItem::Messages => self.messages = value,
                StatusItem::Recent => self.recent = value,
                StatusItem::UidNext => self.uid_next = value,
                StatusItem::UidValidity => self.uid_validity = value,
                StatusItem::Unseen => self.unseen = value,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mailbox_info_round_trip() {
        let info = MailboxInfo {
            attributes: vec![NOSELECT_ATTR.to_owned()],
            delimiter: "/".to_owned(),
            name: "Archive/2024".to_owned(),
        };
        assert_eq!(info, MailboxInfo::parse(&info.format()).unwrap());

        let rootless = MailboxInfo {
            attributes: vec![],
            delimiter: String::new(),
            name: INBOX.to_owned(),
        };
        let formatted = rootless.format();
        assert_eq!(Field::Nil, formatted[1]);
        assert_eq!(rootless, MailboxInfo::parse(&formatted).unwrap());
    }

    #[test]
    fn status_items_round_trip() {
        let status = MailboxStatus {
            messages: 12,
            recent: 3,
            unseen: 5,
            uid_next: 13,
            uid_validity: 250,
            ..MailboxStatus::default()
        };

        let fields = status
            .format_items(&[StatusItem::Messages, StatusItem::UidNext]);
        assert_eq!(
            vec![
                Field::from("MESSAGES"),
                Field::from("12"),
                Field::from("UIDNEXT"),
                Field::from("13"),
            ],
            fields
        );

        let mut parsed = MailboxStatus::default();
        parsed.parse_items(&fields).unwrap();
        assert_eq!(12, parsed.messages);
        assert_eq!(13, parsed.uid_next);
        assert_eq!(0, parsed.recent);
    }

    #[test]
    fn status_item_names() {
        for item in StatusItem::ALL {
            assert_eq!(*item, StatusItem::parse(item.name()).unwrap());
        }
        assert!(StatusItem::parse("HIGHESTMODSEQ").is_err());
    }
}
