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

use chrono::{DateTime, FixedOffset};

use super::body::BodyStructure;
use super::date::{format_date, parse_date};
use super::envelope::Envelope;
use super::section::BodySectionName;
use crate::support::error::Error;
use crate::wire::{parse_string_list, Field};

// The system flags defined by RFC 3501.
pub const SEEN_FLAG: &str = "\\Seen";
pub const ANSWERED_FLAG: &str = "\\Answered";
pub const FLAGGED_FLAG: &str = "\\Flagged";
pub const DELETED_FLAG: &str = "\\Deleted";
pub const DRAFT_FLAG: &str = "\\Draft";
pub const RECENT_FLAG: &str = "\\Recent";

/// What a STORE command does with its flag list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagsOp {
    Set,
    Add,
    Remove,
}

impl FlagsOp {
    /// Parse a STORE item such as `+FLAGS.SILENT` into the operation and
    /// the silent marker.
    pub fn parse_store_item(item: &str) -> Result<(FlagsOp, bool), Error> {
        let upper = item.to_ascii_uppercase();
        let (name, silent) = match upper.strip_suffix(".SILENT") {
            Some(name) => (name, true),
            None => (upper.as_str(), false),
        };

        let op = match name {
            "FLAGS" => FlagsOp::Set,
            "+FLAGS" => FlagsOp::Add,
            "-FLAGS" => FlagsOp::Remove,
            _ => {
                return Err(Error::Parse(format!(
                    "Unsupported STORE operation: {}",
                    item
                )))
            },
        };
        Ok((op, silent))
    }
}

/// One message as seen in a FETCH response.
///
/// `items` records which attributes are populated, in wire order, so that
/// formatting emits precisely what was requested and parsing records
/// precisely what was received.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub items: Vec<String>,
    pub seq_num: u32,
    pub uid: u32,
    pub flags: Vec<String>,
    pub envelope: Option<Envelope>,
    pub body_structure: Option<BodyStructure>,
    pub size: u32,
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// Fetched body sections, keyed by their section name.
    pub body: Vec<(BodySectionName, Vec<u8>)>,
}

impl Message {
    /// Parse the parenthesised key/value pairs of a FETCH response.
    ///
    /// Every pair the wire presents is read, whether or not it was
    /// requested; the serialiser is the source of truth.
    pub fn parse(fields: &[Field]) -> Result<Self, Error> {
        if fields.len() % 2 != 0 {
            return Err(Error::Parse(
                "Message has a key without a value".to_owned(),
            ));
        }

        let mut message = Message::default();
        for pair in fields.chunks(2) {
            // Keys are matched case-insensitively, but the original
            // spelling is kept in `items` (section names embed header field
            // names whose case is worth preserving).
            let key = pair[0].to_text()?;
            let val = &pair[1];

            match key.to_ascii_uppercase().as_str() {
                "FLAGS" => {
                    message.flags = parse_string_list(
                        val.as_list().ok_or_else(|| {
                            Error::Parse("FLAGS must be a list".to_owned())
                        })?,
                    )?;
                },
                "UID" => message.uid = val.as_number()?,
                "RFC822.SIZE" => message.size = val.as_number()?,
                "INTERNALDATE" => {
                    message.internal_date = Some(parse_date(
                        val.as_str().ok_or_else(|| {
                            Error::Parse(
                                "INTERNALDATE must be a string".to_owned(),
                            )
                        })?,
                    )?);
                },
                "ENVELOPE" => {
                    message.envelope = Some(Envelope::parse(
                        val.as_list().ok_or_else(|| {
                            Error::Parse(
                                "ENVELOPE must be a list".to_owned(),
                            )
                        })?,
                    )?);
                },
                "BODY" | "BODYSTRUCTURE" => {
                    message.body_structure = Some(BodyStructure::parse(
                        val.as_list().ok_or_else(|| {
                            Error::Parse(format!(
                                "{} must be a list",
                                key
                            ))
                        })?,
                    )?);
                },
                _ => {
                    // Anything else must be a body section
                    let section: BodySectionName = key.parse()?;
                    let data = val.as_bytes().unwrap_or(b"").to_vec();
                    message.body.push((section, data));
                },
            }

            message.items.push(key);
        }

        Ok(message)
    }

    /// Format the key/value pairs for a FETCH response, emitting exactly
    /// the attributes named in `items`.
    pub fn format(&self) -> Vec<Field> {
        let mut fields = Vec::with_capacity(2 * self.items.len());

        for item in &self.items {
            let value = match item.to_ascii_uppercase().as_str() {
                "FLAGS" => Some(Field::List(
                    self.flags
                        .iter()
                        .map(|f| Field::String(f.clone()))
                        .collect(),
                )),
                "UID" => Some(Field::from(self.uid)),
                "RFC822.SIZE" => Some(Field::from(self.size)),
                "INTERNALDATE" => self
                    .internal_date
                    .as_ref()
                    .map(|d| Field::String(format_date(d))),
                "ENVELOPE" => self
                    .envelope
                    .as_ref()
                    .map(|e| Field::List(e.format())),
                "BODY" | "BODYSTRUCTURE" => self
                    .body_structure
                    .as_ref()
                    .map(|b| Field::List(b.format())),
                _ => item.parse::<BodySectionName>().ok().and_then(
                    |section| {
                        self.body.iter().find_map(|(s, data)| {
                            if *s == section {
                                Some(Field::Literal(data.clone()))
                            } else {
                                None
                            }
                        })
                    },
                ),
            };

            if let Some(value) = value {
                fields.push(Field::String(item.clone()));
                fields.push(value);
            }
        }

        fields
    }

    /// Look up a fetched body section by name.
    pub fn section(&self, name: &BodySectionName) -> Option<&[u8]> {
        self.body.iter().find_map(|(s, data)| {
            if s == name {
                Some(data.as_slice())
            } else {
                None
            }
        })
    }
}
