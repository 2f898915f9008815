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

use super::date::{format_date, parse_date};
use crate::support::error::Error;
use crate::wire::Field;

/// One address in an envelope.
///
/// Every component is optional; an absent component is NIL on the wire.
/// `at_domain_list` is the obsolete source-routing field and is essentially
/// always absent in real mail.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Address {
    pub personal_name: Option<String>,
    pub at_domain_list: Option<String>,
    pub mailbox_name: Option<String>,
    pub host_name: Option<String>,
}

impl Address {
    pub fn parse(fields: &[Field]) -> Result<Self, Error> {
        if fields.len() < 4 {
            return Err(Error::Parse(
                "Address has too few fields".to_owned(),
            ));
        }

        Ok(Address {
            personal_name: nstring(&fields[0]),
            at_domain_list: nstring(&fields[1]),
            mailbox_name: nstring(&fields[2]),
            host_name: nstring(&fields[3]),
        })
    }

    pub fn format(&self) -> Vec<Field> {
        vec![
            nstring_field(&self.personal_name),
            nstring_field(&self.at_domain_list),
            nstring_field(&self.mailbox_name),
            nstring_field(&self.host_name),
        ]
    }
}

pub(crate) fn nstring(field: &Field) -> Option<String> {
    field.as_str().map(str::to_owned)
}

pub(crate) fn nstring_field(value: &Option<String>) -> Field {
    match *value {
        Some(ref s) => Field::String(s.clone()),
        None => Field::Nil,
    }
}

/// Parse a field list in which each element is one address.
pub fn parse_address_list(fields: &[Field]) -> Result<Vec<Address>, Error> {
    fields
        .iter()
        .map(|f| match *f {
            Field::List(ref inner) => Address::parse(inner),
            ref f => Err(Error::Parse(format!(
                "Expected an address, got {:?}",
                f
            ))),
        })
        .collect()
}

pub fn format_address_list(addresses: &[Address]) -> Vec<Field> {
    addresses
        .iter()
        .map(|a| Field::List(a.format()))
        .collect()
}

/// A message envelope, per RFC 3501 section 2.3.5.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    pub date: Option<DateTime<FixedOffset>>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub sender: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

impl Envelope {
    pub fn parse(fields: &[Field]) -> Result<Self, Error> {
        if fields.len() < 10 {
            return Err(Error::Parse(
                "Envelope has too few fields".to_owned(),
            ));
        }

        let date = match fields[0].as_str() {
            Some(s) => Some(parse_date(s)?),
            None => None,
        };

        Ok(Envelope {
            date,
            subject: nstring(&fields[1]),
            from: address_list(&fields[2])?,
            sender: address_list(&fields[3])?,
            reply_to: address_list(&fields[4])?,
            to: address_list(&fields[5])?,
            cc: address_list(&fields[6])?,
            bcc: address_list(&fields[7])?,
            in_reply_to: nstring(&fields[8]),
            message_id: nstring(&fields[9]),
        })
    }

    pub fn format(&self) -> Vec<Field> {
        vec![
            match self.date {
                Some(ref d) => Field::String(format_date(d)),
                None => Field::Nil,
            },
            nstring_field(&self.subject),
            Field::List(format_address_list(&self.from)),
            Field::List(format_address_list(&self.sender)),
            Field::List(format_address_list(&self.reply_to)),
            Field::List(format_address_list(&self.to)),
            Field::List(format_address_list(&self.cc)),
            Field::List(format_address_list(&self.bcc)),
            nstring_field(&self.in_reply_to),
            nstring_field(&self.message_id),
        ]
    }
}

/// Address lists are never NIL when formatted, but NIL is accepted when
/// parsing and maps to the empty list.
fn address_list(field: &Field) -> Result<Vec<Address>, Error> {
    match *field {
        Field::Nil => Ok(Vec::new()),
        Field::List(ref fields) => parse_address_list(fields),
        ref f => Err(Error::Parse(format!(
            "Expected an address list, got {:?}",
            f
        ))),
    }
}
