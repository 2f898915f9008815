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

use std::collections::BTreeMap;
use std::str;

use crate::support::error::Error;

/// One data item in the IMAP token stream.
///
/// Atoms, quoted strings and literal payloads that hold text all surface as
/// `String`; a literal whose payload is not valid UTF-8 stays `Literal`.
/// Numbers travel as `String`; numeric interpretation belongs to the data
/// model layer, not the codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    /// An atom, quoted string, or literal payload in text form.
    String(String),
    /// A literal payload kept as raw bytes.
    Literal(Vec<u8>),
    /// A parenthesised list.
    List(Vec<Field>),
    /// `NIL`, i.e. an absent value.
    Nil,
}

impl Field {
    /// The textual content of this field, if it has any.
    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Field::String(ref s) => Some(s),
            Field::Literal(ref b) => str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// The raw bytes of this field, if it is string-like.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match *self {
            Field::String(ref s) => Some(s.as_bytes()),
            Field::Literal(ref b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Field]> {
        match *self {
            Field::List(ref l) => Some(l),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(*self, Field::Nil)
    }

    /// The textual content of this field, as an owned string.
    pub fn to_text(&self) -> Result<String, Error> {
        self.as_str().map(str::to_owned).ok_or_else(|| {
            Error::Parse(format!("Expected a string, got {:?}", self))
        })
    }

    /// This field interpreted as an IMAP number.
    pub fn as_number(&self) -> Result<u32, Error> {
        self.as_str()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| {
                Error::Parse(format!("Expected a number, got {:?}", self))
            })
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::String(s.to_owned())
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::String(s)
    }
}

impl From<u32> for Field {
    fn from(n: u32) -> Self {
        Field::String(n.to_string())
    }
}

impl From<Vec<Field>> for Field {
    fn from(l: Vec<Field>) -> Self {
        Field::List(l)
    }
}

/// Interpret a field slice as a flat list of strings.
pub fn parse_string_list(fields: &[Field]) -> Result<Vec<String>, Error> {
    fields.iter().map(Field::to_text).collect()
}

pub fn format_string_list<I: IntoIterator<Item = S>, S: Into<String>>(
    strings: I,
) -> Vec<Field> {
    strings
        .into_iter()
        .map(|s| Field::String(s.into()))
        .collect()
}

/// Interpret a field slice as alternating key/value parameter pairs, as used
/// by body parameter lists.
pub fn parse_param_list(
    fields: &[Field],
) -> Result<BTreeMap<String, String>, Error> {
    if fields.len() % 2 != 0 {
        return Err(Error::Parse(
            "Parameter list has a key without a value".to_owned(),
        ));
    }

    let mut params = BTreeMap::new();
    for pair in fields.chunks(2) {
        params.insert(pair[0].to_text()?, pair[1].to_text()?);
    }
    Ok(params)
}

pub fn format_param_list(params: &BTreeMap<String, String>) -> Vec<Field> {
    let mut fields = Vec::with_capacity(2 * params.len());
    for (k, v) in params {
        fields.push(Field::String(k.clone()));
        fields.push(Field::String(v.clone()));
    }
    fields
}
