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

//! Body section names: the `BODY[1.2.HEADER.FIELDS (From To)]<0.512>`
//! mini-language used by FETCH.
//!
//! The obsolete `RFC822`, `RFC822.HEADER` and `RFC822.TEXT` items are
//! accepted and normalise to their `BODY[...]` equivalents
//! (`RFC822.HEADER` implies peek, as RFC 3501 defines it).

use std::fmt;
use std::str::FromStr;

use crate::support::error::Error;
use crate::wire::{parse_fields, Field};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum PartSpecifier {
    /// The entire part.
    #[default]
    Entire,
    Header,
    Mime,
    Text,
}

impl PartSpecifier {
    fn name(self) -> &'static str {
        match self {
            PartSpecifier::Entire => "",
            PartSpecifier::Header => "HEADER",
            PartSpecifier::Mime => "MIME",
            PartSpecifier::Text => "TEXT",
        }
    }
}

/// The part of a body section name inside the brackets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BodyPartName {
    pub specifier: PartSpecifier,
    /// Dotted numeric path to a nested part; empty for the top level.
    pub path: Vec<u32>,
    /// Header field names for `HEADER.FIELDS` / `HEADER.FIELDS.NOT`.
    pub fields: Vec<String>,
    /// Whether `fields` is the excluded set (`HEADER.FIELDS.NOT`).
    pub not_fields: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BodySectionName {
    pub part: BodyPartName,
    /// Whether fetching this section must not set `\Seen`.
    pub peek: bool,
    /// `<offset.length>` byte range, if any.
    pub partial: Option<(u32, u32)>,
}

impl BodySectionName {
    /// Apply the partial range to a fully fetched section.
    pub fn extract_partial<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        match self.partial {
            None => buf,
            Some((offset, length)) => {
                let start = (offset as usize).min(buf.len());
                let end = (offset as usize)
                    .saturating_add(length as usize)
                    .min(buf.len());
                &buf[start..end]
            },
        }
    }
}

impl FromStr for BodySectionName {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Error> {
        let bad =
            || Error::Parse(format!("Invalid body section name: {}", raw));

        let open = match raw.find('[') {
            Some(ix) => ix,
            None => {
                // The RFC822 aliases have no bracketed section
                let mut bsn = BodySectionName::default();
                match raw.to_ascii_uppercase().as_str() {
                    "RFC822" => (),
                    "RFC822.HEADER" => {
                        bsn.part.specifier = PartSpecifier::Header;
                        bsn.peek = true;
                    },
                    "RFC822.TEXT" => {
                        bsn.part.specifier = PartSpecifier::Text;
                    },
                    _ => return Err(bad()),
                }
                return Ok(bsn);
            },
        };

        let close = raw.rfind(']').filter(|&c| c > open).ok_or_else(bad)?;

        let mut bsn = BodySectionName::default();
        match raw[..open].to_ascii_uppercase().as_str() {
            "BODY" => (),
            "BODY.PEEK" => bsn.peek = true,
            _ => return Err(bad()),
        }

        let after = &raw[close + 1..];
        if !after.is_empty() {
            let inner = after
                .strip_prefix('<')
                .and_then(|a| a.strip_suffix('>'))
                .ok_or_else(bad)?;
            let (offset, length) = inner.split_once('.').ok_or_else(bad)?;
            bsn.partial = Some((
                offset.parse().map_err(|_| bad())?,
                length.parse().map_err(|_| bad())?,
            ));
        }

        bsn.part = raw[open + 1..close].parse()?;
        Ok(bsn)
    }
}

impl FromStr for BodyPartName {
    type Err = Error;

    fn from_str(section: &str) -> Result<Self, Error> {
        let bad =
            || Error::Parse(format!("Invalid body section: {}", section));

        let mut part = BodyPartName::default();
        if section.is_empty() {
            return Ok(part);
        }

        // Header field lists come after the first space
        let (head, field_list) = match section.split_once(' ') {
            Some((head, rest)) => (head, Some(rest)),
            None => (section, None),
        };

        let mut components = head.split('.').peekable();
        while let Some(c) =
            components.next_if(|c| c.chars().all(|ch| ch.is_ascii_digit()))
        {
            part.path.push(c.parse().map_err(|_| bad())?);
        }

        let specifier: Vec<&str> = components.collect();
        match specifier
            .join(".")
            .to_ascii_uppercase()
            .as_str()
        {
            "" => (),
            "HEADER" => part.specifier = PartSpecifier::Header,
            "MIME" => part.specifier = PartSpecifier::Mime,
            "TEXT" => part.specifier = PartSpecifier::Text,
            "HEADER.FIELDS" => part.specifier = PartSpecifier::Header,
            "HEADER.FIELDS.NOT" => {
                part.specifier = PartSpecifier::Header;
                part.not_fields = true;
            },
            _ => return Err(bad()),
        }

        match field_list {
            None => (),
            Some(list) => {
                let fields = parse_fields(list.as_bytes())?;
                let names = match fields.as_slice() {
                    [Field::List(names)] => names,
                    _ => return Err(bad()),
                };
                for name in names {
                    part.fields.push(name.to_text()?);
                }
                if part.fields.is_empty() {
                    return Err(bad());
                }
            },
        }

        Ok(part)
    }
}

impl fmt::Display for BodySectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BODY")?;
        if self.peek {
            write!(f, ".PEEK")?;
        }
        write!(f, "[")?;

        let mut first = true;
        for p in &self.part.path {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", p)?;
            first = false;
        }

        let specifier = self.part.specifier.name();
        if !specifier.is_empty() {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", specifier)?;
        }

        if !self.part.fields.is_empty() {
            write!(f, ".FIELDS")?;
            if self.part.not_fields {
                write!(f, ".NOT")?;
            }
            write!(f, " ({})", self.part.fields.join(" "))?;
        }

        write!(f, "]")?;

        if let Some((offset, length)) = self.partial {
            write!(f, "<{}.{}>", offset, length)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn name(raw: &str) -> BodySectionName {
        raw.parse().unwrap()
    }

    fn with_specifier(specifier: PartSpecifier) -> BodySectionName {
        BodySectionName {
            part: BodyPartName {
                specifier,
                ..BodyPartName::default()
            },
            ..BodySectionName::default()
        }
    }

    #[test]
    fn parse_vectors() {
        assert_eq!(BodySectionName::default(), name("BODY[]"));
        assert_eq!(BodySectionName::default(), name("RFC822"));
        assert_eq!(
            with_specifier(PartSpecifier::Header),
            name("BODY[HEADER]")
        );
        assert_eq!(
            BodySectionName {
                peek: true,
                ..BodySectionName::default()
            },
            name("BODY.PEEK[]")
        );
        assert_eq!(
            with_specifier(PartSpecifier::Text),
            name("BODY[TEXT]")
        );
        assert_eq!(
            with_specifier(PartSpecifier::Text),
            name("RFC822.TEXT")
        );
        assert_eq!(
            BodySectionName {
                peek: true,
                ..with_specifier(PartSpecifier::Header)
            },
            name("RFC822.HEADER")
        );
        assert_eq!(
            BodySectionName {
                partial: Some((0, 512)),
                ..BodySectionName::default()
            },
            name("BODY[]<0.512>")
        );
        assert_eq!(
            BodySectionName {
                part: BodyPartName {
                    path: vec![1, 2, 3],
                    ..BodyPartName::default()
                },
                ..BodySectionName::default()
            },
            name("BODY[1.2.3]")
        );
        assert_eq!(
            BodySectionName {
                part: BodyPartName {
                    specifier: PartSpecifier::Header,
                    path: vec![1, 2, 3],
                    ..BodyPartName::default()
                },
                ..BodySectionName::default()
            },
            name("BODY[1.2.3.HEADER]")
        );
        assert_eq!(
            BodySectionName {
                part: BodyPartName {
                    specifier: PartSpecifier::Mime,
                    path: vec![5],
                    ..BodyPartName::default()
                },
                ..BodySectionName::default()
            },
            name("BODY[5.MIME]")
        );
        assert_eq!(
            BodySectionName {
                part: BodyPartName {
                    specifier: PartSpecifier::Header,
                    fields: vec!["From".to_owned(), "To".to_owned()],
                    ..BodyPartName::default()
                },
                ..BodySectionName::default()
            },
            name("BODY[HEADER.FIELDS (From To)]")
        );
        assert_eq!(
            BodySectionName {
                part: BodyPartName {
                    specifier: PartSpecifier::Header,
                    fields: vec!["Content-Id".to_owned()],
                    not_fields: true,
                    ..BodyPartName::default()
                },
                ..BodySectionName::default()
            },
            name("BODY[HEADER.FIELDS.NOT (Content-Id)]")
        );
    }

    #[test]
    fn parse_rejects_nonsense() {
        assert!("BODY[WAT]".parse::<BodySectionName>().is_err());
        assert!("RFC822.SIZE".parse::<BodySectionName>().is_err());
        assert!("BODY[]<5>".parse::<BodySectionName>().is_err());
        assert!("BODY[HEADER.FIELDS ()]".parse::<BodySectionName>().is_err());
        assert!("PEEK[]".parse::<BodySectionName>().is_err());
    }

    #[test]
    fn display_normalises() {
        let cases = [
            ("BODY[]", "BODY[]"),
            ("RFC822", "BODY[]"),
            ("RFC822.HEADER", "BODY.PEEK[HEADER]"),
            ("RFC822.TEXT", "BODY[TEXT]"),
            ("BODY.PEEK[]", "BODY.PEEK[]"),
            ("BODY[]<0.512>", "BODY[]<0.512>"),
            ("BODY[1.2.3]", "BODY[1.2.3]"),
            ("BODY[1.2.3.HEADER]", "BODY[1.2.3.HEADER]"),
            ("BODY[5.MIME]", "BODY[5.MIME]"),
            (
                "BODY[HEADER.FIELDS (From To)]",
                "BODY[HEADER.FIELDS (From To)]",
            ),
            (
                "BODY[HEADER.FIELDS.NOT (Content-Id)]",
                "BODY[HEADER.FIELDS.NOT (Content-Id)]",
            ),
        ];

        for (raw, expected) in cases {
            assert_eq!(expected, name(raw).to_string(), "for {}", raw);
        }
    }

    #[test]
    fn round_trip_through_display() {
        for raw in [
            "BODY[]",
            "BODY.PEEK[HEADER.FIELDS (From To Cc)]<100.200>",
            "BODY[2.1.TEXT]",
        ] {
            let parsed = name(raw);
            assert_eq!(parsed, name(&parsed.to_string()));
        }
    }

    #[test]
    fn extract_partial() {
        let whole = b"Hello World!";
        assert_eq!(
            b"Hello World!",
            name("BODY[]").extract_partial(whole)
        );
        assert_eq!(b"World", name("BODY[]<6.5>").extract_partial(whole));
        assert_eq!(
            b"World!",
            name("BODY[]<6.1000>").extract_partial(whole)
        );
        assert_eq!(b"H", name("BODY[]<0.1>").extract_partial(whole));
        assert_eq!(
            b"",
            name("BODY[]<1000.2000>").extract_partial(whole)
        );
    }
}
