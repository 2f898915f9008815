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

use super::envelope::{nstring, nstring_field, Envelope};
use crate::support::error::Error;
use crate::wire::{format_param_list, parse_param_list, Field};

/// A message body structure, per RFC 3501 section 7.4.2.
///
/// A single struct covers both single parts and multiparts: a multipart has
/// `mime_type == "multipart"` and its children in `parts`. The extension
/// quartet (`md5`, `disposition`, `language`, `location`) is only on the
/// wire when `extended` is set, which is how BODY output differs from
/// BODYSTRUCTURE output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BodyStructure {
    pub mime_type: String,
    pub mime_sub_type: String,
    pub params: BTreeMap<String, String>,
    pub id: Option<String>,
    pub description: Option<String>,
    pub encoding: String,
    pub size: u32,
    /// Line count; only meaningful for text/* and message/rfc822 parts.
    pub lines: u32,
    /// Envelope of the enclosed message; message/rfc822 only.
    pub envelope: Option<Box<Envelope>>,
    /// Structure of the enclosed message; message/rfc822 only.
    pub body_structure: Option<Box<BodyStructure>>,
    /// Child parts; multipart only.
    pub parts: Vec<BodyStructure>,
    pub extended: bool,
    pub md5: Option<String>,
    pub disposition: Option<String>,
    pub language: Vec<String>,
    pub location: Vec<String>,
}

impl BodyStructure {
    pub fn is_multipart(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case("multipart")
    }

    pub fn parse(fields: &[Field]) -> Result<Self, Error> {
        if fields.is_empty() {
            return Err(Error::Parse(
                "Body structure has no fields".to_owned(),
            ));
        }

        if matches!(fields[0], Field::List(_)) {
            Self::parse_multipart(fields)
        } else {
            Self::parse_single_part(fields)
        }
    }

    fn parse_multipart(fields: &[Field]) -> Result<Self, Error> {
        let mut bs = BodyStructure {
            mime_type: "multipart".to_owned(),
            ..BodyStructure::default()
        };

        let mut ix = 0;
        while let Some(Field::List(part)) = fields.get(ix) {
            bs.parts.push(Self::parse(part)?);
            ix += 1;
        }

        bs.mime_sub_type = fields
            .get(ix)
            .ok_or_else(|| {
                Error::Parse("Multipart body has no subtype".to_owned())
            })?
            .to_text()?;
        ix += 1;

        if let Some(f) = fields.get(ix) {
            bs.extended = true;
            bs.params = param_list(f)?;
            ix += 1;
        }
        bs.parse_disposition_language_location(fields, ix)?;

        Ok(bs)
    }

    fn parse_single_part(fields: &[Field]) -> Result<Self, Error> {
        if fields.len() < 7 {
            return Err(Error::Parse(
                "Body structure has too few fields".to_owned(),
            ));
        }

        let mut bs = BodyStructure {
            mime_type: fields[0].to_text()?,
            mime_sub_type: fields[1].to_text()?,
            params: param_list(&fields[2])?,
            id: nstring(&fields[3]),
            description: nstring(&fields[4]),
            encoding: fields[5].to_text()?,
            size: fields[6].as_number()?,
            ..BodyStructure::default()
        };

        let mut ix = 7;
        if bs.mime_type.eq_ignore_ascii_case("message")
            && bs.mime_sub_type.eq_ignore_ascii_case("rfc822")
            && fields.len() >= 10
        {
            bs.envelope = Some(Box::new(Envelope::parse(
                fields[7].as_list().ok_or_else(|| {
                    Error::Parse("Expected an envelope list".to_owned())
                })?,
            )?));
            bs.body_structure = Some(Box::new(Self::parse(
                fields[8].as_list().ok_or_else(|| {
                    Error::Parse("Expected a body list".to_owned())
                })?,
            )?));
            bs.lines = fields[9].as_number()?;
            ix = 10;
        } else if bs.mime_type.eq_ignore_ascii_case("text")
            && fields.len() > 7
        {
            bs.lines = fields[7].as_number()?;
            ix = 8;
        }

        if let Some(f) = fields.get(ix) {
            bs.extended = true;
            bs.md5 = nstring(f);
            ix += 1;
        }
        bs.parse_disposition_language_location(fields, ix)?;

        Ok(bs)
    }

    fn parse_disposition_language_location(
        &mut self,
        fields: &[Field],
        mut ix: usize,
    ) -> Result<(), Error> {
        if let Some(f) = fields.get(ix) {
            self.extended = true;
            self.disposition = disposition(f);
            ix += 1;
        }
        if let Some(f) = fields.get(ix) {
            self.language = string_or_list(f)?;
            ix += 1;
        }
        if let Some(f) = fields.get(ix) {
            self.location = string_or_list(f)?;
        }
        Ok(())
    }

    pub fn format(&self) -> Vec<Field> {
        if self.is_multipart() {
            self.format_multipart()
        } else {
            self.format_single_part()
        }
    }

    fn format_multipart(&self) -> Vec<Field> {
        let mut fields: Vec<Field> = self
            .parts
            .iter()
            .map(|p| Field::List(p.format()))
            .collect();
        fields.push(Field::String(self.mime_sub_type.clone()));

        if self.extended {
            fields.push(Field::List(format_param_list(&self.params)));
            fields.push(nstring_field(&self.disposition));
            fields.push(string_list_field(&self.language));
            fields.push(string_list_field(&self.location));
        }

        fields
    }

    fn format_single_part(&self) -> Vec<Field> {
        let mut fields = vec![
            Field::String(self.mime_type.clone()),
            Field::String(self.mime_sub_type.clone()),
            Field::List(format_param_list(&self.params)),
            nstring_field(&self.id),
            nstring_field(&self.description),
            Field::String(self.encoding.clone()),
            Field::from(self.size),
        ];

        if let (Some(envelope), Some(body)) =
            (&self.envelope, &self.body_structure)
        {
            fields.push(Field::List(envelope.format()));
            fields.push(Field::List(body.format()));
            fields.push(Field::from(self.lines));
        } else if self.mime_type.eq_ignore_ascii_case("text") {
            fields.push(Field::from(self.lines));
        }

        if self.extended {
            fields.push(nstring_field(&self.md5));
            fields.push(nstring_field(&self.disposition));
            fields.push(string_list_field(&self.language));
            fields.push(string_list_field(&self.location));
        }

        fields
    }
}

fn param_list(field: &Field) -> Result<BTreeMap<String, String>, Error> {
    match *field {
        Field::Nil => Ok(BTreeMap::new()),
        Field::List(ref fields) => parse_param_list(fields),
        ref f => Err(Error::Parse(format!(
            "Expected a parameter list, got {:?}",
            f
        ))),
    }
}

/// The content disposition is properly a `(type params)` list, but the model
/// keeps only the type; a bare string is also accepted.
fn disposition(field: &Field) -> Option<String> {
    match *field {
        Field::List(ref fields) => {
            fields.first().and_then(|f| f.as_str()).map(str::to_owned)
        },
        ref f => f.as_str().map(str::to_owned),
    }
}

fn string_or_list(field: &Field) -> Result<Vec<String>, Error> {
    match *field {
        Field::Nil => Ok(Vec::new()),
        Field::List(ref fields) => {
            fields.iter().map(Field::to_text).collect()
        },
        ref f => Ok(vec![f.to_text()?]),
    }
}

fn string_list_field(strings: &[String]) -> Field {
    Field::List(
        strings
            .iter()
            .map(|s| Field::String(s.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn list(fields: Vec<Field>) -> Field {
        Field::List(fields)
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|&(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    fn vectors() -> Vec<(Vec<Field>, BodyStructure)> {
        vec![
            (
                vec![
                    Field::from("image"),
                    Field::from("jpeg"),
                    list(vec![]),
                    Field::from("<foo4%25foo1@bar.net>"),
                    Field::from("A picture of cat"),
                    Field::from("base64"),
                    Field::from("4242"),
                ],
                BodyStructure {
                    mime_type: "image".to_owned(),
                    mime_sub_type: "jpeg".to_owned(),
                    id: Some("<foo4%25foo1@bar.net>".to_owned()),
                    description: Some("A picture of cat".to_owned()),
                    encoding: "base64".to_owned(),
                    size: 4242,
                    ..BodyStructure::default()
                },
            ),
            (
                vec![
                    Field::from("text"),
                    Field::from("plain"),
                    list(vec![
                        Field::from("charset"),
                        Field::from("utf-8"),
                    ]),
                    Field::Nil,
                    Field::Nil,
                    Field::from("us-ascii"),
                    Field::from("42"),
                    Field::from("2"),
                ],
                BodyStructure {
                    mime_type: "text".to_owned(),
                    mime_sub_type: "plain".to_owned(),
                    params: params(&[("charset", "utf-8")]),
                    encoding: "us-ascii".to_owned(),
                    size: 42,
                    lines: 2,
                    ..BodyStructure::default()
                },
            ),
            (
                vec![
                    Field::from("message"),
                    Field::from("rfc822"),
                    list(vec![]),
                    Field::Nil,
                    Field::Nil,
                    Field::from("us-ascii"),
                    Field::from("42"),
                    list(Envelope::default().format()),
                    list(BodyStructure::default().format()),
                    Field::from("67"),
                ],
                BodyStructure {
                    mime_type: "message".to_owned(),
                    mime_sub_type: "rfc822".to_owned(),
                    encoding: "us-ascii".to_owned(),
                    size: 42,
                    lines: 67,
                    envelope: Some(Box::new(Envelope::default())),
                    body_structure: Some(Box::new(BodyStructure {
                        size: 0,
                        ..BodyStructure::default()
                    })),
                    ..BodyStructure::default()
                },
            ),
            (
                vec![
                    Field::from("application"),
                    Field::from("pdf"),
                    list(vec![]),
                    Field::Nil,
                    Field::Nil,
                    Field::from("base64"),
                    Field::from("4242"),
                    Field::from("e0323a9039add2978bf5b49550572c7c"),
                    Field::from("attachment"),
                    list(vec![Field::from("en-US")]),
                    list(vec![]),
                ],
                BodyStructure {
                    mime_type: "application".to_owned(),
                    mime_sub_type: "pdf".to_owned(),
                    encoding: "base64".to_owned(),
                    size: 4242,
                    extended: true,
                    md5: Some(
                        "e0323a9039add2978bf5b49550572c7c".to_owned(),
                    ),
                    disposition: Some("attachment".to_owned()),
                    language: vec!["en-US".to_owned()],
                    location: vec![],
                    ..BodyStructure::default()
                },
            ),
            (
                vec![
                    list(vec![
                        Field::from("text"),
                        Field::from("plain"),
                        list(vec![]),
                        Field::Nil,
                        Field::Nil,
                        Field::from("us-ascii"),
                        Field::from("87"),
                        Field::from("22"),
                    ]),
                    list(vec![
                        Field::from("text"),
                        Field::from("html"),
                        list(vec![]),
                        Field::Nil,
                        Field::Nil,
                        Field::from("us-ascii"),
                        Field::from("106"),
                        Field::from("36"),
                    ]),
                    Field::from("alternative"),
                ],
                BodyStructure {
                    mime_type: "multipart".to_owned(),
                    mime_sub_type: "alternative".to_owned(),
                    parts: vec![
                        BodyStructure {
                            mime_type: "text".to_owned(),
                            mime_sub_type: "plain".to_owned(),
                            encoding: "us-ascii".to_owned(),
                            size: 87,
                            lines: 22,
                            ..BodyStructure::default()
                        },
                        BodyStructure {
                            mime_type: "text".to_owned(),
                            mime_sub_type: "html".to_owned(),
                            encoding: "us-ascii".to_owned(),
                            size: 106,
                            lines: 36,
                            ..BodyStructure::default()
                        },
                    ],
                    ..BodyStructure::default()
                },
            ),
            (
                vec![
                    list(vec![
                        Field::from("text"),
                        Field::from("plain"),
                        list(vec![]),
                        Field::Nil,
                        Field::Nil,
                        Field::from("us-ascii"),
                        Field::from("87"),
                        Field::from("22"),
                    ]),
                    Field::from("alternative"),
                    list(vec![
                        Field::from("hello"),
                        Field::from("world"),
                    ]),
                    Field::from("inline"),
                    list(vec![Field::from("en-US")]),
                    list(vec![]),
                ],
                BodyStructure {
                    mime_type: "multipart".to_owned(),
                    mime_sub_type: "alternative".to_owned(),
                    params: params(&[("hello", "world")]),
                    parts: vec![BodyStructure {
                        mime_type: "text".to_owned(),
                        mime_sub_type: "plain".to_owned(),
                        encoding: "us-ascii".to_owned(),
                        size: 87,
                        lines: 22,
                        ..BodyStructure::default()
                    }],
                    extended: true,
                    disposition: Some("inline".to_owned()),
                    language: vec!["en-US".to_owned()],
                    location: vec![],
                    ..BodyStructure::default()
                },
            ),
        ]
    }

    #[test]
    fn parse_vectors() {
        for (i, (fields, expected)) in vectors().into_iter().enumerate() {
            let parsed = BodyStructure::parse(&fields)
                .unwrap_or_else(|e| panic!("Cannot parse #{}: {}", i, e));
            assert_eq!(expected, parsed, "vector #{}", i);
        }
    }

    #[test]
    fn format_vectors() {
        for (i, (fields, bs)) in vectors().into_iter().enumerate() {
            assert_eq!(fields, bs.format(), "vector #{}", i);
        }
    }

    #[test]
    fn disposition_list_form_accepted() {
        let fields = vec![
            Field::from("application"),
            Field::from("pdf"),
            Field::List(vec![]),
            Field::Nil,
            Field::Nil,
            Field::from("base64"),
            Field::from("10"),
            Field::Nil,
            Field::List(vec![
                Field::from("attachment"),
                Field::List(vec![
                    Field::from("filename"),
                    Field::from("x.pdf"),
                ]),
            ]),
        ];
        let parsed = BodyStructure::parse(&fields).unwrap();
        assert_eq!(Some("attachment".to_owned()), parsed.disposition);
        assert!(parsed.extended);
    }
}
