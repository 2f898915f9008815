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

//! Utilities for *writing* values under IMAP's "lexical rules".
//!
//! The code here is primarily responsible for deciding which form to use to
//! encode strings (i.e. atom, quoted string, or literal).
//!
//! We're generally pretty conservative: given the choice between encoding a
//! string as an atom-like value or some other form, we only use an atom if
//! all characters are in the set `a-zA-Z0-9?=+/_.-` (or the string is a
//! backslash-prefixed flag) and the string is not "NIL". Given the choice
//! between a quoted string and a literal, we only choose the quoted string
//! if it contains no controls, backslashes, double quotes or 8-bit bytes,
//! and is less than 100 bytes long.

use std::io::{self, Write};

use super::fields::Field;

/// Low-level lexical writer.
///
/// Tracks the number of bytes written so that a client can discover where
/// literal payloads begin (it must stop there and wait for the server's
/// continuation before sending the payload).
#[derive(Debug)]
pub struct LexWriter<W> {
    writer: W,
    written: usize,
    literal_breaks: Option<Vec<usize>>,
}

impl<W: Write> LexWriter<W> {
    pub fn new(writer: W) -> Self {
        LexWriter {
            writer,
            written: 0,
            literal_breaks: None,
        }
    }

    /// Like `new`, but record the offset of every literal payload for
    /// continuation handling.
    pub fn with_literal_tracking(writer: W) -> Self {
        LexWriter {
            writer,
            written: 0,
            literal_breaks: Some(Vec::new()),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Byte offsets, in write order, at which literal payloads start.
    pub fn literal_breaks(&self) -> &[usize] {
        self.literal_breaks.as_deref().unwrap_or(&[])
    }

    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)?;
        self.written += bytes.len();
        Ok(())
    }

    pub fn verbatim(&mut self, s: &str) -> io::Result<()> {
        self.put(s.as_bytes())
    }

    pub fn verbatim_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.put(bytes)
    }

    pub fn nil(&mut self) -> io::Result<()> {
        self.verbatim("NIL")
    }

    pub fn number(&mut self, value: u32) -> io::Result<()> {
        self.put(value.to_string().as_bytes())
    }

    /// Write a string as an atom if possible, else as a quoted string or
    /// literal.
    pub fn astring(&mut self, s: &str) -> io::Result<()> {
        if is_conservative_atom(s) || is_flag_atom(s) || is_section_atom(s) {
            self.verbatim(s)
        } else {
            self.string(s)
        }
    }

    /// Write a string as a quoted string if possible, else as a literal.
    pub fn string(&mut self, s: &str) -> io::Result<()> {
        if is_quotable(s) {
            self.put(b"\"")?;
            self.put(s.as_bytes())?;
            self.put(b"\"")
        } else {
            self.literal(s.as_bytes())
        }
    }

    pub fn literal(&mut self, data: &[u8]) -> io::Result<()> {
        self.put(format!("{{{}}}\r\n", data.len()).as_bytes())?;
        if let Some(ref mut breaks) = self.literal_breaks {
            breaks.push(self.written);
        }
        self.put(data)
    }
}

fn is_conservative_atom(s: &str) -> bool {
    !"nil".eq_ignore_ascii_case(s)
        && !s.is_empty()
        && s.as_bytes().iter().copied().all(|b| {
            matches!(
                b,
                b'a'..=b'z'
                | b'A'..=b'Z'
                | b'0'..=b'9'
                | b'='
                | b'?'
                | b'/'
                | b'+'
                | b'_'
                | b'.'
                | b'-'
            )
        })
}

/// System flags (`\Seen`) and the `\*` permanent-flags wildcard are atoms
/// despite the backslash; quoting them would change their meaning.
fn is_flag_atom(s: &str) -> bool {
    match s.strip_prefix('\\') {
        Some("*") => true,
        Some(rest) => is_conservative_atom(rest),
        None => false,
    }
}

/// FETCH body section names (`BODY[HEADER.FIELDS (From To)]<0.512>`) are
/// single atoms despite the spaces and parentheses inside the brackets.
/// This mirrors the reader, which tokenises a bracket group as part of the
/// surrounding atom.
fn is_section_atom(s: &str) -> bool {
    let open = match s.find('[') {
        Some(ix) => ix,
        None => return false,
    };
    let close = match s.find(']') {
        Some(ix) if ix > open => ix,
        _ => return false,
    };

    let before = &s[..open];
    let inside = &s[open + 1..close];
    let after = &s[close + 1..];

    !before.is_empty()
        && before.bytes().all(|b| {
            matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.')
        })
        && inside
            .bytes()
            .all(|b| matches!(b, 0x20..=0x7E) && b != b']' && b != b'"')
        && after
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'.' | b'<' | b'>'))
}

fn is_quotable(s: &str) -> bool {
    s.len() < 100
        && s.as_bytes()
            .iter()
            .copied()
            .all(|b| !matches!(b, 0..=31 | 127..=255 | b'\\' | b'"'))
}

/// Field-level writer: the inverse of the token reader.
#[derive(Debug)]
pub struct Writer<W> {
    lex: LexWriter<W>,
}

impl<W: Write> Writer<W> {
    pub fn new(writer: W) -> Self {
        Writer {
            lex: LexWriter::new(writer),
        }
    }

    pub fn with_literal_tracking(writer: W) -> Self {
        Writer {
            lex: LexWriter::with_literal_tracking(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.lex.into_inner()
    }

    pub fn literal_breaks(&self) -> &[usize] {
        self.lex.literal_breaks()
    }

    /// Write raw protocol text: tags, response names, human-readable info.
    pub fn verbatim(&mut self, s: &str) -> io::Result<()> {
        self.lex.verbatim(s)
    }

    pub fn number(&mut self, value: u32) -> io::Result<()> {
        self.lex.number(value)
    }

    pub fn write_field(&mut self, field: &Field) -> io::Result<()> {
        match *field {
            Field::String(ref s) => self.lex.astring(s),
            Field::Literal(ref data) => self.lex.literal(data),
            Field::List(ref fields) => self.write_list(fields),
            Field::Nil => self.lex.nil(),
        }
    }

    /// Write fields separated by spaces.
    pub fn write_fields(&mut self, fields: &[Field]) -> io::Result<()> {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.lex.verbatim(" ")?;
            }
            self.write_field(field)?;
        }
        Ok(())
    }

    /// Write fields as a parenthesised list.
    pub fn write_list(&mut self, fields: &[Field]) -> io::Result<()> {
        self.lex.verbatim("(")?;
        self.write_fields(fields)?;
        self.lex.verbatim(")")
    }

    pub fn end_line(&mut self) -> io::Result<()> {
        self.lex.verbatim_bytes(b"\r\n")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn format(fields: &[Field]) -> String {
        let mut w = Writer::new(Vec::<u8>::new());
        w.write_fields(fields).unwrap();
        String::from_utf8(w.into_inner()).unwrap()
    }

    #[test]
    fn atom_quoted_literal_decisions() {
        assert_eq!("foo", format(&[Field::from("foo")]));
        assert_eq!("\"nil\"", format(&[Field::from("nil")]));
        assert_eq!("\"NIL\"", format(&[Field::from("NIL")]));
        assert_eq!("NIL", format(&[Field::Nil]));
        assert_eq!("\"\"", format(&[Field::from("")]));
        assert_eq!("\"foo bar\"", format(&[Field::from("foo bar")]));
        assert_eq!(
            "{8}\r\nfoo\\ bar",
            format(&[Field::from("foo\\ bar")])
        );
        assert_eq!("{5}\r\nf\u{f6}\u{f6}", format(&[Field::from("föö")]));
        assert_eq!("4242", format(&[Field::from(4242u32)]));
    }

    #[test]
    fn flags_stay_atoms() {
        assert_eq!("\\Seen", format(&[Field::from("\\Seen")]));
        assert_eq!("\\*", format(&[Field::from("\\*")]));
        assert_eq!(
            "(\\Seen \\Deleted custom)",
            format(&[Field::List(vec![
                Field::from("\\Seen"),
                Field::from("\\Deleted"),
                Field::from("custom"),
            ])])
        );
    }

    #[test]
    fn section_names_stay_atoms() {
        assert_eq!("BODY[]", format(&[Field::from("BODY[]")]));
        assert_eq!(
            "BODY.PEEK[HEADER.FIELDS (From To)]<0.512>",
            format(&[Field::from(
                "BODY.PEEK[HEADER.FIELDS (From To)]<0.512>"
            )])
        );
        // But not strings that merely mention brackets
        assert_eq!(
            "\"see [1] below\"",
            format(&[Field::from("see [1] below")])
        );
    }

    #[test]
    fn nested_lists() {
        assert_eq!(
            "(a (b ()) NIL)",
            format(&[Field::List(vec![
                Field::from("a"),
                Field::List(vec![Field::from("b"), Field::List(vec![])]),
                Field::Nil,
            ])])
        );
    }

    #[test]
    fn raw_literals_always_literal() {
        assert_eq!(
            "{3}\r\nfoo",
            format(&[Field::Literal(b"foo".to_vec())])
        );
    }

    #[test]
    fn literal_break_tracking() {
        let mut w = Writer::with_literal_tracking(Vec::<u8>::new());
        w.verbatim("a1 APPEND INBOX ").unwrap();
        w.write_field(&Field::Literal(b"hello".to_vec())).unwrap();
        w.end_line().unwrap();

        let breaks = w.literal_breaks().to_vec();
        let out = w.into_inner();
        assert_eq!(1, breaks.len());
        // The break points just past the {5}CRLF, at the payload itself
        assert_eq!(b"a1 APPEND INBOX {5}\r\n", &out[..breaks[0]]);
        assert_eq!(b"hello\r\n", &out[breaks[0]..]);
    }
}
