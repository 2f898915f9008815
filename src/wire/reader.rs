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

//! The reading half of the token codec.
//!
//! Reading happens in two stages. First, a "logical line" is assembled: a
//! physical CRLF-terminated line, plus, for every `{N}` literal introducer
//! at the end of a fragment, exactly N payload bytes and the continuation
//! of the command on the following physical line. Literal payloads are
//! consumed by byte count and are never re-scanned for line endings or
//! token syntax. Second, the assembled buffer is tokenised into [`Field`]s.
//!
//! A server must acknowledge each literal introducer with a `+`
//! continuation before the client sends the payload; the continuation hook
//! makes that the caller's decision, since only the connection owns the
//! write half.

use std::io::{self, BufRead, Read};
use std::str;

use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_while, take_while1},
    combinator::map,
    multi::separated_list0,
    sequence::delimited,
    IResult,
};
use regex::bytes::Regex;

use super::fields::Field;
use crate::support::error::Error;

/// Maximum length of a single physical command line, and of the text parts
/// of a logical line.
pub const MAX_CMDLINE: usize = 65536;
/// Default bound on a single literal. Large enough for any sane APPEND.
pub const DEFAULT_MAX_LITERAL: u32 = 64 * 1024 * 1024;

lazy_static! {
    static ref LITERAL_AT_EOL: Regex = Regex::new(r"\{([0-9]+)\}$").unwrap();
}

/// Called with the length of each literal after its introducer has been
/// read and before its payload is consumed.
pub type ContinuationHook = Box<dyn FnMut(u32) -> io::Result<()> + Send>;

pub struct TokenReader<R> {
    read: R,
    max_literal: u32,
    continuation: Option<ContinuationHook>,
    trace: Option<String>,
}

impl<R: BufRead> TokenReader<R> {
    pub fn new(read: R) -> Self {
        TokenReader {
            read,
            max_literal: DEFAULT_MAX_LITERAL,
            continuation: None,
            trace: None,
        }
    }

    pub fn set_continuation(&mut self, hook: ContinuationHook) {
        self.continuation = Some(hook);
    }

    pub fn set_max_literal(&mut self, max: u32) {
        self.max_literal = max;
    }

    /// Enable or disable wire tracing with the given log prefix.
    pub fn set_trace(&mut self, prefix: Option<String>) {
        self.trace = prefix;
    }

    /// Read one physical line, stripping the line ending.
    ///
    /// Both DOS newlines and sane newlines (THE HORROR!) are accepted.
    pub fn read_raw_line(&mut self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        self.read_physical_line(&mut buf)?;
        Ok(buf)
    }

    /// Assemble one logical line, with literal payloads inlined after their
    /// `{N}` introducers.
    pub fn read_logical_line(&mut self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        loop {
            let nread = self.read_physical_line(&mut buf)?;
            let tail = &buf[buf.len() - nread..];
            let length = LITERAL_AT_EOL.captures(tail).and_then(|c| {
                c.get(1).and_then(|m| {
                    str::from_utf8(m.as_bytes()).ok()?.parse::<u32>().ok()
                })
            });

            let length = match length {
                Some(l) => l,
                // No trailing literal, the logical line is complete
                None => break,
            };

            if length > self.max_literal {
                return Err(Error::LiteralTooLarge);
            }

            if let Some(ref mut hook) = self.continuation {
                hook(length)?;
            }

            buf.extend_from_slice(b"\r\n");
            let nread = self
                .read
                .by_ref()
                .take(length.into())
                .read_to_end(&mut buf)?;
            if nread != length as usize {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF reading literal",
                )));
            }

            if let Some(ref prefix) = self.trace {
                log::debug!("{} << <literal, {} bytes>", prefix, length);
            }
        }

        Ok(buf)
    }

    /// Assemble and tokenise one logical line.
    pub fn read_line(&mut self) -> Result<Vec<Field>, Error> {
        let line = self.read_logical_line()?;
        parse_fields(&line)
    }

    /// Read one physical line, appending it to `buf` with the line ending
    /// removed. Returns the number of bytes appended.
    ///
    /// If the maximum line length is exceeded, the rest of the physical
    /// line is discarded before `LineTooLong` is returned, so the stream
    /// stays synchronised.
    fn read_physical_line(
        &mut self,
        buf: &mut Vec<u8>,
    ) -> Result<usize, Error> {
        let start = buf.len();
        let nread = self
            .read
            .by_ref()
            .take((MAX_CMDLINE + 2) as u64)
            .read_until(b'\n', buf)?;

        if 0 == nread {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached before reading full line",
            )));
        }

        if !buf.ends_with(b"\n") {
            if nread == MAX_CMDLINE + 2 {
                buf.truncate(start);
                self.discard_to_eol()?;
                return Err(Error::LineTooLong);
            }
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached before end of line",
            )));
        }

        buf.pop();
        if buf.ends_with(b"\r") {
            buf.pop();
        }

        if let Some(ref prefix) = self.trace {
            log::debug!(
                "{} << {}",
                prefix,
                String::from_utf8_lossy(&buf[start..])
            );
        }

        Ok(buf.len() - start)
    }

    fn discard_to_eol(&mut self) -> Result<(), Error> {
        loop {
            let available = self.read.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.read.consume(pos + 1);
                    return Ok(());
                },
                None => {
                    let n = available.len();
                    self.read.consume(n);
                },
            }
        }
    }
}

/// Tokenise a complete logical line into fields.
pub fn parse_fields(line: &[u8]) -> Result<Vec<Field>, Error> {
    if line.is_empty() {
        return Ok(Vec::new());
    }

    let result: IResult<&[u8], Vec<Field>> =
        separated_list0(tag(b" "), field)(line);
    match result {
        Ok((b"", fields)) => Ok(fields),
        Ok((rest, _)) => Err(Error::Parse(format!(
            "Unparsable input at: {}",
            String::from_utf8_lossy(&rest[..rest.len().min(32)])
        ))),
        Err(e) => Err(Error::Parse(e.to_string())),
    }
}

fn field(i: &[u8]) -> IResult<&[u8], Field> {
    alt((literal, quoted, list, atom))(i)
}

fn list(i: &[u8]) -> IResult<&[u8], Field> {
    map(
        delimited(tag(b"("), separated_list0(tag(b" "), field), tag(b")")),
        Field::List,
    )(i)
}

fn literal(i: &[u8]) -> IResult<&[u8], Field> {
    let (i, digits) = delimited(
        tag(b"{"),
        take_while1(|b: u8| b.is_ascii_digit()),
        tag(b"}\r\n"),
    )(i)?;
    let length = str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| {
            nom::Err::Failure(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Digit,
            ))
        })?;
    // Exactly `length` bytes, whatever they contain
    let (i, data) = take(length as usize)(i)?;
    Ok((i, Field::Literal(data.to_vec())))
}

fn quoted(i: &[u8]) -> IResult<&[u8], Field> {
    let (mut rest, _) = tag(b"\"")(i)?;
    let mut content = Vec::new();
    loop {
        match rest.split_first() {
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    rest,
                    nom::error::ErrorKind::Tag,
                )))
            },
            Some((&b'"', after)) => {
                return Ok((
                    after,
                    Field::String(
                        String::from_utf8_lossy(&content).into_owned(),
                    ),
                ))
            },
            Some((&b'\\', after)) => match after.split_first() {
                Some((&c, after)) => {
                    content.push(c);
                    rest = after;
                },
                None => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        rest,
                        nom::error::ErrorKind::Escaped,
                    )))
                },
            },
            Some((&c, after)) => {
                content.push(c);
                rest = after;
            },
        }
    }
}

fn is_atom_char(b: u8) -> bool {
    // Deliberately lenient: everything printable except the characters that
    // introduce other token forms. Backslash stays in for flag atoms.
    !matches!(b, 0..=32 | 127 | b'(' | b')' | b'{' | b'"' | b'[' | b']')
}

fn atom(i: &[u8]) -> IResult<&[u8], Field> {
    let (rest, first) = take_while1(is_atom_char)(i)?;
    let mut content = first.to_vec();
    let mut rest = rest;

    // FETCH section syntax makes `BODY[HEADER.FIELDS (From To)]<0.512>`
    // a single token despite the spaces and parentheses inside the
    // brackets. Sections do not nest, so scanning to the first `]` is
    // sufficient.
    if let Some(&b'[') = rest.first() {
        let close = rest.iter().position(|&b| b == b']').ok_or_else(|| {
            nom::Err::Failure(nom::error::Error::new(
                rest,
                nom::error::ErrorKind::TakeUntil,
            ))
        })?;
        content.extend_from_slice(&rest[..=close]);
        rest = &rest[close + 1..];

        let (after, more) = take_while(is_atom_char)(rest)?;
        content.extend_from_slice(more);
        rest = after;
    }

    let s = String::from_utf8_lossy(&content).into_owned();
    let field = if s.eq_ignore_ascii_case("NIL") {
        Field::Nil
    } else {
        Field::String(s)
    };
    Ok((rest, field))
}

#[cfg(test)]
mod test {
    use std::io::BufReader;
    use std::sync::{Arc, Mutex};

    use super::*;

    fn parse(line: &str) -> Vec<Field> {
        parse_fields(line.as_bytes()).unwrap()
    }

    #[test]
    fn tokenise_simple() {
        assert_eq!(
            vec![
                Field::from("a1"),
                Field::from("LOGIN"),
                Field::from("user"),
                Field::from("hunter2"),
            ],
            parse("a1 LOGIN user \"hunter2\"")
        );
    }

    #[test]
    fn tokenise_nil_and_lists() {
        assert_eq!(
            vec![
                Field::Nil,
                Field::List(vec![]),
                Field::List(vec![
                    Field::from("a"),
                    Field::Nil,
                    Field::List(vec![Field::from("b")]),
                ]),
            ],
            parse("NIL () (a NIL (b))")
        );
        // NIL detection is case-insensitive
        assert_eq!(vec![Field::Nil], parse("nil"));
    }

    #[test]
    fn tokenise_quoted_escapes() {
        assert_eq!(
            vec![Field::from("say \"hi\" \\ bye")],
            parse(r#""say \"hi\" \\ bye""#)
        );
    }

    #[test]
    fn tokenise_flags_and_patterns() {
        assert_eq!(
            vec![
                Field::from("\\Seen"),
                Field::from("\\*"),
                Field::from("INBOX/%"),
                Field::from("1:3,7,10:*"),
            ],
            parse("\\Seen \\* INBOX/% 1:3,7,10:*")
        );
    }

    #[test]
    fn tokenise_sections_as_single_atoms() {
        assert_eq!(
            vec![
                Field::from("BODY.PEEK[HEADER.FIELDS (From To)]<0.512>"),
                Field::from("FLAGS"),
            ],
            parse("BODY.PEEK[HEADER.FIELDS (From To)]<0.512> FLAGS")
        );
    }

    #[test]
    fn literal_consumes_exactly_n_bytes() {
        // The payload contains ')', '"', CRLF, and even a literal
        // introducer; none of it may be reinterpreted as tokens.
        let payload = b"a\r\n){3} \"b";
        let line = format!(
            "a1 APPEND saved {{{}}}\r\n{} more",
            payload.len(),
            String::from_utf8_lossy(payload)
        );
        let fields = parse_fields(line.as_bytes()).unwrap();
        assert_eq!(
            vec![
                Field::from("a1"),
                Field::from("APPEND"),
                Field::from("saved"),
                Field::Literal(payload.to_vec()),
                Field::from("more"),
            ],
            fields
        );
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert_matches!(
            Err(Error::Parse(_)),
            parse_fields(b"a1 (unterminated")
        );
    }

    #[test]
    fn logical_line_assembly_with_continuations() {
        let input: &[u8] = b"a1 LOGIN {3}\r\nfoo {4}\r\nb\xFFar\r\na2 NOOP\r\n";
        let mut reader = TokenReader::new(BufReader::new(input));

        let continuations = Arc::new(Mutex::new(Vec::<u32>::new()));
        let recorded = Arc::clone(&continuations);
        reader.set_continuation(Box::new(move |n| {
            recorded.lock().unwrap().push(n);
            Ok(())
        }));

        let fields = reader.read_line().unwrap();
        assert_eq!(
            vec![
                Field::from("a1"),
                Field::from("LOGIN"),
                Field::Literal(b"foo".to_vec()),
                Field::Literal(b"b\xFFar".to_vec()),
            ],
            fields
        );
        assert_eq!(vec![3, 4], *continuations.lock().unwrap());

        // The next line is read independently
        assert_eq!(
            vec![Field::from("a2"), Field::from("NOOP")],
            reader.read_line().unwrap()
        );
    }

    #[test]
    fn oversized_literal_rejected() {
        let input: &[u8] = b"a1 APPEND x {999}\r\n";
        let mut reader = TokenReader::new(BufReader::new(input));
        reader.set_max_literal(10);
        assert_matches!(
            Err(Error::LiteralTooLarge),
            reader.read_logical_line()
        );
    }

    #[test]
    fn eof_mid_literal_is_an_error() {
        let input: &[u8] = b"a1 APPEND x {10}\r\nabc";
        let mut reader = TokenReader::new(BufReader::new(input));
        assert_matches!(Err(Error::Io(_)), reader.read_logical_line());
    }

    #[test]
    fn bare_lf_accepted() {
        let input: &[u8] = b"a1 NOOP\n";
        let mut reader = TokenReader::new(BufReader::new(input));
        assert_eq!(
            vec![Field::from("a1"), Field::from("NOOP")],
            reader.read_line().unwrap()
        );
    }
}
