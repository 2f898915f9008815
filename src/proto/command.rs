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

use std::io::{self, Write};

use crate::support::error::Error;
use crate::wire::{Field, Writer};

/// One client command: `tag SP name (SP arg)* CRLF`.
///
/// The tag is an opaque client-chosen identifier; the server copies it
/// verbatim onto the final status response. The name is normalised to
/// upper case; the arguments keep whatever form the codec produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Command {
    pub tag: String,
    pub name: String,
    pub args: Vec<Field>,
}

impl Command {
    pub fn new(
        tag: impl Into<String>,
        name: impl Into<String>,
        args: Vec<Field>,
    ) -> Self {
        Command {
            tag: tag.into(),
            name: name.into().to_ascii_uppercase(),
            args,
        }
    }

    pub fn parse(fields: &[Field]) -> Result<Self, Error> {
        let tag = fields
            .first()
            .and_then(Field::as_str)
            .ok_or_else(|| Error::Parse("Missing command tag".to_owned()))?;
        if tag.is_empty() || "*" == tag || "+" == tag {
            return Err(Error::Parse(format!("Invalid command tag: {}", tag)));
        }

        let name = fields
            .get(1)
            .and_then(Field::as_str)
            .ok_or_else(|| Error::Parse("Missing command name".to_owned()))?;

        Ok(Command {
            tag: tag.to_owned(),
            name: name.to_ascii_uppercase(),
            args: fields[2..].to_vec(),
        })
    }

    /// Write the complete command line, including the CRLF.
    pub fn write_to<W: Write>(&self, w: &mut Writer<W>) -> io::Result<()> {
        w.verbatim(&self.tag)?;
        w.verbatim(" ")?;
        w.verbatim(&self.name)?;
        for arg in &self.args {
            w.verbatim(" ")?;
            w.write_field(arg)?;
        }
        w.end_line()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::parse_fields;

    fn roundtrip(line: &str) -> Command {
        Command::parse(&parse_fields(line.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn parse_simple() {
        let cmd = roundtrip("a1 noop");
        assert_eq!("a1", cmd.tag);
        assert_eq!("NOOP", cmd.name);
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn parse_with_args() {
        let cmd = roundtrip("a2 LOGIN \"user\" {7}\r\nhunter2");
        assert_eq!("a2", cmd.tag);
        assert_eq!("LOGIN", cmd.name);
        assert_eq!(
            vec![
                Field::from("user"),
                Field::Literal(b"hunter2".to_vec())
            ],
            cmd.args
        );
    }

    #[test]
    fn parse_rejects_bad_tags() {
        assert_matches!(Err(Error::Parse(_)), Command::parse(&[]));
        assert_matches!(
            Err(Error::Parse(_)),
            Command::parse(&parse_fields(b"* NOOP").unwrap())
        );
        assert_matches!(
            Err(Error::Parse(_)),
            Command::parse(&parse_fields(b"+ NOOP").unwrap())
        );
        assert_matches!(
            Err(Error::Parse(_)),
            Command::parse(&parse_fields(b"a1").unwrap())
        );
    }

    #[test]
    fn write_line() {
        let cmd = Command::new(
            "a3",
            "select",
            vec![Field::from("folder with space")],
        );
        let mut w = Writer::new(Vec::<u8>::new());
        cmd.write_to(&mut w).unwrap();
        assert_eq!(
            "a3 SELECT \"folder with space\"\r\n",
            String::from_utf8(w.into_inner()).unwrap()
        );
    }
}
