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

//! The IMAP token codec.
//!
//! IMAP's wire format is a line-oriented ASCII stream with embedded
//! length-prefixed binary literals. The reader here assembles "logical
//! lines" (a physical line plus any literals it introduces) and tokenises
//! them into [`Field`] values; the writer is the inverse, picking the
//! shortest safe encoding for each value.

mod fields;
pub mod lex;
pub mod reader;

pub use self::fields::{
    format_param_list, format_string_list, parse_param_list,
    parse_string_list, Field,
};
pub use self::lex::{LexWriter, Writer};
pub use self::reader::{parse_fields, TokenReader, MAX_CMDLINE};
