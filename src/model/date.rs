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

//! IMAP's two date syntaxes.
//!
//! `date-time` (`21-Nov-1997 09:55:06 -0600`) appears in envelopes,
//! INTERNALDATE and APPEND; `date` (`21-Nov-1997`) appears in SEARCH keys.
//! RFC 3501 allows the day to be space-padded on the wire; we parse both
//! forms and always format without padding.

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::support::error::Error;

pub fn parse_date(s: &str) -> Result<DateTime<FixedOffset>, Error> {
    DateTime::parse_from_str(s.trim(), "%d-%b-%Y %H:%M:%S %z")
        .map_err(|e| Error::Parse(format!("Malformed date-time: {}", e)))
}

pub fn format_date(date: &DateTime<FixedOffset>) -> String {
    date.format("%-d-%b-%Y %H:%M:%S %z").to_string()
}

pub fn parse_search_date(s: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(s.trim(), "%d-%b-%Y")
        .map_err(|e| Error::Parse(format!("Malformed date: {}", e)))
}

pub fn format_search_date(date: &NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

#[cfg(test)]
mod test {
    use chrono::prelude::*;

    use super::*;
    use crate::support::chronox::*;

    #[test]
    fn parse_date_time() {
        let parsed = parse_date("21-Nov-1997 09:55:06 -0600").unwrap();
        assert_eq!(
            FixedOffset::westx(6 * 3600).ymd_hmsx(1997, 11, 21, 9, 55, 6),
            parsed
        );
        assert_eq!(FixedOffset::westx(6 * 3600), *parsed.offset());
    }

    #[test]
    fn parse_date_time_space_padded_day() {
        let parsed = parse_date(" 2-Jan-2006 15:04:05 -0700").unwrap();
        assert_eq!(
            FixedOffset::westx(7 * 3600).ymd_hmsx(2006, 1, 2, 15, 4, 5),
            parsed
        );
    }

    #[test]
    fn format_date_time() {
        assert_eq!(
            "10-Nov-2009 23:00:00 -0600",
            format_date(
                &FixedOffset::westx(6 * 3600).ymd_hmsx(2009, 11, 10, 23, 0, 0)
            )
        );
        assert_eq!(
            "2-Jan-2006 15:04:05 +0000",
            format_date(
                &FixedOffset::zero().ymd_hmsx(2006, 1, 2, 15, 4, 5)
            )
        );
    }

    #[test]
    fn search_dates() {
        let date = NaiveDate::from_ymd_opt(1994, 2, 1).unwrap();
        assert_eq!(date, parse_search_date("1-Feb-1994").unwrap());
        assert_eq!("1-Feb-1994", format_search_date(&date));
        assert!(parse_search_date("Feb-1994").is_err());
    }
}
