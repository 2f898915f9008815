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

//! SEARCH criteria: the full RFC 3501 section 6.4.4 key set.
//!
//! A `SearchCriteria` is a conjunction: a message matches when every
//! populated key matches. `OR` and `NOT` nest further criteria. A
//! parenthesised key group on the wire is parsed into a nested criteria
//! and merged into the enclosing one, which preserves its meaning since
//! grouping is itself conjunction.

use chrono::NaiveDate;

use super::date::{format_search_date, parse_search_date};
use super::seqset::SeqSet;
use crate::support::error::Error;
use crate::wire::Field;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchCriteria {
    pub seq_set: Option<SeqSet>,
    pub uid: Option<SeqSet>,

    pub answered: bool,
    pub deleted: bool,
    pub draft: bool,
    pub flagged: bool,
    pub new: bool,
    pub old: bool,
    pub recent: bool,
    pub seen: bool,
    pub unanswered: bool,
    pub undeleted: bool,
    pub undraft: bool,
    pub unflagged: bool,
    pub unseen: bool,

    pub keyword: Vec<String>,
    pub unkeyword: Vec<String>,

    pub before: Option<NaiveDate>,
    pub on: Option<NaiveDate>,
    pub since: Option<NaiveDate>,
    pub sent_before: Option<NaiveDate>,
    pub sent_on: Option<NaiveDate>,
    pub sent_since: Option<NaiveDate>,

    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Vec<String>,
    pub body: Vec<String>,
    pub text: Vec<String>,
    pub header: Vec<(String, String)>,

    pub larger: Option<u32>,
    pub smaller: Option<u32>,

    pub not: Vec<SearchCriteria>,
    pub or: Vec<(SearchCriteria, SearchCriteria)>,
}

impl SearchCriteria {
    pub fn parse(fields: &[Field]) -> Result<Self, Error> {
        let mut criteria = SearchCriteria::default();
        let mut ix = 0;
        while ix < fields.len() {
            ix = criteria.parse_key(fields, ix)?;
        }
        Ok(criteria)
    }

    /// Parse the single key starting at `fields[ix]` into `self`, returning
    /// the index just past it.
    fn parse_key(
        &mut self,
        fields: &[Field],
        ix: usize,
    ) -> Result<usize, Error> {
        // A parenthesised group is a conjunction, same as the top level
        if let Field::List(ref group) = fields[ix] {
            self.merge(Self::parse(group)?);
            return Ok(ix + 1);
        }

        let key = fields[ix].to_text()?.to_ascii_uppercase();
        match key.as_str() {
            "ALL" => Ok(ix + 1),
            "ANSWERED" => {
                self.answered = true;
                Ok(ix + 1)
            },
            "DELETED" => {
                self.deleted = true;
                Ok(ix + 1)
            },
            "DRAFT" => {
                self.draft = true;
                Ok(ix + 1)
            },
            "FLAGGED" => {
                self.flagged = true;
                Ok(ix + 1)
            },
            "NEW" => {
                self.new = true;
                Ok(ix + 1)
            },
            "OLD" => {
                self.old = true;
                Ok(ix + 1)
            },
            "RECENT" => {
                self.recent = true;
                Ok(ix + 1)
            },
            "SEEN" => {
                self.seen = true;
                Ok(ix + 1)
            },
            "UNANSWERED" => {
                self.unanswered = true;
                Ok(ix + 1)
            },
            "UNDELETED" => {
                self.undeleted = true;
                Ok(ix + 1)
            },
            "UNDRAFT" => {
                self.undraft = true;
                Ok(ix + 1)
            },
            "UNFLAGGED" => {
                self.unflagged = true;
                Ok(ix + 1)
            },
            "UNSEEN" => {
                self.unseen = true;
                Ok(ix + 1)
            },

            "KEYWORD" => {
                self.keyword.push(value(fields, ix)?);
                Ok(ix + 2)
            },
            "UNKEYWORD" => {
                self.unkeyword.push(value(fields, ix)?);
                Ok(ix + 2)
            },

            "BEFORE" => {
                self.before = Some(date_value(fields, ix)?);
                Ok(ix + 2)
            },
            "ON" => {
                self.on = Some(date_value(fields, ix)?);
                Ok(ix + 2)
            },
            "SINCE" => {
                self.since = Some(date_value(fields, ix)?);
                Ok(ix + 2)
            },
            "SENTBEFORE" => {
                self.sent_before = Some(date_value(fields, ix)?);
                Ok(ix + 2)
            },
            "SENTON" => {
                self.sent_on = Some(date_value(fields, ix)?);
                Ok(ix + 2)
            },
            "SENTSINCE" => {
                self.sent_since = Some(date_value(fields, ix)?);
                Ok(ix + 2)
            },

            "FROM" => {
                self.from.push(value(fields, ix)?);
                Ok(ix + 2)
            },
            "TO" => {
                self.to.push(value(fields, ix)?);
                Ok(ix + 2)
            },
            "CC" => {
                self.cc.push(value(fields, ix)?);
                Ok(ix + 2)
            },
            "BCC" => {
                self.bcc.push(value(fields, ix)?);
                Ok(ix + 2)
            },
            "SUBJECT" => {
                self.subject.push(value(fields, ix)?);
                Ok(ix + 2)
            },
            "BODY" => {
                self.body.push(value(fields, ix)?);
                Ok(ix + 2)
            },
            "TEXT" => {
                self.text.push(value(fields, ix)?);
                Ok(ix + 2)
            },
            "HEADER" => {
                let name = value(fields, ix)?;
                let content = value(fields, ix + 1)?;
                self.header.push((name, content));
                Ok(ix + 3)
            },

            "LARGER" => {
                self.larger = Some(number_value(fields, ix)?);
                Ok(ix + 2)
            },
            "SMALLER" => {
                self.smaller = Some(number_value(fields, ix)?);
                Ok(ix + 2)
            },

            "UID" => {
                let set = value(fields, ix)?.parse()?;
                self.uid = merge_seq_sets(self.uid.take(), set);
                Ok(ix + 2)
            },

            "NOT" => {
                if ix + 1 >= fields.len() {
                    return Err(Error::Parse(
                        "NOT without a search key".to_owned(),
                    ));
                }
                let mut sub = SearchCriteria::default();
                let next = sub.parse_key(fields, ix + 1)?;
                self.not.push(sub);
                Ok(next)
            },

            "OR" => {
                if ix + 2 >= fields.len() {
                    return Err(Error::Parse(
                        "OR needs two search keys".to_owned(),
                    ));
                }
                let mut lhs = SearchCriteria::default();
                let mid = lhs.parse_key(fields, ix + 1)?;
                if mid >= fields.len() {
                    return Err(Error::Parse(
                        "OR needs two search keys".to_owned(),
                    ));
                }
                let mut rhs = SearchCriteria::default();
                let next = rhs.parse_key(fields, mid)?;
                self.or.push((lhs, rhs));
                Ok(next)
            },

            // A bare sequence set is itself a search key
            _ if key
                .bytes()
                .all(|b| b.is_ascii_digit() || b == b':' || b == b',' || b == b'*') =>
            {
                let set = key.parse()?;
                self.seq_set = merge_seq_sets(self.seq_set.take(), set);
                Ok(ix + 1)
            },

            _ => Err(Error::Parse(format!("Unknown search key: {}", key))),
        }
    }

    /// Fold another conjunction into this one.
    fn merge(&mut self, other: SearchCriteria) {
        if let Some(set) = other.seq_set {
            self.seq_set = merge_seq_sets(self.seq_set.take(), set);
        }
        if let Some(set) = other.uid {
            self.uid = merge_seq_sets(self.uid.take(), set);
        }

        self.answered |= other.answered;
        self.deleted |= other.deleted;
        self.draft |= other.draft;
        self.flagged |= other.flagged;
        self.new |= other.new;
        self.old |= other.old;
        self.recent |= other.recent;
        self.seen |= other.seen;
        self.unanswered |= other.unanswered;
        self.undeleted |= other.undeleted;
        self.undraft |= other.undraft;
        self.unflagged |= other.unflagged;
        self.unseen |= other.unseen;

        self.keyword.extend(other.keyword);
        self.unkeyword.extend(other.unkeyword);

        self.before = other.before.or(self.before.take());
        self.on = other.on.or(self.on.take());
        self.since = other.since.or(self.since.take());
        self.sent_before = other.sent_before.or(self.sent_before.take());
        self.sent_on = other.sent_on.or(self.sent_on.take());
        self.sent_since = other.sent_since.or(self.sent_since.take());

        self.from.extend(other.from);
        self.to.extend(other.to);
        self.cc.extend(other.cc);
        self.bcc.extend(other.bcc);
        self.subject.extend(other.subject);
        self.body.extend(other.body);
        self.text.extend(other.text);
        self.header.extend(other.header);

        self.larger = other.larger.or(self.larger.take());
        self.smaller = other.smaller.or(self.smaller.take());

        self.not.extend(other.not);
        self.or.extend(other.or);
    }

    pub fn format(&self) -> Vec<Field> {
        let mut fields = Vec::new();

        if let Some(ref set) = self.seq_set {
            fields.push(Field::String(set.to_string()));
        }
        if let Some(ref set) = self.uid {
            fields.push(Field::from("UID"));
            fields.push(Field::String(set.to_string()));
        }

        for (flag, name) in [
            (self.answered, "ANSWERED"),
            (self.deleted, "DELETED"),
            (self.draft, "DRAFT"),
            (self.flagged, "FLAGGED"),
            (self.new, "NEW"),
            (self.old, "OLD"),
            (self.recent, "RECENT"),
            (self.seen, "SEEN"),
            (self.unanswered, "UNANSWERED"),
            (self.undeleted, "UNDELETED"),
            (self.undraft, "UNDRAFT"),
            (self.unflagged, "UNFLAGGED"),
            (self.unseen, "UNSEEN"),
        ] {
            if flag {
                fields.push(Field::from(name));
            }
        }

        for kw in &self.keyword {
            fields.push(Field::from("KEYWORD"));
            fields.push(Field::String(kw.clone()));
        }
        for kw in &self.unkeyword {
            fields.push(Field::from("UNKEYWORD"));
            fields.push(Field::String(kw.clone()));
        }

        for (date, name) in [
            (&self.before, "BEFORE"),
            (&self.on, "ON"),
            (&self.since, "SINCE"),
            (&self.sent_before, "SENTBEFORE"),
            (&self.sent_on, "SENTON"),
            (&self.sent_since, "SENTSINCE"),
        ] {
            if let Some(ref d) = *date {
                fields.push(Field::from(name));
                fields.push(Field::String(format_search_date(d)));
            }
        }

        for (values, name) in [
            (&self.from, "FROM"),
            (&self.to, "TO"),
            (&self.cc, "CC"),
            (&self.bcc, "BCC"),
            (&self.subject, "SUBJECT"),
            (&self.body, "BODY"),
            (&self.text, "TEXT"),
        ] {
            for v in values.iter() {
                fields.push(Field::from(name));
                fields.push(Field::String(v.clone()));
            }
        }

        for (name, content) in &self.header {
            fields.push(Field::from("HEADER"));
            fields.push(Field::String(name.clone()));
            fields.push(Field::String(content.clone()));
        }

        if let Some(n) = self.larger {
            fields.push(Field::from("LARGER"));
            fields.push(Field::from(n));
        }
        if let Some(n) = self.smaller {
            fields.push(Field::from("SMALLER"));
            fields.push(Field::from(n));
        }

        for sub in &self.not {
            fields.push(Field::from("NOT"));
            fields.push(Field::List(sub.format()));
        }
        for (lhs, rhs) in &self.or {
            fields.push(Field::from("OR"));
            fields.push(Field::List(lhs.format()));
            fields.push(Field::List(rhs.format()));
        }

        fields
    }
}

fn value(fields: &[Field], key_ix: usize) -> Result<String, Error> {
    fields
        .get(key_ix + 1)
        .ok_or_else(|| {
            Error::Parse(format!(
                "Search key {:?} is missing its argument",
                fields[key_ix]
            ))
        })?
        .to_text()
}

fn date_value(fields: &[Field], key_ix: usize) -> Result<NaiveDate, Error> {
    parse_search_date(&value(fields, key_ix)?)
}

fn number_value(fields: &[Field], key_ix: usize) -> Result<u32, Error> {
    fields
        .get(key_ix + 1)
        .ok_or_else(|| {
            Error::Parse(format!(
                "Search key {:?} is missing its argument",
                fields[key_ix]
            ))
        })?
        .as_number()
}

fn merge_seq_sets(existing: Option<SeqSet>, new: SeqSet) -> Option<SeqSet> {
    match existing {
        None => Some(new),
        Some(mut set) => {
            set.0.extend(new.0);
            Some(set)
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::parse_fields;

    fn parse(s: &str) -> SearchCriteria {
        SearchCriteria::parse(&parse_fields(s.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn parse_flags_and_sets() {
        let c = parse("DELETED");
        assert!(c.deleted);
        assert_eq!(SearchCriteria { deleted: true, ..Default::default() }, c);

        let c = parse("1:5,8 UNSEEN UID 100:*");
        assert_eq!(Some("1:5,8".parse().unwrap()), c.seq_set);
        assert!(c.unseen);
        assert_eq!(Some("100:*".parse().unwrap()), c.uid);
    }

    #[test]
    fn parse_valued_keys() {
        let c = parse(
            "FROM foo@example.org SUBJECT \"hello world\" LARGER 1024 \
             HEADER Content-Type text/plain SENTSINCE 1-Feb-1994",
        );
        assert_eq!(vec!["foo@example.org"], c.from);
        assert_eq!(vec!["hello world"], c.subject);
        assert_eq!(Some(1024), c.larger);
        assert_eq!(
            vec![("Content-Type".to_owned(), "text/plain".to_owned())],
            c.header
        );
        assert_eq!(
            Some(parse_search_date("1-Feb-1994").unwrap()),
            c.sent_since
        );
    }

    #[test]
    fn parse_not_and_or() {
        let c = parse("NOT SEEN OR FLAGGED DELETED");
        assert_eq!(1, c.not.len());
        assert!(c.not[0].seen);
        assert_eq!(1, c.or.len());
        assert!(c.or[0].0.flagged);
        assert!(c.or[0].1.deleted);

        // NOT applies to exactly one following key
        let c = parse("NOT KEYWORD gone DRAFT");
        assert_eq!(vec!["gone"], c.not[0].keyword);
        assert!(c.draft);
    }

    #[test]
    fn parse_groups_merge() {
        let c = parse("(SEEN LARGER 10) (SMALLER 100)");
        assert!(c.seen);
        assert_eq!(Some(10), c.larger);
        assert_eq!(Some(100), c.smaller);
    }

    #[test]
    fn parse_rejects_nonsense() {
        assert!(SearchCriteria::parse(
            &parse_fields(b"WAT").unwrap()
        )
        .is_err());
        assert!(SearchCriteria::parse(
            &parse_fields(b"LARGER").unwrap()
        )
        .is_err());
        assert!(SearchCriteria::parse(
            &parse_fields(b"OR SEEN").unwrap()
        )
        .is_err());
    }

    #[test]
    fn round_trip() {
        let original = parse(
            "2:4 UNDELETED KEYWORD custom BEFORE 21-Nov-1997 \
             FROM nsa.gov LARGER 42 NOT SEEN OR FLAGGED DELETED",
        );
        let reparsed =
            SearchCriteria::parse(&original.format()).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn format_empty_is_empty() {
        assert!(SearchCriteria::default().format().is_empty());
    }
}
