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

//! Sequence sets: the `1:3,7,10:*` syntax used to address messages by
//! sequence number or UID.
//!
//! `*` means "the greatest number in use" and is only resolvable against a
//! particular mailbox snapshot, so it is carried symbolically (as 0) and
//! substituted at evaluation time.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::support::error::Error;

/// One range in a sequence set. `start`/`stop` of 0 represent `*`.
/// A single number is a range with `start == stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seq {
    pub start: u32,
    pub stop: u32,
}

impl Seq {
    pub fn new(start: u32, stop: u32) -> Self {
        Seq { start, stop }
    }

    fn contains(&self, n: u32, max: u32) -> bool {
        let start = resolve(self.start, max);
        let stop = resolve(self.stop, max);
        n >= start.min(stop) && n <= start.max(stop)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeqSet(pub Vec<Seq>);

impl SeqSet {
    /// A set holding a single number.
    pub fn single(n: u32) -> Self {
        SeqSet(vec![Seq::new(n, n)])
    }

    /// The set `1:*`, i.e. every message.
    pub fn all() -> Self {
        SeqSet(vec![Seq::new(1, 0)])
    }

    /// Whether `n` is in the set, with `*` resolving to `max`.
    pub fn contains(&self, n: u32, max: u32) -> bool {
        self.0.iter().any(|seq| seq.contains(n, max))
    }

    /// All members of the set that are in `1..=max`, ascending, without
    /// duplicates.
    pub fn expand(&self, max: u32) -> Vec<u32> {
        let mut members = BTreeSet::new();
        for seq in &self.0 {
            let start = resolve(seq.start, max);
            let stop = resolve(seq.stop, max);
            let (lo, hi) = (start.min(stop), start.max(stop));
            for n in lo.max(1)..=hi.min(max) {
                members.insert(n);
            }
        }
        members.into_iter().collect()
    }
}

fn resolve(n: u32, max: u32) -> u32 {
    if 0 == n {
        max
    } else {
        n
    }
}

impl FromStr for SeqSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let bad = || Error::Parse(format!("Invalid sequence set: {}", s));

        let mut parts = Vec::new();
        for item in s.split(',') {
            let (start, stop) = match item.split_once(':') {
                Some((start, stop)) => {
                    (seq_number(start)?, seq_number(stop)?)
                },
                None => {
                    let n = seq_number(item)?;
                    (n, n)
                },
            };
            parts.push(Seq::new(start, stop));
        }

        if parts.is_empty() {
            return Err(bad());
        }
        Ok(SeqSet(parts))
    }
}

fn seq_number(s: &str) -> Result<u32, Error> {
    if "*" == s {
        return Ok(0);
    }

    match s.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Parse(format!(
            "Invalid sequence number: {}",
            s
        ))),
    }
}

impl fmt::Display for SeqSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seq) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if seq.start == seq.stop {
                write_seq_number(f, seq.start)?;
            } else {
                write_seq_number(f, seq.start)?;
                write!(f, ":")?;
                write_seq_number(f, seq.stop)?;
            }
        }
        Ok(())
    }
}

fn write_seq_number(f: &mut fmt::Formatter<'_>, n: u32) -> fmt::Result {
    if 0 == n {
        write!(f, "*")
    } else {
        write!(f, "{}", n)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn set(s: &str) -> SeqSet {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        for s in ["1", "1:3", "1:3,7,10:*", "*", "*:4", "1:*"] {
            assert_eq!(s, set(s).to_string(), "for {}", s);
        }
    }

    #[test]
    fn parse_rejects_nonsense() {
        for s in ["", "0", "1:", ":2", "a", "1,,2", "-1"] {
            assert!(s.parse::<SeqSet>().is_err(), "accepted {:?}", s);
        }
    }

    #[test]
    fn contains() {
        let s = set("1:3,7,10:*");
        assert!(s.contains(1, 12));
        assert!(s.contains(3, 12));
        assert!(!s.contains(4, 12));
        assert!(s.contains(7, 12));
        assert!(s.contains(10, 12));
        assert!(s.contains(12, 12));
        assert!(!s.contains(13, 12));

        // A backwards range still covers the span
        assert!(set("*:4").contains(5, 6));
        assert!(!set("*:4").contains(3, 6));
    }

    #[test]
    fn expand() {
        assert_eq!(vec![1, 2, 3, 7, 10, 11, 12], set("1:3,7,10:*").expand(12));
        assert_eq!(vec![1, 2], set("1:5").expand(2));
        assert_eq!(vec![2], set("2,2,2").expand(5));
        assert_eq!(vec![3], set("10:*").expand(3));
        assert!(set("4:9").expand(0).is_empty());
    }
}
