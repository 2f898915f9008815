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

//! Helper traits which restore non-deprecated panicking methods (with 'x'
//! appended to disambiguate) for things that are obviously infallible, since
//! Chrono decided to make everything super noisy instead.
//!
//! Mainly used by tests and the in-memory backend, where the inputs are
//! constants.

use chrono::prelude::*;

pub trait FixedOffsetX {
    fn zero() -> Self;
    fn eastx(secs: i32) -> Self;
    fn westx(secs: i32) -> Self;
}

impl FixedOffsetX for FixedOffset {
    fn zero() -> Self {
        Self::eastx(0)
    }

    fn eastx(secs: i32) -> Self {
        Self::east_opt(secs).unwrap()
    }

    fn westx(secs: i32) -> Self {
        Self::west_opt(secs).unwrap()
    }
}

pub trait OffsetX {
    type DateTime;

    fn ymd_hmsx(
        &self,
        y: i32,
        m: u32,
        d: u32,
        h: u32,
        min: u32,
        s: u32,
    ) -> Self::DateTime;
}

impl<T: chrono::TimeZone + chrono::Offset> OffsetX for T {
    type DateTime = DateTime<T>;

    fn ymd_hmsx(
        &self,
        y: i32,
        m: u32,
        d: u32,
        h: u32,
        min: u32,
        s: u32,
    ) -> Self::DateTime {
        self.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }
}
