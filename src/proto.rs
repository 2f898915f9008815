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

//! Command and response framing on top of the token codec.

pub mod command;
pub mod response;

pub use self::command::Command;
pub use self::response::{
    parse_response_line, CapabilityResp, ExpungeResp, FetchResp, ListResp,
    RespLine, Response, SearchResp, SelectResp, StatusItemsResp, StatusResp,
    StatusType,
};
