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

//! Handlers valid in any connection state.

use super::conn::{Conn, ConnState};
use super::Handler;
use crate::proto::{CapabilityResp, StatusResp, StatusType};
use crate::support::error::Error;
use crate::wire::Field;

pub(super) fn no_arguments(
    name: &str,
    args: &[Field],
) -> Result<(), Error> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(Error::Parse(format!("{} takes no arguments", name)))
    }
}

pub struct Capability;

impl Handler for Capability {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        no_arguments("CAPABILITY", &args)
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        conn.write_res(&mut CapabilityResp {
            caps: conn.capabilities(),
        })
    }
}

pub struct Noop;

impl Handler for Noop {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        no_arguments("NOOP", &args)
    }

    fn handle(&mut self, _conn: &mut Conn) -> Result<(), Error> {
        // Pending unsolicited updates, if any, are delivered by the
        // fan-out on its own schedule; NOOP itself has nothing to do.
        Ok(())
    }
}

pub struct Logout;

impl Handler for Logout {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        no_arguments("LOGOUT", &args)
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        conn.write_res(&mut StatusResp::untagged(
            StatusType::Bye,
            "Logging out",
        ))?;
        conn.unselect();
        conn.state = ConnState::LOGOUT;
        Ok(())
    }
}
