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

//! Wiremap is an embeddable IMAP4rev1 (RFC 3501) protocol engine.
//!
//! It provides the pieces of the protocol that are independent of any
//! particular mail store: the wire token codec, the message data model, the
//! command/response framing, the per-connection state machine, a server that
//! dispatches commands against a pluggable mailbox backend and fans
//! backend-originated updates out to connected clients, and an AST-level
//! client suitable for tests and simple tooling.
//!
//! The crate deliberately does not implement a mail store, SASL mechanisms
//! beyond PLAIN, or any IMAP extension. Hosts supply a [`backend::Backend`]
//! and get a full RFC 3501 server in return.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod backend;
pub mod client;
pub mod model;
pub mod proto;
pub mod sasl;
pub mod server;
pub mod support;
pub mod wire;

pub use crate::client::Client;
pub use crate::server::{ConnState, Server};
pub use crate::support::error::Error;
pub use crate::wire::Field;
