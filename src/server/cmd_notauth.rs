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

//! Handlers for entering the Authenticated state, plus STARTTLS.

use std::sync::atomic::Ordering;

use super::conn::{Conn, ConnState};
use super::Handler;
use crate::proto::StatusResp;
use crate::sasl::SaslStep;
use crate::support::error::Error;
use crate::wire::Field;

/// STARTTLS is dispatched by the connection loop rather than the registry:
/// its tagged OK must be flushed in plaintext before the handshake, and
/// only the loop may swap the connection's streams.
pub(super) fn handle_starttls(
    conn: &mut Conn,
    tag: &str,
) -> Result<(), Error> {
    if conn.tls_active() {
        return respond(
            conn,
            StatusResp::bad(tag, "Already using TLS"),
        );
    }
    if ConnState::NOT_AUTHENTICATED != conn.state {
        return respond(
            conn,
            StatusResp::no(tag, Error::AlreadyAuthenticated.to_string()),
        );
    }
    if conn.server.tls.read().unwrap().is_none() {
        return respond(
            conn,
            StatusResp::no(tag, Error::TlsUnavailable.to_string()),
        );
    }

    conn.write_res(&mut StatusResp::ok(tag, "Begin TLS negotiation now"))?;

    // A handshake failure leaves the stream in no usable state; give up
    // on the connection entirely.
    conn.upgrade_tls()
}

fn respond(conn: &Conn, mut status: StatusResp) -> Result<(), Error> {
    conn.write_res(&mut status)
}

fn check_auth_allowed(conn: &Conn) -> Result<(), Error> {
    if ConnState::NOT_AUTHENTICATED != conn.state {
        return Err(Error::AlreadyAuthenticated);
    }
    if !conn.tls_active()
        && !conn
            .server
            .allow_insecure_auth
            .load(Ordering::Relaxed)
    {
        return Err(Error::InsecureAuth);
    }
    Ok(())
}

#[derive(Default)]
pub struct Login {
    username: String,
    password: String,
}

impl Handler for Login {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        match args.as_slice() {
            [username, password] => {
                self.username = username.to_text()?;
                self.password = password.to_text()?;
                Ok(())
            },
            _ => Err(Error::Parse(
                "LOGIN expects a username and a password".to_owned(),
            )),
        }
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        check_auth_allowed(conn)?;

        let user = conn
            .server
            .backend
            .login(&self.username, &self.password)?;
        conn.login(user);
        Ok(())
    }
}

#[derive(Default)]
pub struct Authenticate {
    mechanism: String,
}

impl Handler for Authenticate {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error> {
        match args.as_slice() {
            [mechanism] => {
                self.mechanism =
                    mechanism.to_text()?.to_ascii_uppercase();
                Ok(())
            },
            _ => Err(Error::Parse(
                "AUTHENTICATE expects a mechanism name".to_owned(),
            )),
        }
    }

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error> {
        check_auth_allowed(conn)?;

        let mechanism = {
            let auths = conn.server.auths.read().unwrap();
            auths.get(&self.mechanism).map(|factory| factory())
        };
        let mut mechanism = mechanism.ok_or(Error::NxAuthMechanism)?;

        // The interchange runs inline on this connection's own thread, so
        // no command can interleave with it.
        let mut response: Option<Vec<u8>> = None;
        loop {
            match mechanism.step(response.as_deref())? {
                SaslStep::Challenge(challenge) => {
                    conn.write_raw(
                        format!("+ {}\r\n", base64::encode(&challenge))
                            .as_bytes(),
                    )?;

                    let line = conn.read_raw_line()?;
                    if b"*" == line.as_slice() {
                        return Err(Error::AuthenticationFailed);
                    }
                    response = Some(base64::decode(&line).map_err(
                        |_| {
                            Error::Parse(
                                "Invalid base64 in authentication response"
                                    .to_owned(),
                            )
                        },
                    )?);
                },
                SaslStep::Success { username, password } => {
                    let user =
                        conn.server.backend.login(&username, &password)?;
                    conn.login(user);
                    return Ok(());
                },
            }
        }
    }
}
