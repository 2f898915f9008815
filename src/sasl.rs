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

//! Server-side SASL mechanisms for AUTHENTICATE.
//!
//! A mechanism runs the challenge/response interchange and, when it
//! completes, yields credentials for the backend to verify. Only PLAIN
//! (RFC 4616) ships with the engine; hosts can register additional
//! mechanisms on the server.

use crate::support::error::Error;

/// The outcome of one mechanism step.
#[derive(Debug)]
pub enum SaslStep {
    /// Send this challenge and wait for another client response.
    Challenge(Vec<u8>),
    /// The interchange finished; log these credentials in.
    Success { username: String, password: String },
}

pub trait SaslServer: Send {
    /// Advance the interchange. `response` is `None` on the initial step,
    /// before any client response has been received.
    fn step(&mut self, response: Option<&[u8]>) -> Result<SaslStep, Error>;
}

/// The PLAIN mechanism: one response of `authzid NUL authcid NUL passwd`.
#[derive(Default)]
pub struct Plain;

impl SaslServer for Plain {
    fn step(&mut self, response: Option<&[u8]>) -> Result<SaslStep, Error> {
        let response = match response {
            // Empty initial challenge, then the client sends everything
            None => return Ok(SaslStep::Challenge(Vec::new())),
            Some(r) => r,
        };

        let mut parts = response.split(|&b| b == 0);
        let (authzid, authcid, passwd) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(z), Some(c), Some(p), None) => (z, c, p),
                _ => {
                    return Err(Error::Parse(
                        "Malformed PLAIN response".to_owned(),
                    ))
                },
            };

        // Impersonation is not supported
        if !authzid.is_empty() && authzid != authcid {
            return Err(Error::AuthenticationFailed);
        }

        let username = String::from_utf8(authcid.to_vec())
            .map_err(|_| Error::AuthenticationFailed)?;
        let password = String::from_utf8(passwd.to_vec())
            .map_err(|_| Error::AuthenticationFailed)?;

        Ok(SaslStep::Success { username, password })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_interchange() {
        let mut plain = Plain;
        assert_matches!(Ok(SaslStep::Challenge(_)), plain.step(None));

        match plain.step(Some(b"\0user\0hunter2")).unwrap() {
            SaslStep::Success { username, password } => {
                assert_eq!("user", username);
                assert_eq!("hunter2", password);
            },
            SaslStep::Challenge(_) => panic!("Expected success"),
        }
    }

    #[test]
    fn plain_accepts_matching_authzid() {
        match Plain.step(Some(b"user\0user\0pw")).unwrap() {
            SaslStep::Success { username, .. } => {
                assert_eq!("user", username)
            },
            SaslStep::Challenge(_) => panic!("Expected success"),
        }
    }

    #[test]
    fn plain_rejects_impersonation() {
        assert_matches!(
            Err(Error::AuthenticationFailed),
            Plain.step(Some(b"root\0user\0pw"))
        );
    }

    #[test]
    fn plain_rejects_malformed() {
        assert_matches!(
            Err(Error::Parse(_)),
            Plain.step(Some(b"no nuls here"))
        );
        assert_matches!(
            Err(Error::Parse(_)),
            Plain.step(Some(b"a\0b\0c\0d"))
        );
    }
}
