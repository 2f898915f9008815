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

use std::io;

use thiserror::Error;

/// The one error type used throughout the engine.
///
/// The wording of the fixed-message variants is part of the protocol surface:
/// it is what clients see in `NO`/`BAD` responses, so it must not be changed
/// casually.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No mailbox selected")]
    NoMailboxSelected,
    #[error("Mailbox opened in read-only mode")]
    MailboxReadOnly,
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Already authenticated")]
    AlreadyAuthenticated,
    #[error("Already logged out")]
    AlreadyLoggedOut,
    #[error("Authentication disabled on insecure connections")]
    InsecureAuth,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("No such authentication mechanism")]
    NxAuthMechanism,
    #[error("Command unsupported with UID")]
    UidUnsupported,
    #[error("Unknown command")]
    UnknownCommand,
    #[error("STARTTLS is not available")]
    TlsUnavailable,
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
    #[error("Command line too long")]
    LineTooLong,
    #[error("Literal too large")]
    LiteralTooLarge,
    #[error("Parse error: {0}")]
    Parse(String),
    /// An error reported by the mailbox backend. The message is relayed to
    /// the client verbatim in a `NO` response.
    #[error("{0}")]
    Backend(String),
    /// A `NO` status received from the peer.
    #[error("{0}")]
    No(String),
    /// A `BAD` status received from the peer.
    #[error("{0}")]
    Bad(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ssl(#[from] openssl::error::ErrorStack),
}

impl Error {
    /// Whether this error reflects a malformed command rather than a command
    /// that was understood but failed.
    ///
    /// Malformed commands get a `BAD` status; everything else gets `NO`.
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            Error::Parse(_)
                | Error::UnknownCommand
                | Error::LineTooLong
                | Error::LiteralTooLarge
        )
    }

    /// Whether this error indicates the peer went away and the connection
    /// cannot be used further.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
