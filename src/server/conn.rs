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

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use log::debug;
use openssl::ssl::SslStream;

use super::ServerInner;
use crate::backend::{Mailbox, User};
use crate::proto::{Response, StatusResp, StatusType};
use crate::support::error::Error;
use crate::wire::{Field, TokenReader, Writer};

static TAGLINE: &str = concat!(
    "Up on the high wire (",
    env!("CARGO_PKG_NAME"),
    " ",
    env!("CARGO_PKG_VERSION"),
    " ready)"
);

bitflags! {
    /// Connection states, as a mask so that capabilities and commands can
    /// declare the set of states they apply to.
    pub struct ConnState: u8 {
        const NOT_AUTHENTICATED = 1 << 0;
        const AUTHENTICATED = 1 << 1;
        const SELECTED = 1 << 2;
        const LOGOUT = 1 << 3;

        /// Any state with a logged-in user.
        const AUTH = Self::AUTHENTICATED.bits | Self::SELECTED.bits;
        const ANY = Self::NOT_AUTHENTICATED.bits
            | Self::AUTHENTICATED.bits
            | Self::SELECTED.bits
            | Self::LOGOUT.bits;
    }
}

/// What the fan-out needs to know about a connection to decide whether an
/// update is for it.
#[derive(Default)]
pub(crate) struct ConnFilter {
    pub(crate) username: Option<String>,
    pub(crate) mailbox: Option<String>,
    /// Set by a silent STORE while the backend mutates flags, so the
    /// fan-out does not echo the resulting FETCH back at the originator.
    pub(crate) silent: bool,
}

/// The part of a connection shared with the server's fan-out.
///
/// The write half lives here: every path that emits bytes takes the lock
/// and flushes before releasing it.
pub(crate) struct ConnShared {
    pub(crate) id: u64,
    pub(crate) write: Mutex<Box<dyn Write + Send>>,
    pub(crate) filter: Mutex<ConnFilter>,
    pub(crate) closed: AtomicBool,
    pub(crate) tcp: Mutex<Option<TcpStream>>,
}

impl ConnShared {
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(ref tcp) = *self.tcp.lock().unwrap() {
            let _ = tcp.shutdown(Shutdown::Both);
        }
    }
}

/// One server-side connection.
pub struct Conn {
    pub(crate) server: Arc<ServerInner>,
    pub(crate) shared: Arc<ConnShared>,
    reader: TokenReader<Box<dyn BufRead + Send>>,
    pub state: ConnState,
    pub user: Option<Box<dyn User>>,
    pub mailbox: Option<Box<dyn Mailbox>>,
    pub mailbox_read_only: bool,
    tls_active: bool,
    debug: Arc<AtomicBool>,
    log_prefix: String,
}

impl Conn {
    pub(crate) fn new(
        server: Arc<ServerInner>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<Self, Error> {
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;
        Self::build(
            server,
            Box::new(BufReader::new(read_half)),
            Box::new(BufWriter::new(write_half)),
            Some(stream),
            peer,
            false,
        )
    }

    pub(crate) fn new_tls(
        server: Arc<ServerInner>,
        stream: SslStream<TcpStream>,
        peer: SocketAddr,
    ) -> Result<Self, Error> {
        let tcp = stream.get_ref().try_clone()?;
        let io = TlsIo(Arc::new(Mutex::new(stream)));
        Self::build(
            server,
            Box::new(BufReader::new(io.clone())),
            Box::new(BufWriter::new(io)),
            Some(tcp),
            peer,
            true,
        )
    }

    fn build(
        server: Arc<ServerInner>,
        read: Box<dyn BufRead + Send>,
        write: Box<dyn Write + Send>,
        tcp: Option<TcpStream>,
        peer: SocketAddr,
        tls_active: bool,
    ) -> Result<Self, Error> {
        let log_prefix = format!("imap:{}", peer);
        let debug = Arc::new(AtomicBool::new(
            server.debug.load(Ordering::Relaxed),
        ));

        let shared = Arc::new(ConnShared {
            id: server.next_conn_id(),
            write: Mutex::new(Box::new(TraceWriter {
                inner: write,
                enabled: Arc::clone(&debug),
                prefix: log_prefix.clone(),
                line: Vec::new(),
            })),
            filter: Mutex::new(ConnFilter::default()),
            closed: AtomicBool::new(false),
            tcp: Mutex::new(tcp),
        });

        let reader =
            make_reader(&server, &shared, read, &debug, &log_prefix);

        Ok(Conn {
            server,
            shared,
            reader,
            state: ConnState::NOT_AUTHENTICATED,
            user: None,
            mailbox: None,
            mailbox_read_only: false,
            tls_active,
            debug,
            log_prefix,
        })
    }

    pub fn log_prefix(&self) -> &str {
        &self.log_prefix
    }

    pub fn tls_active(&self) -> bool {
        self.tls_active
    }

    /// Tap the reader and writer, logging all wire traffic at debug level.
    pub fn set_debug(&mut self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
        self.reader.set_trace(if enabled {
            Some(self.log_prefix.clone())
        } else {
            None
        });
    }

    /// The capability list for this connection's current state.
    pub fn capabilities(&self) -> Vec<String> {
        self.server.capabilities(self.state, self.tls_active)
    }

    /// Send the greeting and enter Not Authenticated state.
    pub(crate) fn greet(&mut self) -> Result<(), Error> {
        self.state = ConnState::NOT_AUTHENTICATED;
        let caps = self
            .capabilities()
            .into_iter()
            .map(Field::String)
            .collect();
        self.write_res(
            &mut StatusResp::untagged(StatusType::Ok, TAGLINE)
                .with_code("CAPABILITY", caps),
        )
    }

    pub fn read_line(&mut self) -> Result<Vec<Field>, Error> {
        self.reader.read_line()
    }

    /// Read one physical line, for SASL interchanges.
    pub fn read_raw_line(&mut self) -> Result<Vec<u8>, Error> {
        self.reader.read_raw_line()
    }

    /// Serialise a response under the write lock and flush it.
    pub fn write_res(&self, res: &mut dyn Response) -> Result<(), Error> {
        let mut write = self.shared.write.lock().unwrap();
        let result = {
            let mut w = Writer::new(&mut **write as &mut dyn Write);
            res.write_to(&mut w)
        };
        let flushed = write.flush();
        result?;
        flushed?;
        Ok(())
    }

    /// Write raw bytes (continuation requests) under the write lock.
    pub fn write_raw(&self, bytes: &[u8]) -> Result<(), Error> {
        let mut write = self.shared.write.lock().unwrap();
        write.write_all(bytes)?;
        write.flush()?;
        Ok(())
    }

    /// Bind an authenticated user and move to Authenticated state.
    pub fn login(&mut self, user: Box<dyn User>) {
        self.shared.filter.lock().unwrap().username =
            Some(user.username().to_owned());
        self.user = Some(user);
        self.state = ConnState::AUTHENTICATED;
    }

    /// Bind a selected mailbox and move to Selected state.
    pub fn select(&mut self, mailbox: Box<dyn Mailbox>, read_only: bool) {
        self.shared.filter.lock().unwrap().mailbox =
            Some(mailbox.name().to_owned());
        self.mailbox = Some(mailbox);
        self.mailbox_read_only = read_only;
        self.state = ConnState::SELECTED;
    }

    /// Drop any selected mailbox, returning to Authenticated state.
    pub fn unselect(&mut self) {
        self.mailbox = None;
        self.mailbox_read_only = false;
        self.shared.filter.lock().unwrap().mailbox = None;
        if ConnState::SELECTED == self.state {
            self.state = ConnState::AUTHENTICATED;
        }
    }

    /// Set or clear the FETCH-suppression flag the fan-out honours.
    pub fn set_silent(&self, silent: bool) {
        self.shared.filter.lock().unwrap().silent = silent;
    }

    /// Replace the plaintext streams with TLS over the same socket.
    ///
    /// The caller must already have flushed the OK for STARTTLS; any
    /// pipelined plaintext in the old read buffer is discarded, which is
    /// fine since a conforming client waits for the OK.
    pub(crate) fn upgrade_tls(&mut self) -> Result<(), Error> {
        let acceptor = self
            .server
            .tls
            .read()
            .unwrap()
            .clone()
            .ok_or(Error::TlsUnavailable)?;
        let tcp = self
            .shared
            .tcp
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::TlsUnavailable)?;

        let stream = acceptor
            .accept(tcp)
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;
        let tcp = stream.get_ref().try_clone()?;
        let io = TlsIo(Arc::new(Mutex::new(stream)));

        *self.shared.tcp.lock().unwrap() = Some(tcp);
        *self.shared.write.lock().unwrap() =
            Box::new(TraceWriter {
                inner: Box::new(BufWriter::new(io.clone())),
                enabled: Arc::clone(&self.debug),
                prefix: self.log_prefix.clone(),
                line: Vec::new(),
            });
        self.reader = make_reader(
            &self.server,
            &self.shared,
            Box::new(BufReader::new(io)),
            &self.debug,
            &self.log_prefix,
        );
        self.tls_active = true;
        Ok(())
    }

    /// Forcibly terminate the connection.
    pub fn close(&self) {
        self.shared.close();
    }
}

fn make_reader(
    server: &Arc<ServerInner>,
    shared: &Arc<ConnShared>,
    read: Box<dyn BufRead + Send>,
    debug: &Arc<AtomicBool>,
    log_prefix: &str,
) -> TokenReader<Box<dyn BufRead + Send>> {
    let mut reader = TokenReader::new(read);
    reader.set_max_literal(server.max_literal_size());
    if debug.load(Ordering::Relaxed) {
        reader.set_trace(Some(log_prefix.to_owned()));
    }

    // Command literals must be acknowledged before the client sends the
    // payload.
    let continuation_shared = Arc::clone(shared);
    reader.set_continuation(Box::new(move |_len| {
        let mut write = continuation_shared.write.lock().unwrap();
        write.write_all(b"+ Ready\r\n")?;
        write.flush()
    }));

    reader
}

/// Splits a TLS stream into cloneable read/write halves.
///
/// Unlike a plain `TcpStream`, an `SslStream` is a single state machine, so
/// the halves share it under a mutex; a blocked read holds the lock until
/// bytes arrive.
#[derive(Clone)]
pub(crate) struct TlsIo(Arc<Mutex<SslStream<TcpStream>>>);

impl Read for TlsIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().unwrap().read(buf)
    }
}

impl Write for TlsIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

/// Write-side debug tap: passes bytes through and logs complete lines.
struct TraceWriter {
    inner: Box<dyn Write + Send>,
    enabled: Arc<AtomicBool>,
    prefix: String,
    line: Vec<u8>,
}

impl Write for TraceWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.enabled.load(Ordering::Relaxed) {
            for &byte in buf {
                if b'\n' == byte {
                    debug!(
                        "{} >> {}",
                        self.prefix,
                        String::from_utf8_lossy(&self.line)
                            .trim_end_matches('\r')
                    );
                    self.line.clear();
                } else if self.line.len() < 512 {
                    self.line.push(byte);
                }
            }
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
