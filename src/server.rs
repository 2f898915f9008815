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

//! The IMAP server: accepts connections, greets, reads commands, resolves
//! each command name through the registry, runs the handler, and emits the
//! tagged status. One OS thread drives each connection; a further thread
//! fans backend updates out to all of them.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use log::{info, warn};
use openssl::ssl::SslAcceptor;

use crate::backend::Backend;
use crate::proto::{Command, StatusResp, StatusType};
use crate::sasl::SaslServer;
use crate::support::error::Error;
use crate::wire::reader::DEFAULT_MAX_LITERAL;
use crate::wire::Field;

mod cmd_any;
mod cmd_auth;
mod cmd_notauth;
mod cmd_selected;
pub mod conn;
mod fanout;

#[cfg(test)]
mod integration_tests;

pub use self::conn::{Conn, ConnState};

/// A command handler.
///
/// One instance is created per command invocation: `parse` validates and
/// stores the arguments, then `handle` runs the command. Handlers for
/// commands with a UID variant also implement `handle_uid`.
pub trait Handler: Send {
    fn parse(&mut self, args: Vec<Field>) -> Result<(), Error>;

    fn handle(&mut self, conn: &mut Conn) -> Result<(), Error>;

    fn handle_uid(&mut self, _conn: &mut Conn) -> Result<(), Error> {
        Err(Error::UidUnsupported)
    }
}

pub type HandlerFactory = Box<dyn Fn() -> Box<dyn Handler> + Send + Sync>;
pub type SaslFactory =
    Box<dyn Fn() -> Box<dyn SaslServer> + Send + Sync>;

pub struct Server {
    inner: Arc<ServerInner>,
}

pub(crate) struct ServerInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) caps: RwLock<HashMap<String, ConnState>>,
    pub(crate) commands: RwLock<HashMap<String, HandlerFactory>>,
    pub(crate) auths: RwLock<HashMap<String, SaslFactory>>,
    pub(crate) conns: Mutex<Vec<Arc<conn::ConnShared>>>,
    pub(crate) tls: RwLock<Option<Arc<SslAcceptor>>>,
    pub(crate) allow_insecure_auth: AtomicBool,
    pub(crate) debug: AtomicBool,
    pub(crate) max_literal_size: AtomicU32,
    /// Whether the backend produces its own unsolicited updates; when set,
    /// STORE and EXPUNGE stop synthesising them.
    pub(crate) updating: AtomicBool,
    closed: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    next_conn_id: AtomicU64,
}

impl Server {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let server = Server {
            inner: Arc::new(ServerInner {
                backend,
                caps: RwLock::new(HashMap::new()),
                commands: RwLock::new(HashMap::new()),
                auths: RwLock::new(HashMap::new()),
                conns: Mutex::new(Vec::new()),
                tls: RwLock::new(None),
                allow_insecure_auth: AtomicBool::new(false),
                debug: AtomicBool::new(false),
                max_literal_size: AtomicU32::new(DEFAULT_MAX_LITERAL),
                updating: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                local_addr: Mutex::new(None),
                next_conn_id: AtomicU64::new(0),
            }),
        };

        server.register_default_commands();
        server.register_auth("PLAIN", || {
            Box::new(crate::sasl::Plain)
        });
        server
    }

    /// Enable STARTTLS and `listen_tls`.
    pub fn set_tls(&self, acceptor: SslAcceptor) {
        *self.inner.tls.write().unwrap() = Some(Arc::new(acceptor));
    }

    /// Allow LOGIN and AUTHENTICATE over unencrypted connections.
    pub fn set_allow_insecure_auth(&self, allow: bool) {
        self.inner
            .allow_insecure_auth
            .store(allow, Ordering::Relaxed);
    }

    /// Log all wire traffic of new connections at debug level.
    pub fn set_debug(&self, debug: bool) {
        self.inner.debug.store(debug, Ordering::Relaxed);
    }

    pub fn set_max_literal_size(&self, max: u32) {
        self.inner.max_literal_size.store(max, Ordering::Relaxed);
    }

    /// Register a capability advertised in the given states.
    ///
    /// Meant for extension libraries; the RFC 3501 capabilities are
    /// computed automatically.
    pub fn register_capability(&self, name: &str, states: ConnState) {
        self.inner
            .caps
            .write()
            .unwrap()
            .insert(name.to_owned(), states);
    }

    /// Register (or replace) a command.
    pub fn register_command(
        &self,
        name: &str,
        factory: impl Fn() -> Box<dyn Handler> + Send + Sync + 'static,
    ) {
        self.inner
            .commands
            .write()
            .unwrap()
            .insert(name.to_ascii_uppercase(), Box::new(factory));
    }

    /// Register (or replace) a SASL mechanism.
    pub fn register_auth(
        &self,
        name: &str,
        factory: impl Fn() -> Box<dyn SaslServer> + Send + Sync + 'static,
    ) {
        self.inner
            .auths
            .write()
            .unwrap()
            .insert(name.to_ascii_uppercase(), Box::new(factory));
    }

    /// Serve connections from an existing listener in the background.
    pub fn serve(&self, listener: TcpListener) -> io::Result<()> {
        self.serve_internal(listener, false)
    }

    /// Bind `addr` and serve in the background. Returns the bound address
    /// (useful with port 0).
    pub fn listen(&self, addr: &str) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        self.serve(listener)?;
        Ok(local)
    }

    /// Bind `addr` and serve implicit-TLS connections in the background.
    /// `set_tls` must have been called first.
    pub fn listen_tls(&self, addr: &str) -> Result<SocketAddr, Error> {
        if self.inner.tls.read().unwrap().is_none() {
            return Err(Error::TlsUnavailable);
        }

        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        self.serve_internal(listener, true)?;
        Ok(local)
    }

    fn serve_internal(
        &self,
        listener: TcpListener,
        implicit_tls: bool,
    ) -> io::Result<()> {
        *self.inner.local_addr.lock().unwrap() =
            Some(listener.local_addr()?);

        if let Some(updates) = self.inner.backend.updates() {
            self.inner.updating.store(true, Ordering::SeqCst);
            fanout::spawn(Arc::clone(&self.inner), updates);
        }

        let inner = Arc::clone(&self.inner);
        thread::spawn(move || accept_loop(inner, listener, implicit_tls));
        Ok(())
    }

    /// Stop listening and close all current connections.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        // Poke the listener so its blocking accept returns
        if let Some(addr) = *self.inner.local_addr.lock().unwrap() {
            let _ = TcpStream::connect(addr);
        }

        let conns = self.inner.conns.lock().unwrap();
        for conn in conns.iter() {
            conn.close();
        }
    }
}

impl ServerInner {
    pub(crate) fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn max_literal_size(&self) -> u32 {
        self.max_literal_size.load(Ordering::Relaxed)
    }

    /// The capability names visible in `state`.
    ///
    /// The RFC 3501 set is computed from the connection's security; the
    /// registry contributes extension capabilities by state mask.
    pub(crate) fn capabilities(
        &self,
        state: ConnState,
        tls_active: bool,
    ) -> Vec<String> {
        let mut caps = vec!["IMAP4rev1".to_owned()];

        if state.contains(ConnState::NOT_AUTHENTICATED) {
            let can_auth = tls_active
                || self.allow_insecure_auth.load(Ordering::Relaxed);

            if !tls_active && self.tls.read().unwrap().is_some() {
                caps.push("STARTTLS".to_owned());
            }

            if can_auth {
                let auths = self.auths.read().unwrap();
                let mut names: Vec<&String> = auths.keys().collect();
                names.sort();
                for name in names {
                    caps.push(format!("AUTH={}", name));
                }
            } else {
                caps.push("LOGINDISABLED".to_owned());
            }
        }

        let registry = self.caps.read().unwrap();
        let mut extras: Vec<String> = registry
            .iter()
            .filter(|&(_, mask)| mask.intersects(state))
            .map(|(name, _)| name.clone())
            .collect();
        extras.sort();
        caps.extend(extras);

        caps
    }
}

impl Server {
    fn register_default_commands(&self) {
        self.register_command("CAPABILITY", || {
            Box::new(cmd_any::Capability)
        });
        self.register_command("NOOP", || Box::new(cmd_any::Noop));
        self.register_command("LOGOUT", || Box::new(cmd_any::Logout));

        self.register_command("LOGIN", || {
            Box::new(cmd_notauth::Login::default())
        });
        self.register_command("AUTHENTICATE", || {
            Box::new(cmd_notauth::Authenticate::default())
        });

        self.register_command("SELECT", || {
            Box::new(cmd_auth::Select::new(false))
        });
        self.register_command("EXAMINE", || {
            Box::new(cmd_auth::Select::new(true))
        });
        self.register_command("CREATE", || {
            Box::new(cmd_auth::Create::default())
        });
        self.register_command("DELETE", || {
            Box::new(cmd_auth::Delete::default())
        });
        self.register_command("RENAME", || {
            Box::new(cmd_auth::Rename::default())
        });
        self.register_command("SUBSCRIBE", || {
            Box::new(cmd_auth::Subscribe::new(true))
        });
        self.register_command("UNSUBSCRIBE", || {
            Box::new(cmd_auth::Subscribe::new(false))
        });
        self.register_command("LIST", || {
            Box::new(cmd_auth::List::new(false))
        });
        self.register_command("LSUB", || {
            Box::new(cmd_auth::List::new(true))
        });
        self.register_command("STATUS", || {
            Box::new(cmd_auth::Status::default())
        });
        self.register_command("APPEND", || {
            Box::new(cmd_auth::Append::default())
        });

        self.register_command("CHECK", || {
            Box::new(cmd_selected::Check)
        });
        self.register_command("CLOSE", || {
            Box::new(cmd_selected::Close)
        });
        self.register_command("EXPUNGE", || {
            Box::new(cmd_selected::Expunge)
        });
        self.register_command("SEARCH", || {
            Box::new(cmd_selected::Search::default())
        });
        self.register_command("FETCH", || {
            Box::new(cmd_selected::Fetch::default())
        });
        self.register_command("STORE", || {
            Box::new(cmd_selected::Store::default())
        });
        self.register_command("COPY", || {
            Box::new(cmd_selected::Copy::default())
        });
        self.register_command("UID", || {
            Box::new(cmd_selected::Uid::default())
        });
    }
}

fn accept_loop(
    inner: Arc<ServerInner>,
    listener: TcpListener,
    implicit_tls: bool,
) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                if inner.closed.load(Ordering::SeqCst) {
                    return;
                }
                warn!("Error accepting connection: {}", e);
                continue;
            },
        };

        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let conn_inner = Arc::clone(&inner);
        thread::spawn(move || {
            run_conn(conn_inner, stream, peer, implicit_tls)
        });
    }
}

fn run_conn(
    inner: Arc<ServerInner>,
    stream: TcpStream,
    peer: SocketAddr,
    implicit_tls: bool,
) {
    let conn = if implicit_tls {
        let acceptor = match inner.tls.read().unwrap().clone() {
            Some(acceptor) => acceptor,
            None => {
                warn!("imap:{} TLS listener without TLS config", peer);
                return;
            },
        };
        match acceptor.accept(stream) {
            Ok(tls_stream) => {
                Conn::new_tls(Arc::clone(&inner), tls_stream, peer)
            },
            Err(e) => {
                warn!("imap:{} TLS handshake failed: {}", peer, e);
                return;
            },
        }
    } else {
        Conn::new(Arc::clone(&inner), stream, peer)
    };

    let mut conn = match conn {
        Ok(conn) => conn,
        Err(e) => {
            warn!("imap:{} Failed to set up connection: {}", peer, e);
            return;
        },
    };

    inner
        .conns
        .lock()
        .unwrap()
        .push(Arc::clone(&conn.shared));
    info!("{} Connection accepted", conn.log_prefix());

    match conn_loop(&mut conn) {
        Ok(()) => info!("{} Connection closed", conn.log_prefix()),
        Err(ref e) if e.is_disconnect() => {
            info!("{} Connection closed by peer", conn.log_prefix())
        },
        Err(e) => warn!("{} Connection error: {}", conn.log_prefix(), e),
    }

    conn.shared.close();
    let id = conn.shared.id;
    inner.conns.lock().unwrap().retain(|shared| shared.id != id);
}

fn conn_loop(conn: &mut Conn) -> Result<(), Error> {
    conn.greet()?;

    loop {
        if ConnState::LOGOUT == conn.state {
            return Ok(());
        }

        let fields = match conn.read_line() {
            Ok(fields) => fields,
            Err(ref e) if e.is_disconnect() => return Ok(()),
            Err(e) if e.is_parse() => {
                // Framing errors abandon the line but not the connection
                write_status(
                    conn,
                    StatusResp::untagged(StatusType::Bad, e.to_string()),
                );
                continue;
            },
            Err(e) => return Err(e),
        };

        let cmd = match Command::parse(&fields) {
            Ok(cmd) => cmd,
            Err(e) => {
                write_status(
                    conn,
                    StatusResp::untagged(StatusType::Bad, e.to_string()),
                );
                continue;
            },
        };

        handle_command(conn, cmd)?;
    }
}

fn handle_command(conn: &mut Conn, cmd: Command) -> Result<(), Error> {
    // STARTTLS swaps the connection's streams, which only the loop level
    // may do; everything else goes through the registry.
    if "STARTTLS" == cmd.name {
        return cmd_notauth::handle_starttls(conn, &cmd.tag);
    }

    let handler = {
        let commands = conn.server.commands.read().unwrap();
        commands.get(&cmd.name).map(|factory| factory())
    };
    let mut handler = match handler {
        Some(handler) => handler,
        None => {
            write_status(
                conn,
                StatusResp::bad(&cmd.tag, Error::UnknownCommand.to_string()),
            );
            return Ok(());
        },
    };

    if let Err(e) = handler.parse(cmd.args) {
        write_status(conn, StatusResp::bad(&cmd.tag, e.to_string()));
        return Ok(());
    }

    // A panicking handler (or backend) costs the command, not the process
    let result = catch_unwind(AssertUnwindSafe(|| handler.handle(conn)))
        .unwrap_or_else(|_| {
            Err(Error::Backend(
                "Unexpected error; check server logs for details".to_owned(),
            ))
        });

    match result {
        Ok(()) => write_status(
            conn,
            StatusResp::ok(&cmd.tag, format!("{} completed", cmd.name)),
        ),
        // A dead transport is fatal for the whole connection
        Err(Error::Io(e)) => return Err(Error::Io(e)),
        Err(ref e) if e.is_parse() => {
            write_status(conn, StatusResp::bad(&cmd.tag, e.to_string()))
        },
        Err(e) => {
            write_status(conn, StatusResp::no(&cmd.tag, e.to_string()))
        },
    }

    Ok(())
}

/// Write a status response, logging instead of failing; a response that
/// cannot be written will be followed by a read error that ends the
/// connection cleanly.
fn write_status(conn: &Conn, mut status: StatusResp) {
    if let Err(e) = conn.write_res(&mut status) {
        warn!("{} Error writing response: {}", conn.log_prefix(), e);
    }
}
