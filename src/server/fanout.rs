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

//! Fan-out of backend-originated unsolicited updates.
//!
//! One forwarder thread per update channel funnels into a single queue,
//! which preserves the ordering of each channel; nothing is promised
//! across channels. The consumer serialises each update once, then writes
//! the bytes to every connection whose user and mailbox match the update's
//! filter, under each destination's write lock. Connections with the
//! `silent` flag set are skipped for FETCH-class updates. Write failures
//! are logged and the next connection is tried; closed connections are
//! pruned as a side effect.

use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::warn;

use super::conn::ConnShared;
use super::ServerInner;
use crate::backend::{Update, Updates};
use crate::proto::{ExpungeResp, FetchResp, Response, SelectResp};
use crate::wire::Writer;

enum UnilateralUpdate {
    Status(crate::backend::StatusUpdate),
    Mailbox(crate::backend::MailboxUpdate),
    Message(crate::backend::MessageUpdate),
    Expunge(crate::backend::ExpungeUpdate),
}

pub(super) fn spawn(inner: Arc<ServerInner>, updates: Updates) {
    let (queue, merged) = channel();

    forward(updates.statuses, queue.clone(), UnilateralUpdate::Status);
    forward(
        updates.mailboxes,
        queue.clone(),
        UnilateralUpdate::Mailbox,
    );
    forward(updates.messages, queue.clone(), UnilateralUpdate::Message);
    forward(updates.expunges, queue, UnilateralUpdate::Expunge);

    thread::spawn(move || consume(inner, merged));
}

/// Forward one typed channel into the merged queue, preserving its order.
fn forward<T: Send + 'static>(
    source: Receiver<T>,
    queue: Sender<UnilateralUpdate>,
    wrap: impl Fn(T) -> UnilateralUpdate + Send + 'static,
) {
    thread::spawn(move || {
        for update in source.iter() {
            if queue.send(wrap(update)).is_err() {
                return;
            }
        }
    });
}

fn consume(inner: Arc<ServerInner>, merged: Receiver<UnilateralUpdate>) {
    for update in merged.iter() {
        let (filter, mut response, is_fetch) = build_response(update);

        // Serialise once; every matching connection gets the same bytes
        let mut buffer = Vec::<u8>::new();
        {
            let mut w = Writer::new(&mut buffer as &mut dyn Write);
            if let Err(e) = response.write_to(&mut w) {
                warn!("Cannot format unilateral update: {}", e);
                continue;
            }
        }

        let conns: Vec<Arc<ConnShared>> = {
            let mut conns = inner.conns.lock().unwrap();
            conns.retain(|conn| {
                !conn.closed.load(Ordering::SeqCst)
            });
            conns.clone()
        };

        for conn in conns {
            if !wants(&conn, &filter, is_fetch) {
                continue;
            }

            let mut write = conn.write.lock().unwrap();
            if let Err(e) =
                write.write_all(&buffer).and_then(|_| write.flush())
            {
                warn!("Error sending unilateral update: {}", e);
            }
        }
    }
}

fn wants(conn: &ConnShared, filter: &Update, is_fetch: bool) -> bool {
    let conn_filter = conn.filter.lock().unwrap();

    if !filter.username.is_empty()
        && conn_filter.username.as_deref() != Some(&filter.username)
    {
        return false;
    }
    if !filter.mailbox.is_empty()
        && conn_filter.mailbox.as_deref() != Some(&filter.mailbox)
    {
        return false;
    }
    // A connection mid-silent-STORE must not see its own FETCH echo
    if conn_filter.silent && is_fetch {
        return false;
    }

    true
}

fn build_response(
    update: UnilateralUpdate,
) -> (Update, Box<dyn Response>, bool) {
    match update {
        UnilateralUpdate::Status(u) => {
            (u.update, Box::new(u.status), false)
        },
        UnilateralUpdate::Mailbox(u) => (
            u.update,
            Box::new(SelectResp { status: u.status }),
            false,
        ),
        UnilateralUpdate::Message(u) => (
            u.update,
            Box::new(FetchResp {
                messages: single(u.message),
            }),
            true,
        ),
        UnilateralUpdate::Expunge(u) => (
            u.update,
            Box::new(ExpungeResp {
                seq_nums: single(u.seq_num),
            }),
            false,
        ),
    }
}

/// A pre-closed single-element channel, so the streamed response types can
/// carry exactly one item.
fn single<T>(value: T) -> Receiver<T> {
    let (sender, receiver) = channel();
    let _ = sender.send(value);
    receiver
}
