// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::BTreeSet,
    sync::{Arc, Weak},
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    proto::{
        header::{NameFlag, NamePolicy},
        xeid::XeidMatcher,
    },
    server::{
        credentials::Credentials,
        handle::{RegisterError, ServerMsg, SessionHandle, SessionMsg},
    },
};

const SERVER_MAILBOX_DEPTH: usize = 128;

/// Cheap cloneable handle onto the server actor.
///
/// Sessions and acceptors talk to the registry exclusively through this;
/// every mutation is serialized on the actor task.
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::Sender<ServerMsg>,
    shutdown: CancellationToken,
}

impl ServerHandle {
    /// Runs the registration algorithm for a freshly parsed header.
    ///
    /// `None` means the server is shutting down and the session should tear
    /// down silently; otherwise the inner result carries the assigned name or
    /// the wire-visible refusal.
    pub async fn register(
        &self,
        handle: Arc<SessionHandle>,
    ) -> Option<Result<String, RegisterError>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ServerMsg::Register { handle, reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Fans one `trig` command out to every other live session.
    pub async fn dispatch(&self, publisher: Arc<SessionHandle>, xeids: Vec<XeidMatcher>) {
        let _ = self.tx.send(ServerMsg::Dispatch { publisher, xeids }).await;
    }

    /// Cancels the acceptors and stops every live session.
    pub async fn stop(&self) {
        let _ = self.tx.send(ServerMsg::Stop).await;
    }

    /// Token cancelled on `stop()`; acceptors and sessions hang off it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// The session registry actor.
///
/// Owns the weak-reference list and the credential backend; processes
/// registration, dispatch and stop requests one at a time.
pub struct Registry {
    sessions: Vec<Weak<SessionHandle>>,
    creds: Arc<dyn Credentials>,
    shutdown: CancellationToken,
}

impl Registry {
    /// Spawns the actor task and returns the handle the rest of the server
    /// uses to reach it.
    pub fn spawn(creds: Arc<dyn Credentials>) -> ServerHandle {
        let (tx, rx) = mpsc::channel(SERVER_MAILBOX_DEPTH);
        let shutdown = CancellationToken::new();
        let actor = Registry {
            sessions: Vec::new(),
            creds,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(actor.run(rx));
        ServerHandle { tx, shutdown }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ServerMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                ServerMsg::Register { handle, reply } => {
                    let _ = reply.send(self.register(&handle));
                },
                ServerMsg::Dispatch { publisher, xeids } => {
                    self.dispatch(&publisher, xeids);
                },
                ServerMsg::Stop => {
                    self.stop_all();
                    break;
                },
            }
        }
    }

    /// Visits every live session. The visitor returns `false` to stop the
    /// traversal and sets `remove` to drop the entry; expired weak references
    /// are pruned in the same pass.
    fn for_each_session<F>(&mut self, mut f: F)
    where F: FnMut(&Arc<SessionHandle>, &mut bool) -> bool {
        let mut i = 0;
        while i < self.sessions.len() {
            let Some(session) = self.sessions[i].upgrade() else {
                self.sessions.remove(i);
                continue;
            };
            let mut remove = false;
            let keep_going = f(&session, &mut remove);
            if remove {
                self.sessions.remove(i);
            } else {
                i += 1;
            }
            if !keep_going {
                break;
            }
        }
    }

    fn register(
        &mut self,
        handle: &Arc<SessionHandle>,
    ) -> Result<String, RegisterError> {
        let hdr = handle.header();
        let grant = self
            .creds
            .check(&hdr.name, &hdr.password)
            .ok_or(RegisterError::AuthFailed)?;

        match hdr.name_flag {
            NameFlag::Normal => {
                let mut name_free = true;
                let requested = hdr.name.clone();
                self.for_each_session(|session, remove| {
                    if session.name() == requested {
                        if session.header().name_policy == NamePolicy::Weak {
                            // the holder ceded the name; there can be no other
                            session.async_stop();
                            *remove = true;
                        } else {
                            name_free = false;
                        }
                        return false;
                    }
                    true
                });
                if !name_free {
                    return Err(RegisterError::NotRequested);
                }
                self.admit(handle, requested.clone());
                Ok(requested)
            },
            NameFlag::Uniquify | NameFlag::Enumerated => {
                let mut occupied = BTreeSet::new();
                let base = hdr.name.clone();
                self.for_each_session(|session, _| {
                    if let Some(i) = enumerated_index(session.name(), &base) {
                        occupied.insert(i);
                    }
                    true
                });

                let index = if occupied.is_empty() {
                    1
                } else if grant.multi_login {
                    let mut i = 1u64;
                    while occupied.contains(&i) {
                        i += 1;
                    }
                    i
                } else {
                    return Err(RegisterError::NotPermitted);
                };

                let assigned = format!("{base}_{index}");
                self.admit(handle, assigned.clone());
                Ok(assigned)
            },
        }
    }

    fn admit(&mut self, handle: &Arc<SessionHandle>, name: String) {
        info!(name = %name, dtype = %handle.header().dtype, "session registered");
        handle.set_name(name);
        self.sessions.push(Arc::downgrade(handle));
    }

    fn dispatch(&mut self, publisher: &Arc<SessionHandle>, xeids: Vec<XeidMatcher>) {
        let publisher_name = publisher.name().to_string();
        let publisher_type = publisher.header().dtype.clone();

        for xeid in xeids {
            self.for_each_session(|session, _| {
                if !Arc::ptr_eq(session, publisher)
                    && !session.try_post(SessionMsg::Trigger {
                        publisher_name: publisher_name.clone(),
                        publisher_type: publisher_type.clone(),
                        xeid: xeid.clone(),
                    })
                {
                    debug!(
                        subscriber = session.name(),
                        "mailbox full, trigger dropped"
                    );
                }
                true
            });
        }
    }

    fn stop_all(&mut self) {
        info!("stopping server");
        self.shutdown.cancel();
        self.for_each_session(|session, remove| {
            session.async_stop();
            *remove = true;
            true
        });
    }
}

/// Matches `<base>_<I>` against a live session name.
fn enumerated_index(name: &str, base: &str) -> Option<u64> {
    let digits = name.strip_prefix(base)?.strip_prefix('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
