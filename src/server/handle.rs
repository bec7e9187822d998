// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::proto::{header::HeaderFields, xeid::XeidMatcher};

/// Why a registration was refused. The `Display` forms are the wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("authentication failed")]
    AuthFailed,
    #[error("multiple login not allowed, not requested")]
    NotRequested,
    #[error("multiple login not allowed, administrator doesn't permit")]
    NotPermitted,
}

/// Cross-actor post into a session's mailbox.
#[derive(Debug)]
pub enum SessionMsg {
    /// An event published by another session; the receiving session applies
    /// its own subscription rules before anything reaches its write queue.
    Trigger {
        publisher_name: String,
        publisher_type: String,
        xeid: XeidMatcher,
    },
}

/// Work posted to the server actor.
pub enum ServerMsg {
    Register {
        handle: Arc<SessionHandle>,
        reply: oneshot::Sender<Result<String, RegisterError>>,
    },
    Dispatch {
        publisher: Arc<SessionHandle>,
        xeids: Vec<XeidMatcher>,
    },
    Stop,
}

/// The face a session shows to the registry.
///
/// The session task holds the only strong `Arc`; the registry keeps `Weak`
/// references, so a session that dies takes its handle with it and the next
/// registry traversal prunes the entry. The assigned name is written once by
/// the server actor right before the handle enters the registry.
#[derive(Debug)]
pub struct SessionHandle {
    name: OnceCell<String>,
    header: HeaderFields,
    mailbox: mpsc::Sender<SessionMsg>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        header: HeaderFields,
        mailbox: mpsc::Sender<SessionMsg>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: OnceCell::new(),
            header,
            mailbox,
            cancel,
        })
    }

    /// The assigned device name; empty until the session is registered.
    pub fn name(&self) -> &str {
        self.name.get().map_or("", String::as_str)
    }

    /// Called once by the server actor during registration.
    pub fn set_name(&self, name: String) {
        let _ = self.name.set(name);
    }

    pub fn header(&self) -> &HeaderFields {
        &self.header
    }

    /// Requests asynchronous teardown of the session's stream and tasks.
    pub fn async_stop(&self) {
        self.cancel.cancel();
    }

    /// Posts a message without blocking the server actor. Returns false when
    /// the mailbox is full or the session is gone.
    pub fn try_post(&self, msg: SessionMsg) -> bool {
        self.mailbox.try_send(msg).is_ok()
    }
}
