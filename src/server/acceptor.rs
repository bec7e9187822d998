// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::{
    cfg::config::SessionLimits,
    server::{registry::ServerHandle, session},
};

/// Breather after a failed accept, so a transient error (EMFILE and friends)
/// does not spin the loop.
pub(crate) const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Binds a listener socket; shared by the plain and TLS accept loops.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    Ok(listener)
}

/// Accept loop for plaintext connections. Each accepted socket becomes a
/// session immediately; the loop ends when the server stops.
pub async fn run_plain(
    listener: TcpListener,
    server: ServerHandle,
    limits: SessionLimits,
) {
    let shutdown = server.shutdown_token();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted");
                    let _ = stream.set_nodelay(true);
                    session::spawn(stream, server.clone(), limits.clone());
                },
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                },
            },
        }
    }
}
