// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::{debug, warn};

use crate::{
    cfg::config::SessionLimits,
    server::{registry::ServerHandle, session},
};

/// Builds the TLS acceptor from a PEM certificate chain and private key.
///
/// rustls negotiates TLS 1.2/1.3 only, so the legacy-protocol lockout comes
/// for free. The key must be stored decrypted: rustls has no password
/// callback for encrypted PEM.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("failed to open certificate {cert_path:?}"))?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .context("failed to parse certificate chain")?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key_path)
            .with_context(|| format!("failed to open private key {key_path:?}"))?,
    ))
    .context("failed to parse private key")?
    .with_context(|| format!("no private key found in {key_path:?}"))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid certificate/key pair")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accept loop for the TLS port: accept TCP, handshake, then hand the
/// encrypted stream to a session. A failed handshake drops the connection
/// without a reply.
pub async fn run_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    server: ServerHandle,
    limits: SessionLimits,
) {
    let shutdown = server.shutdown_token();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted (tls)");
                    let _ = stream.set_nodelay(true);
                    let acceptor = acceptor.clone();
                    let server = server.clone();
                    let limits = limits.clone();
                    // the handshake must not hold up the accept loop
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls) => session::spawn(tls, server, limits),
                            Err(e) => debug!(%peer, "handshake failed: {e}"),
                        }
                    });
                },
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(super::acceptor::ACCEPT_RETRY_DELAY).await;
                },
            },
        }
    }
}
