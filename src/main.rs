// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use riot_server_rs::{
    cfg::{cli::config_path_from_args, config::Config, logger::init_logger},
    server::{
        acceptor,
        credentials::{AllowAll, Credentials, StaticCredentials},
        registry::Registry,
        tls,
    },
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg_path = config_path_from_args()?;
    let cfg = Config::load_from_file(&cfg_path)
        .with_context(|| format!("failed to load config {cfg_path:?}"))?;

    let _logger = init_logger(&cfg.logger)?;
    info!(config = %cfg_path.display(), "starting RIOTp broker");

    let creds: Arc<dyn Credentials> = if cfg.users.is_empty() {
        warn!("no users configured, trusting every device");
        Arc::new(AllowAll)
    } else {
        Arc::new(StaticCredentials::new(cfg.users.clone()))
    };

    let server = Registry::spawn(creds);
    let limits = cfg.limits.session_limits();

    let mut listeners = Vec::new();
    if let Some(addr) = &cfg.listener.plain {
        let listener = acceptor::bind(addr).await?;
        listeners.push(tokio::spawn(acceptor::run_plain(
            listener,
            server.clone(),
            limits.clone(),
        )));
    }
    if let Some(tls_cfg) = &cfg.listener.tls {
        let tls_acceptor = tls::load_acceptor(&tls_cfg.cert, &tls_cfg.key)?;
        let listener = acceptor::bind(&tls_cfg.bind).await?;
        listeners.push(tokio::spawn(tls::run_tls(
            listener,
            tls_acceptor,
            server.clone(),
            limits.clone(),
        )));
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
    info!("shutdown signal received");

    server.stop().await;
    for task in listeners {
        let _ = task.await;
    }

    info!("bye");
    Ok(())
}
