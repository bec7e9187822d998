// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::{cfg::logger::LogConfig, server::credentials::UserEntry};

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Where the broker listens.
    pub listener: ListenerConfig,
    /// Per-session resource bounds.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Credential table; empty means every device is trusted.
    #[serde(default)]
    pub users: HashMap<String, UserEntry>,
    /// Logging setup.
    #[serde(default)]
    pub logger: LogConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ListenerConfig {
    /// Plaintext bind address, e.g. `0.0.0.0:9990`.
    #[serde(default)]
    pub plain: Option<String>,
    /// TLS listener; absent disables the encrypted port.
    #[serde(default)]
    pub tls: Option<TlsListenerConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TlsListenerConfig {
    pub bind: String,
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key (decrypted).
    pub key: PathBuf,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LimitsConfig {
    /// Buffers a session's write queue may hold before the slowest-subscriber
    /// policy disconnects it.
    #[serde(default = "default_write_queue_depth")]
    pub write_queue_depth: usize,
    /// Pending cross-session posts per session.
    #[serde(default = "default_mailbox_depth")]
    pub mailbox_depth: usize,
    /// Longest accepted protocol line, in bytes.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            write_queue_depth: default_write_queue_depth(),
            mailbox_depth: default_mailbox_depth(),
            max_line_len: default_max_line_len(),
        }
    }
}

fn default_write_queue_depth() -> usize {
    1024
}

fn default_mailbox_depth() -> usize {
    256
}

fn default_max_line_len() -> usize {
    8192
}

/// The slice of the limits every session carries around.
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub write_queue_depth: usize,
    pub mailbox_depth: usize,
    pub max_line_len: usize,
}

impl LimitsConfig {
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            write_queue_depth: self.write_queue_depth,
            mailbox_depth: self.mailbox_depth,
            max_line_len: self.max_line_len,
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.listener.plain.is_some() || self.listener.tls.is_some(),
            "at least one of listener.plain / listener.tls is required"
        );
        ensure!(
            self.limits.write_queue_depth >= 1,
            "limits.write_queue_depth must be >= 1"
        );
        ensure!(
            self.limits.mailbox_depth >= 1,
            "limits.mailbox_depth must be >= 1"
        );
        ensure!(
            self.limits.max_line_len >= 16,
            "limits.max_line_len must be >= 16"
        );
        Ok(())
    }
}
