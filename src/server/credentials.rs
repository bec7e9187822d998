// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

/// What a successful credential check grants the device.
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    pub multi_login: bool,
}

/// Credential backend consulted on the server actor during registration.
///
/// The call is synchronous; registration is serialized behind it, so
/// implementations are expected to answer from memory.
pub trait Credentials: Send + Sync {
    fn check(&self, name: &str, password: &str) -> Option<Grant>;
}

/// Trusts every (name, password) pair and permits multiple logins.
pub struct AllowAll;

impl Credentials for AllowAll {
    fn check(&self, _name: &str, _password: &str) -> Option<Grant> {
        Some(Grant { multi_login: true })
    }
}

/// A user record from the configuration file.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UserEntry {
    pub password: String,
    #[serde(default)]
    pub multi_login: bool,
}

/// In-memory credential table loaded from the `users:` config section.
pub struct StaticCredentials {
    users: HashMap<String, UserEntry>,
}

impl StaticCredentials {
    pub fn new(users: HashMap<String, UserEntry>) -> Self {
        Self { users }
    }
}

impl Credentials for StaticCredentials {
    fn check(&self, name: &str, password: &str) -> Option<Grant> {
        // uniquified sessions authenticate under the base name
        let entry = self.users.get(name)?;
        if entry.password != password {
            return None;
        }
        Some(Grant {
            multi_login: entry.multi_login,
        })
    }
}
