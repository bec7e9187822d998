// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Token grammar: `EID(@DNAME(#DTYPE)?)?`. Any slot may be empty; an empty
/// slot is a wildcard. `#` is only legal after `@`.
static XEID_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^\s@#]*)(?:@([^\s@#]*)(?:#([^\s@#]*))?)?$")
        .expect("hard-coded pattern compiles")
});

#[derive(Debug, Error)]
pub enum XeidError {
    #[error("'{0}' does not form an xeid")]
    NotAnXeid(String),
    #[error("{0}")]
    BadPattern(#[from] regex::Error),
}

/// An extended event ID pattern.
///
/// Each of the three slots is a regular expression matched against the whole
/// component string; an empty slot matches anything. The compiled regexes are
/// cached next to their sources, and identity (equality, display) is defined
/// on the sources alone.
#[derive(Clone)]
pub struct XeidMatcher {
    pub eid: String,
    pub dname: String,
    pub dtype: String,
    reid: Option<Regex>,
    rdname: Option<Regex>,
    rdtype: Option<Regex>,
}

impl XeidMatcher {
    /// Parses an `eid@dname#dtype` token and compiles its component patterns.
    pub fn parse(input: &str) -> Result<Self, XeidError> {
        let caps = XEID_TOKEN
            .captures(input)
            .ok_or_else(|| XeidError::NotAnXeid(input.to_string()))?;

        Self::from_parts(
            caps.get(1).map_or("", |m| m.as_str()),
            caps.get(2).map_or("", |m| m.as_str()),
            caps.get(3).map_or("", |m| m.as_str()),
        )
    }

    /// Builds a matcher from an already-split component triple.
    pub fn from_parts(eid: &str, dname: &str, dtype: &str) -> Result<Self, XeidError> {
        Ok(Self {
            eid: eid.to_string(),
            dname: dname.to_string(),
            dtype: dtype.to_string(),
            reid: compile_slot(eid)?,
            rdname: compile_slot(dname)?,
            rdtype: compile_slot(dtype)?,
        })
    }

    /// Checks the triple against all three slots.
    pub fn matches(&self, eid: &str, dname: &str, dtype: &str) -> bool {
        self.reid.as_ref().is_none_or(|r| r.is_match(eid))
            && self.rdname.as_ref().is_none_or(|r| r.is_match(dname))
            && self.rdtype.as_ref().is_none_or(|r| r.is_match(dtype))
    }

    /// Canonical token form, accepted back by [`XeidMatcher::parse`].
    pub fn token(&self) -> String {
        let mut out = self.eid.clone();
        if !self.dname.is_empty() || !self.dtype.is_empty() {
            out.push('@');
            out.push_str(&self.dname);
            if !self.dtype.is_empty() {
                out.push('#');
                out.push_str(&self.dtype);
            }
        }
        if out.is_empty() {
            // the all-wildcard matcher still needs a visible token
            out.push('@');
        }
        out
    }

    /// Checks only the device slots, ignoring the event ID.
    pub fn device_matches(&self, dname: &str, dtype: &str) -> bool {
        self.rdname.as_ref().is_none_or(|r| r.is_match(dname))
            && self.rdtype.as_ref().is_none_or(|r| r.is_match(dtype))
    }
}

/// Empty slots are wildcards and compile to nothing; non-empty slots are
/// anchored so the component must match as a whole.
fn compile_slot(src: &str) -> Result<Option<Regex>, XeidError> {
    if src.is_empty() {
        return Ok(None);
    }
    Ok(Some(Regex::new(&format!("^(?:{src})$"))?))
}

impl PartialEq for XeidMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.eid == other.eid && self.dname == other.dname && self.dtype == other.dtype
    }
}

impl Eq for XeidMatcher {}

impl fmt::Debug for XeidMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XeidMatcher")
            .field("eid", &self.eid)
            .field("dname", &self.dname)
            .field("dtype", &self.dtype)
            .finish()
    }
}

impl fmt::Display for XeidMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "eid: {} dname: {} dtype: {}",
            self.eid, self.dname, self.dtype
        )
    }
}
