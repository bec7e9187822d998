// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Default idle timeout when the header carries no `timeout:` directive.
pub const DEFAULT_TIMEOUT_MS: u64 = 1_800_000;

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+$").expect("hard-coded pattern compiles"));

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_,-]+$").expect("hard-coded pattern compiles"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFlag {
    Normal,
    Uniquify,
    Enumerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePolicy {
    Strong,
    Weak,
}

/// Outcome of feeding one line to the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderEvent {
    /// Keep reading header lines.
    Continue,
    /// `END` was seen; the header block is over.
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderSyntax {
    #[error("RIOTp must appear first")]
    RiotpFirst,
    #[error("not a valid version string")]
    BadVersion,
    #[error("not enough arguments")]
    NotEnoughArguments,
    #[error("too many arguments")]
    TooManyArguments,
    #[error("invalid identifier")]
    InvalidIdentifier,
    #[error("not a valid argument : {0}")]
    BadArgument(String),
    #[error("not a valid argument")]
    BadArgumentBare,
    #[error("not a valid command")]
    BadDirective,
}

/// A header syntax error, tagged with the line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error (line = {line}): {kind}")]
pub struct HeaderError {
    pub line: u32,
    pub kind: HeaderSyntax,
}

/// The resolved connection preamble.
#[derive(Debug, Clone)]
pub struct HeaderFields {
    pub version: String,
    pub name: String,
    pub name_flag: NameFlag,
    pub dtype: String,
    pub password: String,
    pub name_policy: NamePolicy,
    /// Idle timeout in milliseconds; `None` means no timeout (`inf`).
    pub timeout_ms: Option<u64>,
}

impl HeaderFields {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Incremental parser for the connection preamble.
///
/// Lines are fed one at a time until `END`. The first error is recorded and
/// sticks; subsequent lines are still consumed (and discarded) so the caller
/// can keep draining the header block before reporting the failure.
#[derive(Debug)]
pub struct HeaderParser {
    pub version: String,
    pub name: String,
    pub name_flag: NameFlag,
    pub dtype: String,
    pub password: String,
    pub name_policy: NamePolicy,
    pub timeout_ms: Option<u64>,
    nline: u32,
    error: Option<HeaderError>,
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderParser {
    pub fn new() -> Self {
        Self {
            version: String::new(),
            name: String::new(),
            name_flag: NameFlag::Normal,
            dtype: String::new(),
            password: String::new(),
            name_policy: NamePolicy::Strong,
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            nline: 0,
            error: None,
        }
    }

    pub fn is_fine(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&HeaderError> {
        self.error.as_ref()
    }

    /// Consumes one header line.
    pub fn feed_line(&mut self, line: &str) -> HeaderEvent {
        self.nline += 1;
        let mut toks = line.split_whitespace();
        let Some(head) = toks.next() else {
            // empty line is not an error
            return HeaderEvent::Continue;
        };
        if head == "END" {
            return HeaderEvent::Done;
        }
        if !self.is_fine() {
            // sticky error: keep draining until END
            return HeaderEvent::Continue;
        }

        match head {
            "RIOTp" => {
                if self.nline == 1 {
                    match toks.next() {
                        Some(v) if is_valid_version(v) => self.version = v.to_string(),
                        Some(_) => self.set_error(HeaderSyntax::BadVersion),
                        None => self.set_error(HeaderSyntax::NotEnoughArguments),
                    }
                } else {
                    self.set_error(HeaderSyntax::RiotpFirst);
                }
            },
            "name:" => match toks.next() {
                Some(n) if is_valid_id(n) => {
                    self.name = n.to_string();
                    match toks.next() {
                        Some("enumerated") => self.name_flag = NameFlag::Enumerated,
                        Some("uniquify") => self.name_flag = NameFlag::Uniquify,
                        Some(other) => {
                            self.set_error(HeaderSyntax::BadArgument(other.to_string()))
                        },
                        None => self.name_flag = NameFlag::Normal,
                    }
                },
                Some(_) => self.set_error(HeaderSyntax::InvalidIdentifier),
                None => self.set_error(HeaderSyntax::NotEnoughArguments),
            },
            "type:" => match toks.next() {
                Some(t) if is_valid_id(t) => self.dtype = t.to_string(),
                Some(_) => self.set_error(HeaderSyntax::InvalidIdentifier),
                None => self.set_error(HeaderSyntax::NotEnoughArguments),
            },
            "password:" => match toks.next() {
                Some(p) => self.password = p.to_string(),
                None => self.set_error(HeaderSyntax::NotEnoughArguments),
            },
            "name-policy:" => match toks.next() {
                Some("weak") => self.name_policy = NamePolicy::Weak,
                Some("strong") => self.name_policy = NamePolicy::Strong,
                Some(other) => {
                    self.set_error(HeaderSyntax::BadArgument(other.to_string()))
                },
                None => self.set_error(HeaderSyntax::NotEnoughArguments),
            },
            "timeout:" => match toks.next() {
                Some(d) => match string_to_timeout(d) {
                    Some(t) => self.timeout_ms = t,
                    None => self.set_error(HeaderSyntax::BadArgumentBare),
                },
                None => self.set_error(HeaderSyntax::NotEnoughArguments),
            },
            _ => self.set_error(HeaderSyntax::BadDirective),
        }

        // check is_fine() to not override a previous message
        if self.is_fine() && toks.next().is_some() {
            self.set_error(HeaderSyntax::TooManyArguments);
        }

        HeaderEvent::Continue
    }

    /// Reports the first required field that was never initialized, in the
    /// order the protocol checks them.
    pub fn missing_required(&self) -> Option<&'static str> {
        if self.name.is_empty() {
            Some("name")
        } else if self.dtype.is_empty() {
            Some("type")
        } else if self.version.is_empty() {
            Some("RIOTp")
        } else {
            None
        }
    }

    pub fn into_fields(self) -> HeaderFields {
        HeaderFields {
            version: self.version,
            name: self.name,
            name_flag: self.name_flag,
            dtype: self.dtype,
            password: self.password,
            name_policy: self.name_policy,
            timeout_ms: self.timeout_ms,
        }
    }

    fn set_error(&mut self, kind: HeaderSyntax) {
        self.error = Some(HeaderError {
            line: self.nline,
            kind,
        });
    }
}

pub fn is_valid_version(s: &str) -> bool {
    VERSION_RE.is_match(s)
}

pub fn is_valid_id(s: &str) -> bool {
    IDENTIFIER_RE.is_match(s)
}

/// Parses the duration grammar.
///
/// Returns `None` for an unparseable token, `Some(None)` for `inf` (no
/// timeout), and `Some(Some(ms))` otherwise. A bare number is a count of
/// milliseconds; recognized suffixes scale it.
pub fn string_to_timeout(tok: &str) -> Option<Option<u64>> {
    if tok == "inf" {
        return Some(None);
    }
    // "ms" must be tried before "s" so "5ms" is not left as "5m"
    const UNITS: [(&str, f64); 6] = [
        ("day", 86_400_000.0),
        ("min", 60_000.0),
        ("wk", 604_800_000.0),
        ("ms", 1.0),
        ("h", 3_600_000.0),
        ("s", 1_000.0),
    ];
    for (suffix, mult) in UNITS {
        if let Some(num) = tok.strip_suffix(suffix)
            && let Ok(v) = num.parse::<f64>()
            && v.is_finite()
            && v >= 0.0
        {
            return Some(Some((v * mult) as u64));
        }
    }
    tok.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| Some(v as u64))
}
