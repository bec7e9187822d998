// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::proto::{
    header::string_to_timeout,
    xeid::{XeidError, XeidMatcher},
};

/// Default cap for `p2p-accept` when `maxconnections` is absent.
pub const DEFAULT_P2P_MAX_CONNECTIONS: u64 = 1000;

/// `RECIPIENTS>SIZE` selector of `p2p-send`.
static P2P_SEND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+(?:,\d+)*|\*)>(\d+|[nN])$").expect("hard-coded pattern compiles")
});

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("syntax error: too many arguments")]
    TooManyArguments,
    #[error("syntax error: invalid xeid : {0}")]
    InvalidXeid(#[source] XeidError),
    #[error("syntax error: not a valid argument : {0}")]
    BadArgument(String),
    #[error("syntax error: not a valid command")]
    BadCommand,
}

/// One parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Trig {
        xeids: Vec<XeidMatcher>,
    },
    Sub {
        xeids: Vec<XeidMatcher>,
        /// Minimum delivery period in milliseconds, when requested.
        minperiod: Option<u64>,
    },
    Unsub {
        ids: Vec<u64>,
        all: bool,
    },
    Negsub {
        xeids: Vec<XeidMatcher>,
    },
    Unnegsub {
        ids: Vec<u64>,
        all: bool,
    },
    Pause,
    Continue,
    P2pAccept {
        max_connections: u64,
    },
    P2pStopAccept,
    P2pDisconnect {
        ids: Vec<u64>,
        all: bool,
    },
    P2pSend {
        recipients: Vec<u64>,
        all: bool,
        size: u64,
        until_newline: bool,
    },
}

impl Command {
    /// Parses one line. An empty line is `Command::Empty`, not an error.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut toks = line.split_whitespace();
        let Some(head) = toks.next() else {
            return Ok(Command::Empty);
        };

        match head {
            "trig" => {
                let mut xeids = Vec::new();
                for tok in toks {
                    xeids.push(
                        XeidMatcher::parse(tok).map_err(CommandError::InvalidXeid)?,
                    );
                }
                Ok(Command::Trig { xeids })
            },
            "sub" => {
                let mut xeids = Vec::new();
                let mut minperiod = None;
                for tok in toks {
                    if let Some(rest) = tok.strip_prefix("minperiod=") {
                        if rest.is_empty() {
                            return Err(CommandError::BadArgument(
                                "minperiod".to_string(),
                            ));
                        }
                        match string_to_timeout(rest) {
                            Some(t) => minperiod = t,
                            None => {
                                return Err(CommandError::BadArgument(
                                    rest.to_string(),
                                ));
                            },
                        }
                    } else {
                        match XeidMatcher::parse(tok) {
                            Ok(x) => xeids.push(x),
                            Err(_) => {
                                return Err(CommandError::BadArgument(
                                    tok.to_string(),
                                ));
                            },
                        }
                    }
                }
                Ok(Command::Sub { xeids, minperiod })
            },
            "unsub" => {
                let (ids, all) = parse_id_list(&mut toks)?;
                Ok(Command::Unsub { ids, all })
            },
            "negsub" => {
                let mut xeids = Vec::new();
                for tok in toks {
                    xeids.push(
                        XeidMatcher::parse(tok).map_err(CommandError::InvalidXeid)?,
                    );
                }
                Ok(Command::Negsub { xeids })
            },
            "unnegsub" => {
                let (ids, all) = parse_id_list(&mut toks)?;
                Ok(Command::Unnegsub { ids, all })
            },
            "pause" => {
                expect_no_more(&mut toks)?;
                Ok(Command::Pause)
            },
            "continue" => {
                expect_no_more(&mut toks)?;
                Ok(Command::Continue)
            },
            "p2p-accept" => {
                let max_connections = match toks.next() {
                    Some(tok) => match tok.split_once('=') {
                        Some(("maxconnections", "")) => {
                            return Err(CommandError::BadArgument(
                                "maxconnections".to_string(),
                            ));
                        },
                        Some(("maxconnections", rest)) => {
                            rest.parse::<u64>().map_err(|_| {
                                CommandError::BadArgument(rest.to_string())
                            })?
                        },
                        Some((key, _)) => {
                            return Err(CommandError::BadArgument(key.to_string()));
                        },
                        None => {
                            return Err(CommandError::BadArgument(tok.to_string()));
                        },
                    },
                    None => DEFAULT_P2P_MAX_CONNECTIONS,
                };
                expect_no_more(&mut toks)?;
                Ok(Command::P2pAccept { max_connections })
            },
            "p2p-stop-accept" => {
                expect_no_more(&mut toks)?;
                Ok(Command::P2pStopAccept)
            },
            "p2p-disconnect" => {
                let (ids, all) = parse_id_list(&mut toks)?;
                Ok(Command::P2pDisconnect { ids, all })
            },
            other => {
                // not a command word: it may be the p2p-send selector
                let Some(caps) = P2P_SEND_RE.captures(other) else {
                    return Err(CommandError::BadCommand);
                };
                let (mut recipients, mut all) = (Vec::new(), false);
                let m1 = caps.get(1).map_or("", |m| m.as_str());
                if m1 == "*" {
                    all = true;
                } else {
                    for part in m1.split(',') {
                        recipients.push(part.parse::<u64>().map_err(|_| {
                            CommandError::BadArgument(part.to_string())
                        })?);
                    }
                }
                let (mut size, mut until_newline) = (0u64, false);
                let m2 = caps.get(2).map_or("", |m| m.as_str());
                if m2.eq_ignore_ascii_case("n") {
                    until_newline = true;
                } else {
                    size = m2
                        .parse::<u64>()
                        .map_err(|_| CommandError::BadArgument(m2.to_string()))?;
                }
                expect_no_more(&mut toks)?;
                Ok(Command::P2pSend {
                    recipients,
                    all,
                    size,
                    until_newline,
                })
            },
        }
    }
}

/// `(ID)* | "*"` lists of `unsub`, `unnegsub` and `p2p-disconnect`. A `*`
/// stops the scan; anything left after it is trailing junk.
fn parse_id_list<'a, I>(toks: &mut I) -> Result<(Vec<u64>, bool), CommandError>
where I: Iterator<Item = &'a str> {
    let mut ids = Vec::new();
    loop {
        let Some(tok) = toks.next() else {
            return Ok((ids, false));
        };
        if tok == "*" {
            expect_no_more(toks)?;
            return Ok((ids, true));
        }
        ids.push(
            tok.parse::<u64>()
                .map_err(|_| CommandError::BadArgument(tok.to_string()))?,
        );
    }
}

fn expect_no_more<'a, I>(toks: &mut I) -> Result<(), CommandError>
where I: Iterator<Item = &'a str> {
    if toks.next().is_some() {
        return Err(CommandError::TooManyArguments);
    }
    Ok(())
}

/// Canonical textual form, accepted back by [`Command::parse`].
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Empty => Ok(()),
            Command::Trig { xeids } => {
                write!(f, "trig")?;
                for x in xeids {
                    write!(f, " {}", x.token())?;
                }
                Ok(())
            },
            Command::Sub { xeids, minperiod } => {
                write!(f, "sub")?;
                for x in xeids {
                    write!(f, " {}", x.token())?;
                }
                if let Some(ms) = minperiod {
                    write!(f, " minperiod={ms}")?;
                }
                Ok(())
            },
            Command::Unsub { ids, all } => write_id_list(f, "unsub", ids, *all),
            Command::Negsub { xeids } => {
                write!(f, "negsub")?;
                for x in xeids {
                    write!(f, " {}", x.token())?;
                }
                Ok(())
            },
            Command::Unnegsub { ids, all } => write_id_list(f, "unnegsub", ids, *all),
            Command::Pause => write!(f, "pause"),
            Command::Continue => write!(f, "continue"),
            Command::P2pAccept { max_connections } => {
                write!(f, "p2p-accept maxconnections={max_connections}")
            },
            Command::P2pStopAccept => write!(f, "p2p-stop-accept"),
            Command::P2pDisconnect { ids, all } => {
                write_id_list(f, "p2p-disconnect", ids, *all)
            },
            Command::P2pSend {
                recipients,
                all,
                size,
                until_newline,
            } => {
                if *all {
                    write!(f, "*>")?;
                } else {
                    let joined = recipients
                        .iter()
                        .map(u64::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    write!(f, "{joined}>")?;
                }
                if *until_newline {
                    write!(f, "n")
                } else {
                    write!(f, "{size}")
                }
            },
        }
    }
}

fn write_id_list(
    f: &mut fmt::Formatter<'_>,
    word: &str,
    ids: &[u64],
    all: bool,
) -> fmt::Result {
    write!(f, "{word}")?;
    for id in ids {
        write!(f, " {id}")?;
    }
    if all {
        write!(f, " *")?;
    }
    Ok(())
}
