//! Parser for the transfer command surface.
//!
//! ```text
//! refresh
//! accept <index>
//! decline <index>
//! pause <index>
//! continue <index>
//! abort <index>
//! ```
//!
//! Indices are the 0-based display positions shown in the transfer listing.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A parsed transfer command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Drop finished transfers from the listing
    Refresh,
    /// Accept an offered download
    Accept(usize),
    /// Refuse an offered download
    Decline(usize),
    /// Hold a running transfer
    Pause(usize),
    /// Continue a paused transfer
    Continue(usize),
    /// Cancel a running transfer
    Abort(usize),
}

impl Command {
    /// Parse one command line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommand`] for unknown verbs, missing or extra
    /// arguments, and indices that are not non-negative integers.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| Error::InvalidCommand("empty command".to_string()))?;

        let ctor: fn(usize) -> Self = match verb {
            "refresh" => {
                return match words.next() {
                    None => Ok(Self::Refresh),
                    Some(extra) => Err(Error::InvalidCommand(format!(
                        "refresh takes no argument, got '{extra}'"
                    ))),
                };
            }
            "accept" => Self::Accept,
            "decline" => Self::Decline,
            "pause" => Self::Pause,
            "continue" => Self::Continue,
            "abort" => Self::Abort,
            other => {
                return Err(Error::InvalidCommand(format!("unknown command '{other}'")));
            }
        };

        let index = match (words.next(), words.next()) {
            (Some(arg), None) => arg.parse::<usize>().map_err(|_| {
                Error::InvalidCommand(format!("'{arg}' is not a transfer index"))
            })?,
            (None, _) => {
                return Err(Error::InvalidCommand(format!(
                    "{verb} needs a transfer index"
                )));
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidCommand(format!(
                    "{verb} takes exactly one transfer index"
                )));
            }
        };

        Ok(ctor(index))
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refresh => f.write_str("refresh"),
            Self::Accept(i) => write!(f, "accept {i}"),
            Self::Decline(i) => write!(f, "decline {i}"),
            Self::Pause(i) => write!(f, "pause {i}"),
            Self::Continue(i) => write!(f, "continue {i}"),
            Self::Abort(i) => write!(f, "abort {i}"),
        }
    }
}
