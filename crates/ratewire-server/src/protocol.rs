//! Line protocol for the rate distribution server.
//!
//! The protocol is line-oriented, `\r\n` terminated, UTF-8:
//!
//! | Direction | Line |
//! |-----------|------|
//! | server → client (on connect) | `WELCOME\|Connected to Rate TCP Server` |
//! | client → server | `subscribe\|<SYMBOL>` |
//! | client → server | `unsubscribe\|<SYMBOL>` |
//! | server → client | `Subscribed to <SYMBOL>` |
//! | server → client | `Unsubscribed from <SYMBOL>` |
//! | server → client | `ERROR\|<reason>` |
//! | server → client (push) | one JSON rate per line |

use std::fmt::{Display, Formatter};

use ratewire_core::{Rate, Symbol};

/// Greeting written to every accepted connection.
pub const WELCOME: &str = "WELCOME|Connected to Rate TCP Server";

/// Per-command protocol failure, reported to the offending client; the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidFormat,
    NotSubscribed { name: String },
    RateNotFound { name: String },
    ServerAtCapacity,
}

impl ProtocolError {
    /// Wire form of the error, without the line terminator.
    pub fn to_line(&self) -> String {
        match self {
            Self::InvalidFormat => "ERROR|Invalid request format".to_owned(),
            Self::NotSubscribed { name } => {
                format!("ERROR|You are not subscribed to: {name}")
            }
            Self::RateNotFound { name } => format!("ERROR|Rate not found: {name}"),
            Self::ServerAtCapacity => "ERROR|Server at connection capacity".to_owned(),
        }
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// One parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe(Symbol),
    Unsubscribe(Symbol),
}

impl Command {
    /// Parse one received line. Any malformed input maps to
    /// [`ProtocolError::InvalidFormat`].
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim();
        let (verb, argument) = trimmed.split_once('|').ok_or(ProtocolError::InvalidFormat)?;

        let symbol = Symbol::parse(argument).map_err(|_| ProtocolError::InvalidFormat)?;
        match verb.trim().to_ascii_lowercase().as_str() {
            "subscribe" => Ok(Self::Subscribe(symbol)),
            "unsubscribe" => Ok(Self::Unsubscribe(symbol)),
            _ => Err(ProtocolError::InvalidFormat),
        }
    }
}

/// Acknowledgement for a successful subscribe.
pub fn subscribed_line(symbol: &Symbol) -> String {
    format!("Subscribed to {symbol}")
}

/// Acknowledgement for a successful unsubscribe.
pub fn unsubscribed_line(symbol: &Symbol) -> String {
    format!("Unsubscribed from {symbol}")
}

/// Serialized push line for one rate.
pub fn rate_line(rate: &Rate) -> String {
    serde_json::to_string(rate).unwrap_or_else(|_| {
        // Rate is a plain struct of validated scalars; serialization
        // cannot fail in practice.
        format!(
            "{{\"name\":\"{}\",\"bid\":{},\"ask\":{},\"ts\":\"{}\"}}",
            rate.name, rate.bid, rate.ask, rate.ts
        )
    })
}
