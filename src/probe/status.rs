//! Parser for the textual reply of the `status` console command.

use std::fmt;

use thiserror::Error;

const GAME_ENDPOINT_LABEL: &str = "udp/ip";
const TV_ENDPOINT_LABEL: &str = "sourcetv:";
const PLAYERS_PREFIX: &str = "players :";
const MAP_PREFIX: &str = "map";

/// Errors raised while parsing a `status` reply.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StatusParseError {
    /// Raised when no line starts with `players :`.
    #[error("status reply has no players line")]
    MissingPlayers,
    /// Raised when the players line carries no number.
    #[error("players line '{line}' has no player count")]
    MissingPlayerCount {
        /// Offending line.
        line: String,
    },
}

/// An `ip:port` pair reported by the server.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Endpoint {
    /// Dotted IPv4 address.
    pub ip: String,
    /// Port number.
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parsed view of a `status` reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusReport {
    /// Endpoint players connect to.
    pub game: Option<Endpoint>,
    /// Spectator-feed endpoint; only present once the server is fully up.
    pub tv: Option<Endpoint>,
    /// Number of connected human players.
    pub players: u32,
    /// Current map.
    pub map: Option<String>,
}

impl StatusReport {
    /// Parses the raw reply.
    ///
    /// # Errors
    ///
    /// Fails when the players line is missing or carries no number.
    pub fn parse(reply: &str) -> Result<Self, StatusParseError> {
        Ok(Self {
            game: find_endpoint(reply, GAME_ENDPOINT_LABEL, true),
            tv: find_endpoint(reply, TV_ENDPOINT_LABEL, false),
            players: parse_players(reply)?,
            map: parse_map(reply),
        })
    }

    /// Whether no players are connected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.players == 0
    }

    /// Whether the server reports its spectator feed, which it only does once
    /// it has finished starting.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.tv.is_some()
    }
}

/// Finds the first occurrence of `label` followed by an `ip:port` token.
///
/// When `needs_colon` is set, a `:` separator (optionally surrounded by
/// whitespace) must sit between the label and the endpoint.
fn find_endpoint(reply: &str, label: &str, needs_colon: bool) -> Option<Endpoint> {
    reply.match_indices(label).find_map(|(start, _)| {
        let after = reply.get(start + label.len()..)?;
        let rest = if needs_colon {
            after.trim_start().strip_prefix(':')?
        } else {
            after
        };
        endpoint_prefix(rest.trim_start())
    })
}

/// Reads an `ip:port` token from the start of `text`.
fn endpoint_prefix(text: &str) -> Option<Endpoint> {
    let ip_len = text
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(text.len());
    let ip = text.get(..ip_len).filter(|ip| !ip.is_empty())?;
    let after_ip = text.get(ip_len..)?.strip_prefix(':')?;
    let port_len = after_ip
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(after_ip.len());
    let port = after_ip.get(..port_len)?.parse::<u16>().ok()?;
    Some(Endpoint {
        ip: ip.to_owned(),
        port,
    })
}

fn parse_players(reply: &str) -> Result<u32, StatusParseError> {
    let line = reply
        .lines()
        .find(|line| line.starts_with(PLAYERS_PREFIX))
        .ok_or(StatusParseError::MissingPlayers)?;
    first_integer(line).ok_or_else(|| StatusParseError::MissingPlayerCount {
        line: line.to_owned(),
    })
}

fn first_integer(line: &str) -> Option<u32> {
    let start = line.find(|ch: char| ch.is_ascii_digit())?;
    let digits = line.get(start..)?;
    let len = digits
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(digits.len());
    digits.get(..len)?.parse().ok()
}

fn parse_map(reply: &str) -> Option<String> {
    reply
        .lines()
        .filter(|line| line.starts_with(MAP_PREFIX))
        .find_map(|line| {
            let (_, value) = line.split_once(':')?;
            value.split_whitespace().next().map(str::to_owned)
        })
}
