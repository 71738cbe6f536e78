//! Firewall groups scoped to a single server.

use crate::console::DEFAULT_CONSOLE_PORT;
use crate::domain::{Region, ServerId};
use crate::future::BoxFuture;

use super::{BackendError, DEFAULT_TV_PORT};

/// Transport protocol of an inbound rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Protocol {
    /// Upper-case label used by provider APIs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

/// One inbound allow rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FirewallRule {
    /// Protocol.
    pub protocol: Protocol,
    /// Allowed port.
    pub port: u16,
}

/// Inbound rules every game server needs: game traffic, remote console, and
/// the spectator feed.
pub const GAME_SERVER_RULES: [FirewallRule; 4] = [
    FirewallRule {
        protocol: Protocol::Udp,
        port: DEFAULT_CONSOLE_PORT,
    },
    FirewallRule {
        protocol: Protocol::Tcp,
        port: DEFAULT_CONSOLE_PORT,
    },
    FirewallRule {
        protocol: Protocol::Udp,
        port: DEFAULT_TV_PORT,
    },
    FirewallRule {
        protocol: Protocol::Tcp,
        port: DEFAULT_TV_PORT,
    },
];

/// Provider client managing per-server firewall groups.
///
/// Groups are named after the server id so deletion needs nothing else.
pub trait FirewallService: Send + Sync {
    /// Creates the group for `server_id` and returns its provider id.
    fn create<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, String, BackendError>;

    /// Deletes the group for `server_id`.
    fn delete<'a>(
        &'a self,
        server_id: &'a ServerId,
        region: &'a Region,
    ) -> BoxFuture<'a, (), BackendError>;
}
