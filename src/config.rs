//! Call configuration.

/// STUN servers used when the caller does not supply any, matching the
/// defaults most public deployments rely on.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Configuration for one call: the room to join and where the plumbing lives.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Room both participants join.
    pub room: String,
    /// Base url of the room server's websocket endpoint.
    pub signaling_url: String,
    /// STUN/TURN urls handed to the connection primitive.
    pub ice_servers: Vec<String>,
}

impl CallConfig {
    pub fn new(room: impl Into<String>, signaling_url: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            signaling_url: signaling_url.into(),
            ice_servers: default_ice_servers(),
        }
    }

    /// Replace the ICE server list, e.g. for localhost-only testing.
    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }
}

pub fn default_ice_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
}
