use std::time::Duration;

/// Tunables for the four pulses and the connection/choke budgets they enforce.
///
/// Defaults match the reference client's compiled-in constants.
#[derive(Debug, Clone)]
pub struct Config {
    /// How frequently the rechoke pulse runs.
    pub rechoke_period: Duration,

    /// Delay between a NEED_REQ event and the refill pulse it arms.
    pub refill_period: Duration,

    /// How frequently the reconnect pulse runs.
    pub reconnect_period: Duration,

    /// Idle time after which a peer we're downloading from is considered snubbed.
    pub snubbed: Duration,

    /// Idle-time limit at zero connections.
    pub min_upload_idle: Duration,

    /// Idle-time limit at/above `relax_strictness_at` fraction of max peers.
    pub max_upload_idle: Duration,

    /// Max atoms promoted to outgoing handshakes per torrent per reconnect pulse.
    pub max_reconnections_per_pulse: usize,

    /// Max promotions across all torrents per wall-clock second.
    pub max_connections_per_second: usize,

    /// Number of unchoked peers (regular, excludes the optimistic slot).
    pub max_unchoked_peers: usize,

    /// Strikes before an atom is banned.
    pub max_bad_pieces_per_peer: u8,

    /// Failed connection attempts after which an atom stops being eligible
    /// for reconnection.
    pub max_connection_fails: u16,

    /// Max live peers per torrent.
    pub max_peers_per_torrent: usize,

    /// Block-request queue depth kept topped up per peer by the refill pulse.
    pub target_request_queue_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rechoke_period: Duration::from_secs(10),
            refill_period: Duration::from_millis(666),
            reconnect_period: Duration::from_secs(2),
            snubbed: Duration::from_secs(60),
            min_upload_idle: Duration::from_secs(180),
            max_upload_idle: Duration::from_secs(600),
            max_reconnections_per_pulse: 1,
            max_connections_per_second: 8,
            max_unchoked_peers: 12,
            max_bad_pieces_per_peer: 3,
            max_connection_fails: 3,
            max_peers_per_torrent: 60,
            target_request_queue_len: 20,
        }
    }
}
