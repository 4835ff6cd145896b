//! Top-level registry (§3 "Manager", §6 external interface). Owns the
//! per-infohash torrent actors, the manager-wide incoming-handshake set
//! (shared because an incoming handshake's destination torrent is unknown
//! until the info-hash phase completes), and the global connection-rate
//! budget — the one piece of state genuinely shared across torrents rather
//! than owned by a single actor.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::atom::From as AtomFrom;
use crate::bitfield::Bitfield;
use crate::blocklist::Blocklist;
use crate::config::Config;
use crate::handshake::{HandshakeOutcome, HandshakeResult};
use crate::meta::TorrentMeta;
use crate::pex::PexEntry;
use crate::reconnect::{Connector, RateBudget};
use crate::stats::TorrentStats;
use crate::torrent::{Command, CompletionStore, InfoHash, Query, Torrent, TorrentTx};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("no torrent registered for this infohash")]
    UnknownTorrent,
    #[error("address is blocklisted")]
    Blocklisted,
    #[error("address is already mid-handshake")]
    AlreadyHandshaking,
    #[error("torrent actor channel closed")]
    ActorGone,
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// Owns every registered torrent and the state genuinely shared across all
/// of them. Individual torrents serialize their own state by virtue of
/// being a single actor task (§9); this struct never touches a torrent's
/// internals directly, only through its `TorrentTx`.
pub struct Manager {
    torrents: BTreeMap<InfoHash, TorrentTx>,
    incoming: BTreeSet<SocketAddr>,
    rate_budget: Arc<Mutex<RateBudget>>,
    blocklist: Arc<dyn Blocklist>,
    connector: Arc<dyn Connector>,
    config: Config,
}

impl Manager {
    pub fn new(blocklist: Arc<dyn Blocklist>, connector: Arc<dyn Connector>, config: Config) -> Self {
        Self {
            torrents: BTreeMap::new(),
            incoming: BTreeSet::new(),
            rate_budget: Arc::new(Mutex::new(RateBudget::with_capacity(config.max_connections_per_second))),
            blocklist,
            connector,
            config,
        }
    }

    pub fn add_torrent(&mut self, infohash: InfoHash, meta: TorrentMeta, completion: Box<dyn CompletionStore>) {
        let tx = Torrent::spawn(
            infohash,
            meta,
            completion,
            self.blocklist.clone(),
            self.connector.clone(),
            self.rate_budget.clone(),
            self.config.clone(),
        );
        self.torrents.insert(infohash, tx);
    }

    pub fn remove_torrent(&mut self, infohash: &InfoHash) {
        if let Some(tx) = self.torrents.remove(infohash) {
            let _ = tx.send(Command::Stop);
        }
    }

    pub fn start_torrent(&self, infohash: &InfoHash) -> Result<()> {
        self.send(infohash, Command::Start)
    }

    pub fn stop_torrent(&self, infohash: &InfoHash) -> Result<()> {
        self.send(infohash, Command::Stop)
    }

    /// Attaches `address` to the manager-global incoming-handshake set,
    /// unless it's blocklisted or already mid-handshake somewhere.
    pub fn add_incoming(&mut self, address: SocketAddr) -> Result<()> {
        let ip = match address.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => return Ok(()),
        };
        if self.blocklist.is_blocked(ip) {
            return Err(ManagerError::Blocklisted);
        }
        if !self.incoming.insert(address) {
            return Err(ManagerError::AlreadyHandshaking);
        }
        Ok(())
    }

    pub async fn on_handshake_done(&mut self, infohash: Option<&InfoHash>, result: HandshakeResult) -> Result<HandshakeOutcome> {
        let address = result.io.address();
        self.incoming.remove(&address);

        let Some(infohash) = infohash else {
            return Ok(HandshakeOutcome::Failed);
        };
        let tx = self.torrents.get(infohash).ok_or(ManagerError::UnknownTorrent)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::HandshakeDone(result, reply_tx)).map_err(|_| ManagerError::ActorGone)?;
        reply_rx.await.map_err(|_| ManagerError::ActorGone)
    }

    pub fn add_pex(&self, infohash: &InfoHash, from: AtomFrom, entries: Vec<PexEntry>) -> Result<()> {
        self.send(infohash, Command::AddPex { from, entries })
    }

    pub fn set_blame(&self, infohash: &InfoHash, piece_idx: usize, success: bool) -> Result<()> {
        self.send(infohash, Command::SetBlame { piece_idx, success })
    }

    pub async fn peer_is_seed(&self, infohash: &InfoHash, address: SocketAddr) -> Result<Option<bool>> {
        self.query(infohash, |tx| Query::PeerIsSeed(address, tx)).await
    }

    pub async fn has_connections(&self, infohash: &InfoHash) -> Result<bool> {
        self.query(infohash, Query::HasConnections).await
    }

    pub async fn get_available(&self, infohash: &InfoHash) -> Result<Bitfield> {
        self.query(infohash, Query::Available).await
    }

    pub async fn torrent_availability(&self, infohash: &InfoHash) -> Result<Vec<usize>> {
        self.query(infohash, Query::Availability).await
    }

    pub async fn torrent_stats(&self, infohash: &InfoHash) -> Result<TorrentStats> {
        self.query(infohash, Query::Stats).await
    }

    pub async fn get_peers(&self, infohash: &InfoHash) -> Result<Vec<PexEntry>> {
        self.query(infohash, Query::Peers).await
    }

    pub fn generate_allowed_set(&self, k: u32, sz: u32, infohash: &InfoHash, peer_ip: std::net::Ipv4Addr) -> Bitfield {
        crate::allowed_set::generate_allowed_set(k, sz, infohash, peer_ip)
    }

    fn send(&self, infohash: &InfoHash, command: Command) -> Result<()> {
        let tx = self.torrents.get(infohash).ok_or(ManagerError::UnknownTorrent)?;
        tx.send(command).map_err(|_| ManagerError::ActorGone)
    }

    async fn query<T>(&self, infohash: &InfoHash, build: impl FnOnce(oneshot::Sender<T>) -> Query) -> Result<T> {
        let tx = self.torrents.get(infohash).ok_or(ManagerError::UnknownTorrent)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Query(build(reply_tx))).map_err(|_| ManagerError::ActorGone)?;
        reply_rx.await.map_err(|_| ManagerError::ActorGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::BitfieldExt;
    use crate::blocklist::SetBlocklist;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    struct AlwaysConnects;
    #[async_trait::async_trait]
    impl Connector for AlwaysConnects {
        async fn connect(&self, _addr: SocketAddr) -> bool {
            true
        }
    }

    struct FullCompletion {
        owned: Bitfield,
    }
    impl CompletionStore for FullCompletion {
        fn owned_blocks(&self) -> &Bitfield {
            &self.owned
        }
        fn is_seeding(&self) -> bool {
            self.owned.count_ones() == self.owned.len()
        }
        fn recheck_completeness(&mut self) {}
    }

    fn infohash(byte: u8) -> InfoHash {
        [byte; 20]
    }

    #[tokio::test]
    async fn unknown_torrent_queries_error() {
        let mgr = Manager::new(Arc::new(SetBlocklist::new()), Arc::new(AlwaysConnects), Config::default());
        let result = mgr.has_connections(&infohash(1)).await;
        assert!(matches!(result, Err(ManagerError::UnknownTorrent)));
    }

    #[tokio::test]
    async fn add_torrent_then_query_stats_succeeds() {
        let mut mgr = Manager::new(Arc::new(SetBlocklist::new()), Arc::new(AlwaysConnects), Config::default());
        let meta = TorrentMeta::new(4, crate::block::BLOCK_SIZE, crate::block::BLOCK_SIZE);
        let owned = Bitfield::new_zeroed(meta.total_blocks());
        let ih = infohash(2);
        mgr.add_torrent(ih, meta, Box::new(FullCompletion { owned }));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stats = mgr.torrent_stats(&ih).await.unwrap();
        assert_eq!(stats.connected_peers, 0);
    }

    #[tokio::test]
    async fn incoming_handshake_cannot_be_attached_twice() {
        let mut mgr = Manager::new(Arc::new(SetBlocklist::new()), Arc::new(AlwaysConnects), Config::default());
        let addr = SocketAddr::new(Ipv4Addr::new(1, 2, 3, 4).into(), 1);
        assert!(mgr.add_incoming(addr).is_ok());
        assert!(matches!(mgr.add_incoming(addr), Err(ManagerError::AlreadyHandshaking)));
    }

    #[tokio::test]
    async fn global_rate_limit_caps_promotions_per_second() {
        let config = Config { max_reconnections_per_pulse: 1, ..Config::default() };
        let mut mgr = Manager::new(Arc::new(SetBlocklist::new()), Arc::new(AlwaysConnects), config);

        for i in 0..16u8 {
            let meta = TorrentMeta::new(1, crate::block::BLOCK_SIZE, crate::block::BLOCK_SIZE);
            let owned = Bitfield::new_zeroed(meta.total_blocks());
            let ih = infohash(i);
            mgr.add_torrent(ih, meta, Box::new(FullCompletion { owned }));
            mgr.start_torrent(&ih).unwrap();
        }
        // 16 torrents each eligible for at most 1 promotion per reconnect
        // pulse, but only 8 per wall-clock second globally: asserting the
        // exact interleaving requires driving each actor's reconnect timer,
        // which is exercised directly against `RateBudget` in reconnect.rs;
        // this test only checks the budget object itself is shared.
        let budget = mgr.rate_budget.clone();
        let now = std::time::Instant::now();
        let mut consumed = 0;
        for _ in 0..16 {
            if budget.lock().await.try_consume(now) {
                consumed += 1;
            }
        }
        assert_eq!(consumed, 8);
    }
}
