//! Per-torrent actor (§3 "Torrent", §5 concurrency model): an `mpsc`
//! command-channel actor owning one torrent's atom pool, peer set,
//! outgoing-handshake set, `requested` bitfield, and its three pulses.
//! Single-writer ownership of `TorrentState` by this task *is* the
//! "global lock" in the message-passing realization §9 sanctions as
//! equivalent to a literal mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, MissedTickBehavior};

use crate::atom::{AtomPool, From as AtomFrom};
use crate::bitfield::{Bitfield, BitfieldExt};
use crate::blocklist::Blocklist;
use crate::config::Config;
use crate::events::{self, Action, Event};
use crate::handshake::{self, HandshakeOutcome, HandshakeResult};
use crate::meta::TorrentMeta;
use crate::peer::Peer;
use crate::pex::PexEntry;
use crate::reconnect::{self, Connector, RateBudget};
use crate::rechoke;
use crate::refill;
use crate::stats::{self, TorrentStats};

pub use crate::InfoHash;

/// The torrent orchestration layer's view of piece ownership (§1: external
/// collaborator). The peer manager never validates or stores piece bytes;
/// it only ever reads this narrow view.
pub trait CompletionStore: Send {
    /// Bitfield over global block indices, set for every block we already own.
    fn owned_blocks(&self) -> &Bitfield;
    /// True once every piece is owned: switches the rechoke rate direction
    /// and the reconnect "seed courtesy disconnect" rule.
    fn is_seeding(&self) -> bool;
    /// Invoked after a `CLIENT_HAVE` event so the orchestration layer can
    /// re-derive `is_seeding` from the updated bitfield.
    fn recheck_completeness(&mut self);
}

/// Commands routed into a torrent's actor task, from the manager or
/// directly from the (out-of-scope) message/handshake layers.
pub enum Command {
    Start,
    Stop,
    PeerEvent { address: SocketAddr, event: Event },
    HandshakeDone(HandshakeResult, oneshot::Sender<HandshakeOutcome>),
    SetBlame { piece_idx: usize, success: bool },
    AddPex { from: AtomFrom, entries: Vec<PexEntry> },
    Query(Query),
}

pub enum Query {
    PeerIsSeed(SocketAddr, oneshot::Sender<Option<bool>>),
    HasConnections(oneshot::Sender<bool>),
    Available(oneshot::Sender<Bitfield>),
    Availability(oneshot::Sender<Vec<usize>>),
    Stats(oneshot::Sender<TorrentStats>),
    Peers(oneshot::Sender<Vec<PexEntry>>),
}

pub type TorrentTx = mpsc::UnboundedSender<Command>;

/// The mutable state owned exclusively by one torrent's actor task.
/// Invariant: `is_running` iff the three pulse timers are live (enforced by
/// the actor's select loop gating on this flag).
pub struct TorrentState {
    pub infohash: InfoHash,
    pub meta: TorrentMeta,
    pub pool: AtomPool,
    pub peers: BTreeMap<SocketAddr, Peer>,
    pub outgoing: BTreeSet<SocketAddr>,
    pub requested: Bitfield,
    pub optimistic: Option<SocketAddr>,
    pub is_running: bool,
    pub refill_armed: bool,
}

impl TorrentState {
    pub fn new(infohash: InfoHash, meta: TorrentMeta) -> Self {
        let requested = Bitfield::new_zeroed(meta.total_blocks());
        Self {
            infohash,
            meta,
            pool: AtomPool::new(),
            peers: BTreeMap::new(),
            outgoing: BTreeSet::new(),
            requested,
            optimistic: None,
            is_running: false,
            refill_armed: false,
        }
    }
}

pub struct Torrent {
    state: TorrentState,
    completion: Box<dyn CompletionStore>,
    blocklist: Arc<dyn Blocklist>,
    connector: Arc<dyn Connector>,
    rate_budget: Arc<Mutex<RateBudget>>,
    config: Config,
    rng: StdRng,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl Torrent {
    /// Spawns the actor task and returns a handle other tasks can send
    /// commands through.
    pub fn spawn(
        infohash: InfoHash,
        meta: TorrentMeta,
        completion: Box<dyn CompletionStore>,
        blocklist: Arc<dyn Blocklist>,
        connector: Arc<dyn Connector>,
        rate_budget: Arc<Mutex<RateBudget>>,
        config: Config,
    ) -> TorrentTx {
        let (tx, rx) = mpsc::unbounded_channel();
        let torrent = Torrent {
            state: TorrentState::new(infohash, meta),
            completion,
            blocklist,
            connector,
            rate_budget,
            config,
            rng: StdRng::from_entropy(),
            rx,
        };
        tokio::spawn(torrent.run());
        tx
    }

    #[tracing::instrument(skip(self), fields(infohash = %hex::encode(self.state.infohash)))]
    async fn run(mut self) {
        let mut rechoke_timer = interval(self.config.rechoke_period);
        rechoke_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconnect_timer = interval(self.config.reconnect_period);
        reconnect_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refill_timer = interval(self.config.refill_period);
        refill_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                _ = rechoke_timer.tick(), if self.state.is_running => {
                    self.run_rechoke();
                }
                _ = reconnect_timer.tick(), if self.state.is_running => {
                    self.run_reconnect().await;
                }
                _ = refill_timer.tick(), if self.state.is_running && self.state.refill_armed => {
                    self.state.refill_armed = false;
                    self.run_refill();
                }
            }
        }

        tracing::info!("torrent actor exiting");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::PeerEvent { address, event } => self.on_event(address, event),
            Command::HandshakeDone(result, reply) => {
                let outcome = self.on_handshake(result);
                let _ = reply.send(outcome);
            }
            Command::SetBlame { piece_idx, success } => {
                events::set_blame(
                    piece_idx,
                    success,
                    &mut self.state.peers,
                    &mut self.state.pool,
                    self.config.max_bad_pieces_per_peer,
                );
            }
            Command::AddPex { from, entries } => self.add_pex(from, entries),
            Command::Query(query) => self.answer(query),
        }
    }

    /// `isRunning ⇔ timers live`: realized here by gating the select arms on
    /// the flag rather than constructing/destroying separate timer objects.
    fn start(&mut self) {
        self.state.is_running = true;
    }

    fn stop(&mut self) {
        self.state.is_running = false;
        self.state.peers.clear();
        self.state.outgoing.clear();
    }

    fn run_refill(&mut self) {
        if self.completion.is_seeding() {
            return;
        }
        refill::run_refill(
            &self.state.meta,
            self.completion.owned_blocks(),
            &mut self.state.requested,
            &mut self.state.peers,
            &mut self.rng,
        );
    }

    fn run_rechoke(&mut self) {
        let we_are_seeding = self.completion.is_seeding();
        self.state.optimistic = rechoke::run_rechoke(
            &mut self.state.peers,
            we_are_seeding,
            self.config.max_unchoked_peers,
            &mut self.rng,
        );
    }

    async fn run_reconnect(&mut self) {
        let we_are_seeding = self.completion.is_seeding();
        let now = tokio::time::Instant::now().into_std();

        reconnect::sweep_closures(
            &mut self.state.peers,
            &mut self.state.pool,
            we_are_seeding,
            |peer| {
                // "Peer has every piece we have" under a courtesy
                // seed-to-seed disconnect: approximated by the peer itself
                // reporting SEED progress, since full bitfield comparison
                // needs the completion store's owned set.
                peer.is_seed()
            },
            true,
            self.config.max_peers_per_torrent,
            self.config.min_upload_idle,
            self.config.max_upload_idle,
            now,
        );

        if !self.state.is_running {
            self.state.peers.clear();
            return;
        }

        let outgoing = &self.state.outgoing;
        let peers = &self.state.peers;
        let in_use = |ip: std::net::Ipv4Addr| {
            peers.keys().any(|a| a.ip() == ip) || outgoing.iter().any(|a| a.ip() == ip)
        };

        let candidates = reconnect::select_candidates(
            &self.state.pool,
            in_use,
            we_are_seeding,
            self.blocklist.as_ref(),
            self.config.max_connection_fails,
            now,
        );

        let mut promoted = 0;
        for ip in candidates {
            if promoted >= self.config.max_reconnections_per_pulse {
                break;
            }
            let mut budget = self.rate_budget.lock().await;
            if !budget.try_consume(now) {
                break;
            }
            drop(budget);

            let Some(port) = self.state.pool.get(ip).map(|atom| atom.port) else { continue };
            let addr = SocketAddr::new(ip.into(), port);
            let opened = self.connector.connect(addr).await;

            if let Some(atom) = self.state.pool.get_mut(ip) {
                atom.time = now;
                if opened {
                    self.state.outgoing.insert(addr);
                } else {
                    atom.mark_unreachable();
                }
            }
            promoted += 1;
        }
    }

    fn on_event(&mut self, address: SocketAddr, event: Event) {
        let now = tokio::time::Instant::now().into_std();
        let action = events::handle_event(
            event,
            address,
            &mut self.state.peers,
            &mut self.state.pool,
            &mut self.state.requested,
            &mut self.state.refill_armed,
            &self.state.meta,
            self.config.max_bad_pieces_per_peer,
            now,
        );
        match action {
            Some(Action::RecheckCompleteness) => self.completion.recheck_completeness(),
            Some(Action::StopTorrent) => self.stop(),
            None => {}
        }
    }

    fn on_handshake(&mut self, result: HandshakeResult) -> HandshakeOutcome {
        let address = result.io.address();
        self.state.outgoing.remove(&address);
        let now = tokio::time::Instant::now().into_std();
        handshake::resolve_handshake(
            result,
            self.state.is_running,
            &mut self.state.pool,
            &mut self.state.peers,
            self.config.max_peers_per_torrent,
            self.state.meta.num_pieces as usize,
            now,
        )
    }

    fn add_pex(&mut self, from: AtomFrom, entries: Vec<PexEntry>) {
        let now = tokio::time::Instant::now().into_std();
        for entry in entries {
            if self.blocklist.is_blocked(entry.addr) {
                continue;
            }
            self.state.pool.ensure_exists(entry.addr, entry.port, entry.flags, from, now);
        }
    }

    fn answer(&mut self, query: Query) {
        match query {
            Query::PeerIsSeed(addr, reply) => {
                let _ = reply.send(self.state.peers.get(&addr).map(|p| p.is_seed()));
            }
            Query::HasConnections(reply) => {
                let _ = reply.send(!self.state.peers.is_empty());
            }
            Query::Available(reply) => {
                let mut available = Bitfield::new_zeroed(self.state.meta.num_pieces as usize);
                for peer in self.state.peers.values() {
                    peer.have.union_into(&mut available);
                }
                let _ = reply.send(available);
            }
            Query::Availability(reply) => {
                let _ = reply.send(stats::torrent_availability(&self.state.meta, &self.state.peers));
            }
            Query::Stats(reply) => {
                let _ = reply.send(stats::torrent_stats(&self.state.pool, &self.state.peers));
            }
            Query::Peers(reply) => {
                let entries = self
                    .state
                    .peers
                    .values()
                    .filter_map(|p| match p.address.ip() {
                        std::net::IpAddr::V4(v4) => Some(PexEntry { addr: v4, port: p.port, flags: 0 }),
                        std::net::IpAddr::V6(_) => None,
                    })
                    .collect();
                let _ = reply.send(entries);
            }
        }
    }
}
