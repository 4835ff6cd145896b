//! BitTorrent peer manager: atom pool, reconnect/refill/rechoke pulses, and
//! allowed-set derivation for one or more running torrents.
//!
//! The wire-protocol codec, handshake state machine, tracker, disk I/O and
//! metainfo parsing all live outside this crate (see [`peer::PeerIo`],
//! [`peer::MessageSink`], [`handshake::HandshakeResult`],
//! [`torrent::CompletionStore`], [`reconnect::Connector`] and
//! [`blocklist::Blocklist`] for the seams).

#![allow(dead_code)]

pub mod allowed_set;
pub mod atom;
pub mod bitfield;
pub mod block;
pub mod blocklist;
pub mod config;
pub mod events;
pub mod handshake;
pub mod manager;
pub mod meta;
pub mod peer;
pub mod pex;
pub mod rechoke;
pub mod reconnect;
pub mod refill;
pub mod stats;
pub mod torrent;

pub type InfoHash = [u8; 20];
pub type PeerId = [u8; 20];

pub use config::Config;
pub use manager::{Manager, ManagerError};
pub use torrent::{CompletionStore, Torrent};
