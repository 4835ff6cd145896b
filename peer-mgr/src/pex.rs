//! Compact peer-exchange encode/decode (§6). Construction of the PEX
//! extension message itself is out of scope; this is just the
//! compact-bytes <-> structured-list conversion utility.

use std::net::{Ipv4Addr, SocketAddrV4};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PexEntry {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub flags: u8,
}

impl PexEntry {
    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.addr, self.port)
    }
}

/// Parses 6-byte compact records (4-byte big-endian IPv4 + 2-byte
/// big-endian port), optionally paired with a parallel `added.f` flags
/// array. A trailing partial record is ignored.
pub fn compact_to_pex(compact: &[u8], added_f: Option<&[u8]>) -> Vec<PexEntry> {
    let num_records = compact.len() / 6;
    let mut out = Vec::with_capacity(num_records);

    for i in 0..num_records {
        let rec = &compact[i * 6..i * 6 + 6];
        let addr = Ipv4Addr::new(rec[0], rec[1], rec[2], rec[3]);
        let port = u16::from_be_bytes([rec[4], rec[5]]);
        let flags = added_f.and_then(|f| f.get(i)).copied().unwrap_or(0);
        out.push(PexEntry { addr, port, flags });
    }

    out
}

/// Serializes a PEX list back into compact form: 6-byte records followed,
/// if any entry carries non-zero flags, by a parallel `added.f` array.
pub fn pex_to_compact(entries: &[PexEntry]) -> (Vec<u8>, Option<Vec<u8>>) {
    let mut compact = Vec::with_capacity(entries.len() * 6);
    let mut added_f = Vec::with_capacity(entries.len());
    let mut any_flags = false;

    for entry in entries {
        compact.extend_from_slice(&entry.addr.octets());
        compact.extend_from_slice(&entry.port.to_be_bytes());
        added_f.push(entry.flags);
        any_flags |= entry.flags != 0;
    }

    (compact, any_flags.then_some(added_f))
}
