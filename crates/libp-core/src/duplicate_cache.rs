//! Ring buffer of recently forwarded `(originator, extended_seqno)` pairs,
//! used to suppress re-enqueuing a packet a forwarder has already relayed.
//!
//! Zero-payload packets (probes/keepalives) are never recorded — see
//! `spec.md` §4.5.

use crate::address::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    originator: Address,
    eseqno: u16,
}

#[derive(Debug, Clone)]
pub struct DuplicateCache {
    entries: Vec<Option<Entry>>,
    next: usize,
}

impl DuplicateCache {
    pub fn new(capacity: usize) -> Self {
        DuplicateCache {
            entries: vec![None; capacity],
            next: 0,
        }
    }

    pub fn lookup(&self, originator: Address, eseqno: u16) -> bool {
        self.entries.iter().flatten().any(|e| {
            e.originator == originator && e.eseqno == eseqno
        })
    }

    pub fn insert(&mut self, originator: Address, eseqno: u16) {
        self.entries[self.next] = Some(Entry { originator, eseqno });
        self.next = (self.next + 1) % self.entries.len();
    }
}
