//! Bounded neighbour set with aging/eviction and best-parent selection.

use quanta::Instant;

use crate::address::Address;
use crate::config::{ConnectionConfig, RTMETRIC_MAX};
use crate::neighbour::Neighbour;

#[derive(Debug, Clone, Default)]
pub struct NeighbourTable {
    neighbours: Vec<Neighbour>,
}

/// Outcome of a periodic aging tick, for the caller to react to (route
/// recomputation, logging, etc.).
#[derive(Debug, Default)]
pub struct PeriodicOutcome {
    pub removed: Vec<Address>,
    pub metric_reset: Vec<Address>,
}

impl NeighbourTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num(&self) -> usize {
        self.neighbours.len()
    }

    pub fn find(&self, addr: Address) -> Option<&Neighbour> {
        self.neighbours.iter().find(|n| n.addr == addr)
    }

    pub fn find_mut(&mut self, addr: Address) -> Option<&mut Neighbour> {
        self.neighbours.iter_mut().find(|n| n.addr == addr)
    }

    pub fn get(&self, i: usize) -> Option<&Neighbour> {
        self.neighbours.get(i)
    }

    pub fn remove(&mut self, addr: Address) -> bool {
        let before = self.neighbours.len();
        self.neighbours.retain(|n| n.addr != addr);
        self.neighbours.len() != before
    }

    pub fn purge(&mut self) {
        self.neighbours.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbour> {
        self.neighbours.iter()
    }

    /// Add or refresh a neighbour. Returns `true` if accepted.
    ///
    /// If `addr` already exists, its rtmetric is overwritten, its age reset,
    /// and its link metric fully reinitialised. Otherwise the neighbour is
    /// appended if there is free capacity; if full, it evicts the current
    /// worst (highest-rtmetric) neighbour iff the newcomer's rtmetric is
    /// strictly better, otherwise the insertion is rejected.
    pub fn add(&mut self, cfg: &ConnectionConfig, addr: Address, rtmetric: u16) -> bool {
        if let Some(n) = self.find_mut(addr) {
            n.rtmetric = rtmetric;
            n.age = 0;
            n.link_metric = crate::link_metric::LinkMetric::new();
            n.metric_age = 0;
            return true;
        }

        if self.neighbours.len() < cfg.max_neighbours {
            self.neighbours.push(Neighbour::new(addr, rtmetric));
            return true;
        }

        let worst_idx = self
            .neighbours
            .iter()
            .enumerate()
            .max_by_key(|(_, n)| n.rtmetric)
            .map(|(i, _)| i);

        if let Some(idx) = worst_idx {
            if rtmetric < self.neighbours[idx].rtmetric {
                self.neighbours[idx] = Neighbour::new(addr, rtmetric);
                return true;
            }
        }
        false
    }

    /// Neighbour minimising the composite metric (rtmetric + effective link
    /// cost), ties broken by first encountered. `None` if the table is
    /// empty or every neighbour's composite metric is `>= RTMETRIC_MAX`.
    pub fn best(&self, now: Instant, cfg: &ConnectionConfig) -> Option<&Neighbour> {
        self.neighbours
            .iter()
            .filter(|n| n.composite_metric(now, cfg) < RTMETRIC_MAX as u32)
            .min_by_key(|n| n.composite_metric(now, cfg))
    }

    /// Advance aging on every neighbour by one periodic tick; reset link
    /// metrics and evict entries that hit their ceilings.
    pub fn tick(&mut self, cfg: &ConnectionConfig) -> PeriodicOutcome {
        let mut outcome = PeriodicOutcome::default();
        let mut to_remove = Vec::new();

        for n in self.neighbours.iter_mut() {
            let r = n.tick(cfg);
            if r.metric_reset {
                outcome.metric_reset.push(n.addr);
            }
            if r.expired {
                to_remove.push(n.addr);
            }
        }

        for addr in &to_remove {
            self.remove(*addr);
        }
        outcome.removed = to_remove;
        outcome
    }
}
