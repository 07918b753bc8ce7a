//! Beacon/announcement dispatch and proactive link probing.
//!
//! Unifies beacon timer rearming into a single place (`on_beacon_timer`),
//! per `spec.md` §9's design note — the original only reset its own timer
//! from the sink branch of `send_beacon`, relying on rebroadcast-on-receive
//! for everyone else.

use bytes::Bytes;
use quanta::Instant;

use crate::address::Address;
use crate::config::UNIT;
use crate::connection::Connection;
use crate::packet::{OutgoingBeacon, QueuedPacket};
use crate::ports::Ports;
use crate::wire::BeaconPayload;

impl<P: Ports> Connection<P> {
    /// An announcement broadcast was heard from `from`, advertising `value`
    /// as their current rtmetric.
    ///
    /// A brand-new neighbour is `add()`ed (fresh link-metric estimate, since
    /// there is nothing to preserve); an already-known one only has its
    /// rtmetric/age refreshed, keeping whatever link-metric estimate actual
    /// traffic has already earned it — `spec.md` §4.8 draws exactly this
    /// "add" vs. "update" distinction. Routing `add()` on every routine
    /// refresh would wipe a neighbour's measured ETX back to the
    /// conservative default on each announcement cycle, which would make
    /// multi-hop routes impossible to keep once found.
    pub fn on_announcement_received(&mut self, now: Instant, from: Address, value: u16) {
        let previous = self.neighbours.find(from).map(|n| n.rtmetric);

        match previous {
            Some(_) => {
                if let Some(n) = self.neighbours.find_mut(from) {
                    n.update_rtmetric(value);
                }
            }
            None if value < self.rtmetric => {
                let cfg = self.cfg.clone();
                self.neighbours.add(&cfg, from, value);
            }
            None => {}
        }

        if let Some(previous) = previous {
            if value == crate::config::RTMETRIC_MAX && previous != crate::config::RTMETRIC_MAX {
                self.bump_advertisement();
            }
        }

        self.update_rtmetric(now);
    }

    /// A beacon broadcast was heard from `from`. Unlike announcements,
    /// hearing any beacon accelerates a non-sink's own rebroadcast.
    pub fn on_beacon_received(&mut self, now: Instant, from: Address, header: BeaconPayload) {
        if !self.is_sink {
            self.beacon_period = self.cfg.rebroadcast_time;
            self.arm_beacon_timer(now);
        }
        if let Some(n) = self.neighbours.find_mut(from) {
            n.update_rtmetric(header.rtmetric);
        }
        self.update_rtmetric(now);
    }

    /// The beacon timer deadline was reached: broadcast the current
    /// rtmetric and re-arm. Sinks widen their own period back out to
    /// `beaconing_period` on every send; non-sinks keep whatever period
    /// `on_beacon_received` last set (or the caller's `set_beacon_period`).
    pub fn on_beacon_timer(&mut self, now: Instant) {
        let header = BeaconPayload::new(self.rtmetric, self.beacon_seqno);
        self.beacon_seqno = self.beacon_seqno.wrapping_add(1);
        self.ports.broadcast_send(OutgoingBeacon { header });

        if self.is_sink {
            self.beacon_period = self.cfg.beaconing_period;
        }
        self.arm_beacon_timer(now);
    }

    /// The proactive-probing timer deadline was reached: if idle and
    /// routed, spend one probe packet on an under-sampled short-path
    /// neighbour to measure its link quality, then fall back to the
    /// normal parent for anything that doesn't complete on the first try.
    pub fn on_proactive_probing_timer(&mut self, now: Instant) {
        if !self.is_sink && !self.parent.is_null() && self.send_queue.is_empty() {
            let candidate = self
                .neighbours
                .iter()
                .find(|n| {
                    n.rtmetric.saturating_add(UNIT) < self.rtmetric
                        && n.link_metric.num_estimates() == 0
                })
                .map(|n| n.addr);

            if let Some(candidate) = candidate {
                let original_parent = self.parent;
                // Temporarily steer the dispatch at `candidate` so this one
                // probe packet actually measures it; `current_parent` keeps
                // the in-flight attempt addressed there even after `parent`
                // is restored below, so only this packet is affected.
                self.parent = candidate;
                let item = QueuedPacket {
                    esender: self.addr,
                    epacket_id: self.next_eseqno(),
                    ttl: self.cfg.max_hoplim,
                    hops: 1,
                    max_rexmit: self.cfg.proactive_probing_rexmits,
                    payload: Bytes::new(),
                    enqueue_time: now,
                    lifetime: self.cfg.forward_packet_lifetime_base
                        * self.cfg.proactive_probing_rexmits.max(1) as u32,
                };
                let cfg = self.cfg.clone();
                if self.send_queue.enqueue_self(&cfg, item) {
                    self.send_queued_packet(now);
                }
                self.parent = original_parent;
            }
        }
        self.arm_proactive_probing_timer(now);
    }

    /// The neighbour table's periodic aging tick deadline was reached.
    pub fn on_periodic_timer(&mut self, now: Instant) {
        let cfg = self.cfg.clone();
        let outcome = self.neighbours.tick(&cfg);
        if !outcome.removed.is_empty() || !outcome.metric_reset.is_empty() {
            self.update_rtmetric(now);
        }
        self.arm_periodic_timer(now);
    }
}
