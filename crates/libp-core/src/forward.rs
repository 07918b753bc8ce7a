//! Send/forward/ACK state machine: queueing, retransmission timing,
//! congestion and TTL handling. The largest component by design weight —
//! everything here is driven externally (`send`, `on_mac_send_complete`,
//! `on_retransmission_timer`, `on_data_received`, `on_ack_received`) and
//! never blocks or owns a clock of its own.

use bytes::Bytes;
use quanta::Instant;

use crate::address::Address;
use crate::config::RTMETRIC_MAX;
use crate::connection::{Connection, RetransmitTimerMode};
use crate::packet::{
    CurrentPacket, DataAttrs, IncomingAckPacket, IncomingDataPacket, OutgoingAckPacket,
    OutgoingDataPacket, OutgoingFrame, QueuedPacket,
};
use crate::ports::Ports;
use crate::wire::{ack_flags, AckPayload, DataHeader};

impl<P: Ports> Connection<P> {
    /// `send(rexmits)`: originate a payload. Returns `true` if the packet
    /// was delivered locally (this node is the sink) or admitted to the
    /// send queue; `false` if the queue was full.
    pub fn send(&mut self, payload: Bytes, rexmits: u8, now: Instant) -> bool {
        let epacket_id = self.next_eseqno();
        let max_rexmit = rexmits.min(self.cfg.max_rexmits);

        if self.is_sink {
            self.stats.datarecv += 1;
            self.ports.recv(self.addr, epacket_id, 1);
            return true;
        }

        let item = QueuedPacket {
            esender: self.addr,
            epacket_id,
            ttl: self.cfg.max_hoplim,
            hops: 1,
            max_rexmit,
            payload,
            enqueue_time: now,
            lifetime: self.cfg.forward_packet_lifetime_base * max_rexmit.max(1) as u32,
        };

        let cfg = self.cfg.clone();
        let enqueued = self.send_queue.enqueue_self(&cfg, item);
        if enqueued {
            self.send_queued_packet(now);
        } else {
            self.stats.qdrop += 1;
        }
        enqueued
    }

    /// `send_queued_packet`: dispatch the head of the send queue to the
    /// MAC port, if nothing is already in flight and a route exists.
    pub(crate) fn send_queued_packet(&mut self, now: Instant) {
        if self.sending {
            return;
        }

        loop {
            match self.send_queue.peek_front() {
                None => return,
                Some(item) if item.is_expired(now) => {
                    self.send_queue.pop_front();
                    self.stats.qdrop += 1;
                }
                Some(_) => break,
            }
        }

        if self.parent.is_null() || self.neighbours.find(self.parent).is_none() {
            // No usable next hop yet; the packet stays queued and will be
            // retried the next time the route changes.
            return;
        }

        let item = match self.send_queue.pop_front() {
            Some(item) => item,
            None => return,
        };

        self.sending = true;
        self.current_parent = self.parent;
        self.transmissions = 0;
        self.max_rexmits = item.max_rexmit;
        self.current_packet = Some(CurrentPacket {
            esender: item.esender,
            epacket_id: item.epacket_id,
            ttl: item.ttl,
            hops: item.hops,
            max_rexmit: item.max_rexmit,
            payload: item.payload.clone(),
        });

        let header = DataHeader::new(self.rtmetric);
        let attrs = DataAttrs {
            esender: item.esender,
            epacket_id: item.epacket_id,
            packet_id: self.seqno,
            ttl: item.ttl,
            hops: item.hops,
            max_rexmit: item.max_rexmit,
            reliable: true,
            max_mac_transmissions: self.max_rexmits.min(self.cfg.max_mac_rexmits),
        };
        let frame = OutgoingFrame::Data(OutgoingDataPacket {
            attrs,
            header,
            payload: item.payload,
        });

        // Defensive watchdog: fires only if the MAC never reports back.
        self.retransmission_timer = Some(now + self.cfg.rexmit_time * 16);
        self.retransmission_mode = RetransmitTimerMode::NotSent;

        self.stats.datasent += 1;
        self.ports.unicast_send(self.current_parent, frame);
    }

    /// `node_packet_sent`: the MAC reports `n_tx` cumulative transmission
    /// attempts for the in-flight DATA packet.
    pub fn on_mac_send_complete(&mut self, now: Instant, n_tx: u8) {
        if !self.sending {
            return;
        }
        self.transmissions = self.transmissions.saturating_add(n_tx);
        if self.transmissions >= self.max_rexmits {
            self.timedout(now);
            return;
        }
        let half = self.cfg.rexmit_time / 2;
        let delay = half + self.jitter(half);
        self.retransmission_timer = Some(now + delay);
        self.retransmission_mode = RetransmitTimerMode::Backoff;
    }

    /// The embedding event loop calls this once `now` reaches
    /// [`Connection::retransmission_deadline`]; dispatch depends on which
    /// semantics are currently armed on that single timer slot.
    pub fn on_retransmission_timer(&mut self, now: Instant) {
        self.retransmission_timer = None;
        match self.retransmission_mode {
            RetransmitTimerMode::NotSent => self.on_mac_never_reported(now),
            RetransmitTimerMode::Backoff => self.on_retransmit_backoff(now),
        }
    }

    fn on_mac_never_reported(&mut self, now: Instant) {
        let extra = self.cfg.max_mac_rexmits.saturating_add(1);
        self.transmissions = self.transmissions.saturating_add(extra);
        if self.transmissions >= self.max_rexmits {
            self.timedout(now);
        } else {
            self.sending = false;
            self.retransmit_current_packet(now);
        }
    }

    fn on_retransmit_backoff(&mut self, now: Instant) {
        if self.transmissions >= self.max_rexmits {
            self.timedout(now);
        } else {
            self.sending = false;
            self.retransmit_current_packet(now);
        }
    }

    /// Re-emit the in-flight packet, switching to a freshly chosen parent
    /// if one was adopted mid-flight (prior attempts are not attributed to
    /// the new neighbour).
    pub(crate) fn retransmit_current_packet(&mut self, now: Instant) {
        let Some(cur) = self.current_packet.clone() else {
            return;
        };

        if self.current_parent != self.parent {
            self.current_parent = self.parent;
            self.transmissions = 0;
        }

        if self.current_parent.is_null() {
            self.sending = false;
            self.current_packet = None;
            return;
        }

        self.sending = true;
        let remaining = self.max_rexmits.saturating_sub(self.transmissions);
        let header = DataHeader::new(self.rtmetric);
        let attrs = DataAttrs {
            esender: cur.esender,
            epacket_id: cur.epacket_id,
            packet_id: self.seqno,
            ttl: cur.ttl,
            hops: cur.hops,
            max_rexmit: cur.max_rexmit,
            reliable: true,
            max_mac_transmissions: remaining.min(self.cfg.max_mac_rexmits),
        };
        let frame = OutgoingFrame::Data(OutgoingDataPacket {
            attrs,
            header,
            payload: cur.payload,
        });

        self.retransmission_timer = Some(now + self.cfg.rexmit_time * 16);
        self.retransmission_mode = RetransmitTimerMode::NotSent;
        self.ports.unicast_send(self.current_parent, frame);
    }

    /// Give up on the in-flight packet: penalise the neighbour, recompute
    /// the route, and move on to the next queued packet.
    pub(crate) fn timedout(&mut self, now: Instant) {
        self.stats.timedout += 1;
        if let Some(n) = self.neighbours.find_mut(self.current_parent) {
            n.on_tx_fail(self.max_rexmits);
        }
        self.update_rtmetric(now);
        self.send_next_packet(now);
    }

    /// Clear in-flight bookkeeping, advance `seqno`, and dispatch whatever
    /// is next in the send queue.
    pub(crate) fn send_next_packet(&mut self, now: Instant) {
        self.current_packet = None;
        self.sending = false;
        self.transmissions = 0;
        self.retransmission_timer = None;
        self.next_seqno();
        self.send_queued_packet(now);
    }

    /// `node_packet_received` for `PACKET_TYPE = DATA`.
    pub fn on_data_received(&mut self, now: Instant, pkt: IncomingDataPacket) {
        if let Some(n) = self.neighbours.find_mut(pkt.from) {
            n.update_rtmetric(pkt.header.rtmetric);
        }
        self.update_rtmetric(now);

        let mut flags = 0u8;
        if self.send_queue.len() >= self.cfg.max_sending_queue / 2 {
            flags |= ack_flags::CONGESTED;
        }

        if self.dup_cache.lookup(pkt.esender, pkt.epacket_id) {
            self.stats.duprecv += 1;
            self.send_ack(pkt.from, pkt.packet_id, flags);
            return;
        }

        if self.is_sink {
            if !pkt.payload.is_empty() {
                self.dup_cache.insert(pkt.esender, pkt.epacket_id);
            }
            self.send_ack(pkt.from, pkt.packet_id, flags);
            self.stats.datarecv += 1;
            self.ports.recv(pkt.esender, pkt.epacket_id, pkt.hops);
            return;
        }

        if pkt.ttl > 1 && self.rtmetric != RTMETRIC_MAX {
            let sender_rtmetric = self.neighbours.find(pkt.from).map(|n| n.rtmetric);
            if sender_rtmetric.is_some_and(|r| r <= self.rtmetric) {
                flags |= ack_flags::RTMETRIC_NEEDS_UPDATE;
            }

            let item = QueuedPacket {
                esender: pkt.esender,
                epacket_id: pkt.epacket_id,
                ttl: pkt.ttl - 1,
                hops: pkt.hops.saturating_add(1),
                max_rexmit: pkt.max_rexmit,
                payload: pkt.payload.clone(),
                enqueue_time: now,
                lifetime: self.cfg.forward_packet_lifetime_base
                    * pkt.max_rexmit.max(1) as u32,
            };

            let cfg = self.cfg.clone();
            if self.send_queue.enqueue_forwarded(&cfg, item) {
                if !pkt.payload.is_empty() {
                    self.dup_cache.insert(pkt.esender, pkt.epacket_id);
                }
                self.send_ack(pkt.from, pkt.packet_id, flags);
                self.send_queued_packet(now);
            } else {
                self.stats.qdrop += 1;
                self.send_ack(
                    pkt.from,
                    pkt.packet_id,
                    flags | ack_flags::DROPPED | ack_flags::CONGESTED,
                );
            }
        } else {
            self.stats.ttldrop += 1;
            self.send_ack(
                pkt.from,
                pkt.packet_id,
                flags | ack_flags::DROPPED | ack_flags::LIFETIME_EXCEEDED,
            );
        }
    }

    fn send_ack(&mut self, to: Address, packet_id: u16, flags: u8) {
        let header = AckPayload {
            flags,
            reserved: 0,
            rtmetric: self.rtmetric,
        };
        let frame = OutgoingFrame::Ack(OutgoingAckPacket {
            packet_id,
            max_mac_transmissions: self.cfg.max_ack_mac_rexmits,
            header,
        });
        self.stats.acksent += 1;
        self.ports.unicast_send(to, frame);
    }

    /// `node_packet_received` for `PACKET_TYPE = ACK` (`handle_ack`).
    pub fn on_ack_received(&mut self, now: Instant, ack: IncomingAckPacket) {
        if ack.from != self.current_parent || ack.packet_id != self.seqno {
            self.stats.badack += 1;
            return;
        }

        self.stats.ackrecv += 1;

        // A lost link-layer ACK still means the send happened; credit the
        // minimum MAC attempt count rather than zero.
        let effective_tx = if self.transmissions == 0 {
            self.cfg.max_mac_rexmits
        } else {
            self.transmissions
        };

        if let Some(n) = self.neighbours.find_mut(ack.from) {
            n.on_tx(effective_tx);
            n.update_rtmetric(ack.header.rtmetric);
        }
        self.update_rtmetric(now);

        if ack.header.flags & ack_flags::CONGESTED != 0 {
            if let Some(n) = self.neighbours.find_mut(ack.from) {
                n.set_congested(now, &self.cfg);
                n.on_tx(self.max_rexmits.saturating_mul(2));
            }
            self.update_rtmetric(now);
        }

        if ack.header.flags & ack_flags::DROPPED == 0 {
            self.send_next_packet(now);
        } else if ack.header.flags & ack_flags::LIFETIME_EXCEEDED != 0 {
            self.send_next_packet(now);
        } else {
            self.stats.ackdrop += 1;
            if let Some(n) = self.neighbours.find_mut(ack.from) {
                n.on_tx(self.max_rexmits);
            }
            self.update_rtmetric(now);
            let delay = self.cfg.rexmit_time + self.jitter(self.cfg.rexmit_time);
            self.retransmission_timer = Some(now + delay);
            self.retransmission_mode = RetransmitTimerMode::Backoff;
        }

        if ack.header.flags & ack_flags::RTMETRIC_NEEDS_UPDATE != 0 {
            self.bump_advertisement();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::config::ConnectionConfig;
    use crate::connection::Role;
    use crate::ports::NullPorts;
    use crate::wire::DataHeader;

    fn open(addr: (u8, u8)) -> Connection<NullPorts> {
        Connection::open(
            ConnectionConfig::default(),
            addr.into(),
            Role::Router,
            NullPorts::default(),
            Instant::now(),
        )
    }

    #[test]
    fn sink_delivers_its_own_originated_payload_directly() {
        let mut sink = open((1, 0));
        sink.is_sink = true;
        let now = Instant::now();
        assert!(sink.send(Bytes::from_static(b"hi"), 4, now));
        assert_eq!(sink.ports().delivered, vec![(sink.addr(), 0, 1)]);
    }

    #[test]
    fn send_with_no_route_leaves_packet_queued() {
        let mut c = open((2, 0));
        let now = Instant::now();
        assert!(c.send(Bytes::from_static(b"x"), 4, now));
        assert_eq!(c.send_queue.len(), 1);
        assert!(!c.sending);
        assert!(c.ports().unicasts.is_empty());
    }

    #[test]
    fn send_dispatches_immediately_once_a_parent_exists() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let parent = Address::new(1, 0);
        c.neighbours.add(&cfg, parent, 0);
        c.update_rtmetric(now);
        assert_eq!(c.parent, parent);

        assert!(c.send(Bytes::from_static(b"payload"), 4, now));
        assert!(c.sending);
        assert_eq!(c.ports().unicasts.len(), 1);
        assert_eq!(c.stats.datasent, 1);
        assert!(c.retransmission_deadline().is_some());
    }

    #[test]
    fn mac_completion_arms_backoff_and_timeout_drops_the_packet() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let parent = Address::new(1, 0);
        c.neighbours.add(&cfg, parent, 0);
        c.update_rtmetric(now);
        c.send(Bytes::from_static(b"payload"), 1, now);

        // One MAC attempt reported; not yet at max_rexmits (1).
        c.on_mac_send_complete(now, 1);
        assert!(c.sending);
        assert_eq!(c.stats.timedout, 0);

        // A second attempt pushes transmissions to max_rexmits: gives up.
        c.on_mac_send_complete(now, 1);
        assert_eq!(c.stats.timedout, 1);
        assert!(!c.sending);
    }

    #[test]
    fn ack_for_wrong_sender_or_seqno_is_counted_as_bad() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let parent = Address::new(1, 0);
        c.neighbours.add(&cfg, parent, 0);
        c.update_rtmetric(now);
        c.send(Bytes::from_static(b"payload"), 4, now);

        c.on_ack_received(
            now,
            IncomingAckPacket {
                from: Address::new(9, 9),
                packet_id: c.seqno,
                header: AckPayload::new(0),
            },
        );
        assert_eq!(c.stats.badack, 1);
    }

    #[test]
    fn positive_ack_credits_the_neighbour_and_advances_seqno() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let parent = Address::new(1, 0);
        c.neighbours.add(&cfg, parent, 0);
        c.update_rtmetric(now);
        c.send(Bytes::from_static(b"payload"), 4, now);
        let seqno = c.seqno;

        c.on_ack_received(
            now,
            IncomingAckPacket {
                from: parent,
                packet_id: seqno,
                header: AckPayload::new(0),
            },
        );

        assert_eq!(c.stats.ackrecv, 1);
        assert!(!c.sending);
        assert_eq!(c.seqno, (seqno + 1) % c.cfg.packet_id_space());
        assert!(c.neighbours.find(parent).unwrap().link_metric.num_estimates() > 0);
    }

    #[test]
    fn congested_ack_marks_the_neighbour_and_penalises_it() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let parent = Address::new(1, 0);
        c.neighbours.add(&cfg, parent, 0);
        c.update_rtmetric(now);
        c.send(Bytes::from_static(b"payload"), 4, now);
        let seqno = c.seqno;

        let mut header = AckPayload::new(0);
        header.flags = ack_flags::CONGESTED;
        c.on_ack_received(
            now,
            IncomingAckPacket {
                from: parent,
                packet_id: seqno,
                header,
            },
        );

        assert!(c.neighbours.find(parent).unwrap().is_congested(now));
    }

    #[test]
    fn dropped_not_lifetime_exceeded_reschedules_retransmission() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let parent = Address::new(1, 0);
        c.neighbours.add(&cfg, parent, 0);
        c.update_rtmetric(now);
        c.send(Bytes::from_static(b"payload"), 4, now);
        let seqno = c.seqno;

        let mut header = AckPayload::new(0);
        header.flags = ack_flags::DROPPED | ack_flags::CONGESTED;
        c.on_ack_received(
            now,
            IncomingAckPacket {
                from: parent,
                packet_id: seqno,
                header,
            },
        );

        assert_eq!(c.stats.ackdrop, 1);
        assert!(c.sending, "packet stays in flight, pending retransmission");
        assert!(c.retransmission_deadline().is_some());
    }

    #[test]
    fn sink_forwards_and_delivers_a_data_packet() {
        let mut sink = open((1, 0));
        sink.is_sink = true;
        sink.rtmetric = 0;
        let now = Instant::now();

        let originator = Address::new(3, 0);
        sink.on_data_received(
            now,
            IncomingDataPacket {
                from: Address::new(2, 0),
                esender: originator,
                epacket_id: 5,
                packet_id: 0,
                ttl: 14,
                hops: 2,
                max_rexmit: 4,
                header: DataHeader::new(200),
                payload: Bytes::from_static(b"X"),
            },
        );

        assert_eq!(sink.stats.datarecv, 1);
        assert_eq!(sink.ports().delivered, vec![(originator, 5, 2)]);
        assert_eq!(sink.ports().unicasts.len(), 1);
    }

    #[test]
    fn duplicate_data_packet_only_reacks_without_redelivery() {
        let mut sink = open((1, 0));
        sink.is_sink = true;
        sink.rtmetric = 0;
        let now = Instant::now();
        let originator = Address::new(3, 0);
        let pkt = || IncomingDataPacket {
            from: Address::new(2, 0),
            esender: originator,
            epacket_id: 5,
            packet_id: 0,
            ttl: 14,
            hops: 2,
            max_rexmit: 4,
            header: DataHeader::new(200),
            payload: Bytes::from_static(b"X"),
        };
        sink.on_data_received(now, pkt());
        sink.on_data_received(now, pkt());

        assert_eq!(sink.stats.datarecv, 1);
        assert_eq!(sink.stats.duprecv, 1);
        assert_eq!(sink.ports().unicasts.len(), 2);
    }

    #[test]
    fn forwarder_relays_with_decremented_ttl_and_incremented_hops() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        c.neighbours.add(&cfg, Address::new(1, 0), 0);
        c.update_rtmetric(now);

        c.on_data_received(
            now,
            IncomingDataPacket {
                from: Address::new(3, 0),
                esender: Address::new(3, 0),
                epacket_id: 0,
                packet_id: 0,
                ttl: 15,
                hops: 1,
                max_rexmit: 4,
                header: DataHeader::new(300),
                payload: Bytes::from_static(b"X"),
            },
        );

        assert_eq!(c.stats.qdrop, 0);
        assert_eq!(c.stats.ttldrop, 0);
        // The forwarded copy was admitted and immediately dispatched toward
        // the parent (route already present).
        assert!(c.sending || !c.send_queue.is_empty());
    }

    #[test]
    fn child_advertising_rtmetric_at_or_below_ours_gets_a_loop_warning_ack() {
        // spec.md §8 Scenario 6: a forwarder receiving data whose sender
        // advertises `rtmetric <= self.rtmetric` sets the loop-warning bit
        // on the returned ACK, since the child should be strictly farther
        // from the sink than we are.
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        c.neighbours.add(&cfg, Address::new(1, 0), 0);
        c.update_rtmetric(now); // self.rtmetric settles well above 0
        let child = Address::new(3, 0);
        c.neighbours.add(&cfg, child, 0);

        c.on_data_received(
            now,
            IncomingDataPacket {
                from: child,
                esender: child,
                epacket_id: 0,
                packet_id: 0,
                ttl: 15,
                hops: 1,
                max_rexmit: 4,
                // Child claims an rtmetric no better than ours: a loop.
                header: DataHeader::new(0),
                payload: Bytes::from_static(b"X"),
            },
        );

        // The forward to our own parent may also be dispatched in the same
        // call, so find the ACK specifically rather than assuming it's last.
        let ack = c
            .ports()
            .unicasts
            .iter()
            .find_map(|(_, frame)| match frame {
                OutgoingFrame::Ack(ack) => Some(ack),
                _ => None,
            })
            .expect("expected an ACK frame");
        assert_ne!(ack.header.flags & ack_flags::RTMETRIC_NEEDS_UPDATE, 0);
    }

    #[test]
    fn expired_ttl_is_dropped_with_lifetime_exceeded_ack() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        c.neighbours.add(&cfg, Address::new(1, 0), 0);
        c.update_rtmetric(now);

        c.on_data_received(
            now,
            IncomingDataPacket {
                from: Address::new(3, 0),
                esender: Address::new(3, 0),
                epacket_id: 0,
                packet_id: 0,
                ttl: 1,
                hops: 1,
                max_rexmit: 4,
                header: DataHeader::new(300),
                payload: Bytes::from_static(b"X"),
            },
        );

        assert_eq!(c.stats.ttldrop, 1);
        let (_, frame) = c.ports().unicasts.last().unwrap();
        match frame {
            OutgoingFrame::Ack(ack) => {
                assert_eq!(
                    ack.header.flags & (ack_flags::DROPPED | ack_flags::LIFETIME_EXCEEDED),
                    ack_flags::DROPPED | ack_flags::LIFETIME_EXCEEDED
                );
            }
            _ => panic!("expected an ACK frame"),
        }
    }

    #[test]
    fn full_queue_drops_forwarded_packet_as_congested() {
        let mut c = open((2, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        // A finite-cost parent exists, so forwarding is attempted; the first
        // forwarded packet is dispatched immediately (leaving `sending`
        // true), so later ones pile up in the queue until it is full.
        c.neighbours.add(&cfg, Address::new(1, 0), 0);
        c.update_rtmetric(now);

        for i in 0..cfg.max_sending_queue {
            c.on_data_received(
                now,
                IncomingDataPacket {
                    from: Address::new(3, 0),
                    esender: Address::new(3, 0),
                    epacket_id: i as u16,
                    packet_id: 0,
                    ttl: 15,
                    hops: 1,
                    max_rexmit: 4,
                    header: DataHeader::new(300),
                    payload: Bytes::from_static(b"X"),
                },
            );
        }

        let before = c.stats.qdrop;
        c.on_data_received(
            now,
            IncomingDataPacket {
                from: Address::new(3, 0),
                esender: Address::new(3, 0),
                epacket_id: 9999,
                packet_id: 0,
                ttl: 15,
                hops: 1,
                max_rexmit: 4,
                header: DataHeader::new(300),
                payload: Bytes::from_static(b"X"),
            },
        );
        assert!(c.stats.qdrop > before);
    }
}
