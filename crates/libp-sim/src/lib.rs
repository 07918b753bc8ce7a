//! # libp-sim
//!
//! In-memory multi-hop mesh for driving `libp-core` through realistic
//! topologies without a real radio stack: every unicast/broadcast is
//! delivered instantly to whichever nodes are within simulated radio range,
//! and every MAC send is reported back after exactly one attempt. No loss,
//! no reordering — impairment is deliberately out of scope here; it belongs
//! to the MAC/RDC layer this harness stands in for.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use libp_core::address::Address;
use libp_core::config::ConnectionConfig;
use libp_core::connection::{Connection, Role};
use libp_core::packet::{IncomingAckPacket, IncomingDataPacket, OutgoingBeacon, OutgoingFrame};
use libp_core::ports::{Announcement, Callbacks, Mac};

#[derive(Debug, Clone)]
enum MacEvent {
    Unicast { dest: Address, frame: OutgoingFrame },
    Broadcast { frame: OutgoingBeacon },
}

/// Port implementation that queues outgoing frames for the [`Mesh`] driver
/// instead of touching a real radio.
#[derive(Debug, Default)]
pub struct MeshPorts {
    outbox: VecDeque<MacEvent>,
    pub announced_value: Option<u16>,
    pub bumps: u32,
    pub delivered: Vec<(Address, u16, u8)>,
}

impl Mac for MeshPorts {
    fn unicast_send(&mut self, dest: Address, frame: OutgoingFrame) {
        self.outbox.push_back(MacEvent::Unicast { dest, frame });
    }
    fn broadcast_send(&mut self, frame: OutgoingBeacon) {
        self.outbox.push_back(MacEvent::Broadcast { frame });
    }
}

impl Announcement for MeshPorts {
    fn set_value(&mut self, value: u16) {
        self.announced_value = Some(value);
    }
    fn bump(&mut self) {
        self.bumps += 1;
    }
}

impl Callbacks for MeshPorts {
    fn recv(&mut self, originator: Address, eseqno: u16, hops: u8) {
        self.delivered.push((originator, eseqno, hops));
    }
}

/// How often a node re-broadcasts its currently published rtmetric over the
/// (simulated) announcement subsystem, absent an explicit `bump()` request.
/// That subsystem lives outside `libp-core` — this is the sim harness
/// standing in for it.
const ANNOUNCEMENT_INTERVAL: Duration = Duration::from_secs(1);

/// A node's connection state plus the one-hop neighbours it can actually
/// reach over the simulated radio (links are symmetric by construction).
struct Node {
    conn: Connection<MeshPorts>,
    links: HashSet<Address>,
    next_announce: Instant,
    last_bumps: u32,
}

/// Deterministic in-memory multi-hop mesh.
pub struct Mesh {
    nodes: HashMap<Address, Node>,
    now: Instant,
}

impl Mesh {
    pub fn new() -> Self {
        Mesh {
            nodes: HashMap::new(),
            now: Instant::now(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Add a node. `is_sink` implies router role and `rtmetric = 0`
    /// regardless of `role`.
    pub fn add_node(&mut self, addr: Address, cfg: ConnectionConfig, role: Role, is_sink: bool) {
        let mut conn = Connection::open(cfg, addr, role, MeshPorts::default(), self.now);
        if is_sink {
            conn.set_sink(self.now, true);
        }
        self.nodes.insert(
            addr,
            Node {
                conn,
                links: HashSet::new(),
                next_announce: self.now,
                last_bumps: 0,
            },
        );
    }

    /// Establish a symmetric radio link between two already-added nodes.
    pub fn add_link(&mut self, a: Address, b: Address) {
        if let Some(n) = self.nodes.get_mut(&a) {
            n.links.insert(b);
        }
        if let Some(n) = self.nodes.get_mut(&b) {
            n.links.insert(a);
        }
    }

    pub fn connection(&self, addr: Address) -> Option<&Connection<MeshPorts>> {
        self.nodes.get(&addr).map(|n| &n.conn)
    }

    pub fn connection_mut(&mut self, addr: Address) -> Option<&mut Connection<MeshPorts>> {
        self.nodes.get_mut(&addr).map(|n| &mut n.conn)
    }

    pub fn send(&mut self, from: Address, payload: Bytes, rexmits: u8) -> bool {
        let now = self.now;
        match self.nodes.get_mut(&from) {
            Some(n) => n.conn.send(payload, rexmits, now),
            None => false,
        }
    }

    /// Advance the mesh clock by `dt`, firing any timers whose deadline has
    /// passed and flushing every node's outbox through the topology.
    pub fn advance(&mut self, dt: Duration) {
        self.now += dt;
        self.fire_due_timers();
        self.announce_cycle();
        self.drain_outboxes();
    }

    /// Stand in for the external announcement subsystem: re-broadcast each
    /// node's published value on its own schedule, or immediately if the
    /// node called `bump()` since the last cycle.
    fn announce_cycle(&mut self) {
        let now = self.now;
        let mut due: Vec<(Address, u16)> = Vec::new();

        for (addr, node) in self.nodes.iter_mut() {
            let bumps = node.conn.ports().bumps;
            let bumped = bumps != node.last_bumps;
            node.last_bumps = bumps;
            if bumped || now >= node.next_announce {
                if let Some(value) = node.conn.ports().announced_value {
                    due.push((*addr, value));
                }
                node.next_announce = now + ANNOUNCEMENT_INTERVAL;
            }
        }

        for (from, value) in due {
            let neighbours: Vec<Address> = self
                .nodes
                .get(&from)
                .map(|n| n.links.iter().copied().collect())
                .unwrap_or_default();
            for dest in neighbours {
                if let Some(target) = self.nodes.get_mut(&dest) {
                    target.conn.on_announcement_received(now, from, value);
                }
            }
        }
    }

    fn fire_due_timers(&mut self) {
        let now = self.now;
        for node in self.nodes.values_mut() {
            let conn = &mut node.conn;
            if conn.retransmission_deadline().is_some_and(|d| now >= d) {
                conn.on_retransmission_timer(now);
            }
            if conn.beacon_deadline().is_some_and(|d| now >= d) {
                conn.on_beacon_timer(now);
            }
            if conn.proactive_probing_deadline().is_some_and(|d| now >= d) {
                conn.on_proactive_probing_timer(now);
            }
            if conn.periodic_deadline().is_some_and(|d| now >= d) {
                conn.on_periodic_timer(now);
            }
        }
    }

    /// Drain every node's queued sends, delivering them across links and
    /// reporting MAC completion back to the sender. Runs to a fixed point
    /// within a single `advance` (a delivery can itself cause a reply, e.g.
    /// an ACK), bounded so a routing loop can't spin forever.
    fn drain_outboxes(&mut self) {
        let now = self.now;
        for _ in 0..64 {
            let mut events: Vec<(Address, MacEvent)> = Vec::new();
            for (addr, node) in self.nodes.iter_mut() {
                while let Some(ev) = node.conn.ports_mut().outbox.pop_front() {
                    events.push((*addr, ev));
                }
            }
            if events.is_empty() {
                break;
            }
            for (from, ev) in events {
                self.deliver(now, from, ev);
            }
        }
    }

    fn deliver(&mut self, now: Instant, from: Address, ev: MacEvent) {
        match ev {
            MacEvent::Unicast { dest, frame } => {
                // `on_mac_send_complete` only matters for the one DATA
                // packet that can be in flight at a time (`spec.md` §4.7.3);
                // ACK sends complete silently from the engine's point of
                // view, exactly like the original `node_packet_sent`
                // callback ignoring non-DATA packet types.
                if matches!(frame, OutgoingFrame::Data(_)) {
                    if let Some(sender) = self.nodes.get_mut(&from) {
                        sender.conn.on_mac_send_complete(now, 1);
                    }
                }
                let reachable = self
                    .nodes
                    .get(&from)
                    .is_some_and(|n| n.links.contains(&dest));
                if !reachable {
                    return;
                }
                let Some(target) = self.nodes.get_mut(&dest) else {
                    return;
                };
                match frame {
                    OutgoingFrame::Data(data) => {
                        target.conn.on_data_received(
                            now,
                            IncomingDataPacket {
                                from,
                                esender: data.attrs.esender,
                                epacket_id: data.attrs.epacket_id,
                                packet_id: data.attrs.packet_id,
                                ttl: data.attrs.ttl,
                                hops: data.attrs.hops,
                                max_rexmit: data.attrs.max_rexmit,
                                header: data.header,
                                payload: data.payload,
                            },
                        );
                    }
                    OutgoingFrame::Ack(ack) => {
                        target.conn.on_ack_received(
                            now,
                            IncomingAckPacket {
                                from,
                                packet_id: ack.packet_id,
                                header: ack.header,
                            },
                        );
                    }
                }
            }
            MacEvent::Broadcast { frame } => {
                let neighbours: Vec<Address> = self
                    .nodes
                    .get(&from)
                    .map(|n| n.links.iter().copied().collect())
                    .unwrap_or_default();
                for dest in neighbours {
                    if let Some(target) = self.nodes.get_mut(&dest) {
                        target.conn.on_beacon_received(now, from, frame.header);
                    }
                }
            }
        }
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}
