//! Trait seams for the external collaborators named in the protocol design:
//! the radio/MAC layer, the announcement broadcast subsystem, and the
//! application's packet-delivery callback.
//!
//! The engine never blocks on these and never receives a synchronous
//! completion value from [`Mac::unicast_send`] / [`Mac::broadcast_send`] —
//! MAC completion for a DATA send is reported back asynchronously via
//! [`crate::connection::Connection::on_mac_send_complete`], mirroring the
//! `node_packet_sent` callback of the original design.

use crate::address::Address;
use crate::packet::{OutgoingBeacon, OutgoingFrame};

/// Radio/MAC-layer send operations. Fire-and-forget from the engine's point
/// of view; implementations dispatch a real (or simulated) radio frame.
pub trait Mac {
    fn unicast_send(&mut self, dest: Address, frame: OutgoingFrame);
    fn broadcast_send(&mut self, frame: OutgoingBeacon);
}

/// The separate `(id, value)` announcement broadcast subsystem.
pub trait Announcement {
    /// Publish a new advertised value (the node's current rtmetric).
    fn set_value(&mut self, value: u16);
    /// Ask the subsystem to accelerate its next broadcast.
    fn bump(&mut self);
}

/// Application delivery callback, invoked only at the sink.
pub trait Callbacks {
    fn recv(&mut self, originator: Address, eseqno: u16, hops: u8);
}

/// Convenience supertrait bundling the three ports into the single vtable
/// object a [`Connection`](crate::connection::Connection) is generic over.
pub trait Ports: Mac + Announcement + Callbacks {}
impl<T: Mac + Announcement + Callbacks> Ports for T {}

/// A no-op implementation, useful for unit tests that only exercise pure
/// state transitions and don't care about side effects.
#[derive(Debug, Default)]
pub struct NullPorts {
    pub unicasts: Vec<(Address, OutgoingFrame)>,
    pub broadcasts: Vec<OutgoingBeacon>,
    pub announced_value: Option<u16>,
    pub bumps: u32,
    pub delivered: Vec<(Address, u16, u8)>,
}

impl Mac for NullPorts {
    fn unicast_send(&mut self, dest: Address, frame: OutgoingFrame) {
        self.unicasts.push((dest, frame));
    }
    fn broadcast_send(&mut self, frame: OutgoingBeacon) {
        self.broadcasts.push(frame);
    }
}

impl Announcement for NullPorts {
    fn set_value(&mut self, value: u16) {
        self.announced_value = Some(value);
    }
    fn bump(&mut self) {
        self.bumps += 1;
    }
}

impl Callbacks for NullPorts {
    fn recv(&mut self, originator: Address, eseqno: u16, hops: u8) {
        self.delivered.push((originator, eseqno, hops));
    }
}
