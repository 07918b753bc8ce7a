//! Packet-buffer attributes and the frames exchanged with the MAC port.
//!
//! The real stack keeps these as out-of-band `packetbuf` attributes
//! (`ESENDER`, `EPACKET_ID`, `PACKET_ID`, `TTL`, `HOPS`, `MAX_REXMIT`,
//! `PACKET_TYPE`, plus MAC-layer `RELIABLE`/`MAX_MAC_TRANSMISSIONS`); here
//! they travel as explicit struct fields alongside the encoded payload.

use bytes::Bytes;
use quanta::Instant;
use std::time::Duration;

use crate::address::Address;
use crate::wire::{AckPayload, BeaconPayload, DataHeader, PacketType};

/// A packet waiting in the send queue, not yet handed to the MAC.
#[derive(Debug, Clone)]
pub struct QueuedPacket {
    /// Original originator (self, for self-originated packets).
    pub esender: Address,
    /// Originator's extended packet id.
    pub epacket_id: u16,
    /// Remaining hop limit.
    pub ttl: u8,
    /// Hop count so far.
    pub hops: u8,
    /// Caller-requested retransmit budget for this packet.
    pub max_rexmit: u8,
    pub payload: Bytes,
    pub enqueue_time: Instant,
    pub lifetime: Duration,
}

impl QueuedPacket {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.enqueue_time) >= self.lifetime
    }
}

/// Attributes attached to a DATA frame handed to the MAC port.
#[derive(Debug, Clone, Copy)]
pub struct DataAttrs {
    pub esender: Address,
    pub epacket_id: u16,
    /// Network-layer packet id for this (hop-local) transmission — `seqno`.
    pub packet_id: u16,
    pub ttl: u8,
    pub hops: u8,
    pub max_rexmit: u8,
    pub reliable: bool,
    pub max_mac_transmissions: u8,
}

#[derive(Debug, Clone)]
pub struct OutgoingDataPacket {
    pub attrs: DataAttrs,
    pub header: DataHeader,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy)]
pub struct OutgoingAckPacket {
    pub packet_id: u16,
    pub max_mac_transmissions: u8,
    pub header: AckPayload,
}

#[derive(Debug, Clone)]
pub enum OutgoingFrame {
    Data(OutgoingDataPacket),
    Ack(OutgoingAckPacket),
}

#[derive(Debug, Clone)]
pub struct OutgoingBeacon {
    pub header: BeaconPayload,
}

/// A DATA frame as handed up from the MAC port on reception.
#[derive(Debug, Clone)]
pub struct IncomingDataPacket {
    /// Immediate link-layer sender (the neighbour that transmitted this hop).
    pub from: Address,
    pub esender: Address,
    pub epacket_id: u16,
    pub packet_id: u16,
    pub ttl: u8,
    pub hops: u8,
    pub max_rexmit: u8,
    pub header: DataHeader,
    pub payload: Bytes,
}

/// An ACK frame as handed up from the MAC port on reception.
#[derive(Debug, Clone, Copy)]
pub struct IncomingAckPacket {
    pub from: Address,
    pub packet_id: u16,
    pub header: AckPayload,
}

/// The packet currently "in flight" awaiting an ACK, retained outside the
/// send queue so `retransmit_current_packet` can re-dispatch it without a
/// second pop.
#[derive(Debug, Clone)]
pub struct CurrentPacket {
    pub esender: Address,
    pub epacket_id: u16,
    pub ttl: u8,
    pub hops: u8,
    pub max_rexmit: u8,
    pub payload: Bytes,
}

pub fn packet_type_of(frame: &OutgoingFrame) -> PacketType {
    match frame {
        OutgoingFrame::Data(_) => PacketType::Data,
        OutgoingFrame::Ack(_) => PacketType::Ack,
    }
}
