//! On-wire packet header formats.
//!
//! All three headers share the same first four bytes (`flags, reserved,
//! rtmetric`); the beacon payload adds a trailing sequence byte. `rtmetric`
//! is little-endian, per `spec.md` §6 (a `memcpy` of the header struct on an
//! LE MCU). Decoding mirrors `strata_transport::wire`'s idiom: `decode`
//! returns `None` on a truncated buffer rather than panicking or erroring.

use bytes::{Buf, BufMut};

// ─── ACK flags (wire encoding) ──────────────────────────────────────────────

pub mod ack_flags {
    pub const CONGESTED: u8 = 0x80;
    pub const DROPPED: u8 = 0x40;
    pub const LIFETIME_EXCEEDED: u8 = 0x20;
    pub const RTMETRIC_NEEDS_UPDATE: u8 = 0x10;
    pub const PARENT_CHOSEN: u8 = 0x0B;
    pub const PARENT_REMOVED: u8 = 0x0A;
}

/// Whether a unicast packet is application data or a network-layer ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Ack = 1,
}

/// `flags, reserved, rtmetric` — prepended to the payload of every DATA
/// packet, and the entire body of an ACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataHeader {
    pub flags: u8,
    pub reserved: u8,
    pub rtmetric: u16,
}

pub const DATA_HEADER_LEN: usize = 4;

impl DataHeader {
    pub fn new(rtmetric: u16) -> Self {
        DataHeader {
            flags: 0,
            reserved: 0,
            rtmetric,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags);
        buf.put_u8(self.reserved);
        buf.put_u16_le(self.rtmetric);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < DATA_HEADER_LEN {
            return None;
        }
        let flags = buf.get_u8();
        let reserved = buf.get_u8();
        let rtmetric = buf.get_u16_le();
        Some(DataHeader {
            flags,
            reserved,
            rtmetric,
        })
    }
}

/// ACK payload: identical layout to [`DataHeader`], `flags` carries the
/// [`ack_flags`] bits.
pub type AckPayload = DataHeader;

/// Beacon payload: `flags, reserved, rtmetric, seqno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeaconPayload {
    pub flags: u8,
    pub reserved: u8,
    pub rtmetric: u16,
    pub seqno: u8,
}

pub const BEACON_PAYLOAD_LEN: usize = 5;

impl BeaconPayload {
    pub fn new(rtmetric: u16, seqno: u8) -> Self {
        BeaconPayload {
            flags: 0,
            reserved: 0,
            rtmetric,
            seqno,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags);
        buf.put_u8(self.reserved);
        buf.put_u16_le(self.rtmetric);
        buf.put_u8(self.seqno);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < BEACON_PAYLOAD_LEN {
            return None;
        }
        let flags = buf.get_u8();
        let reserved = buf.get_u8();
        let rtmetric = buf.get_u16_le();
        let seqno = buf.get_u8();
        Some(BeaconPayload {
            flags,
            reserved,
            rtmetric,
            seqno,
        })
    }
}
