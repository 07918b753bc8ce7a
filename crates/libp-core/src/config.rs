//! Tunable constants, bundled into a typed, (de)serializable configuration.
//!
//! Every field defaults to the literal constant named in the protocol design
//! (`UNIT`, `MAX_NEIGHBOURS`, `REXMIT_TIME`, ...). Call sites that don't need
//! to retune anything just use `ConnectionConfig::default()`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-point scale factor used throughout the link-metric and rtmetric math.
pub const UNIT: u16 = 16;

/// Link metric value a brand-new neighbour (zero samples) is assigned.
pub const INITIAL_METRIC: u16 = 16;

/// Ceiling for advertised/compound routing metrics ("infinite distance").
pub const RTMETRIC_MAX: u16 = 511;

/// Number of bits in the sequence-number / extended-sequence-number space.
pub const COLLECT_PACKET_ID_BITS: u32 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    // ─── Neighbour table ────────────────────────────────────────────
    /// Bounded neighbour table capacity.
    pub max_neighbours: usize,
    /// Periodic aging-tick interval.
    pub periodic_interval: Duration,
    /// Age (in ticks) at which a neighbour is evicted.
    pub max_age: u16,
    /// Metric-age (in ticks) at which a neighbour's link metric is reset.
    pub max_lm_age: u16,

    // ─── Congestion ─────────────────────────────────────────────────
    /// How long a neighbour stays marked congested after a CONGESTED ack.
    pub expected_congestion_duration: Duration,
    /// Extra composite-metric cost added while a neighbour is congested.
    pub congestion_penalty: u16,

    // ─── Parent selection hysteresis ────────────────────────────────
    /// Minimum improvement (in composite-metric units) required to switch parent.
    pub significant_rtmetric_parent_change: u16,

    // ─── Send queue ─────────────────────────────────────────────────
    /// Bounded FIFO capacity for outgoing (originated + forwarded) packets.
    pub max_sending_queue: usize,
    /// Slots reserved exclusively for self-originated packets.
    pub min_available_queue_entries: usize,

    // ─── Duplicate suppression ──────────────────────────────────────
    /// Ring-buffer size for (originator, eseqno) duplicate detection.
    pub num_recent_packets: usize,

    // ─── Retransmission timing ──────────────────────────────────────
    /// Base per-hop retransmission timer unit.
    pub rexmit_time: Duration,
    /// `FORWARD_PACKET_LIFETIME_BASE = 2 * REXMIT_TIME`; kept explicit so it
    /// can be retuned independently if the relationship ever changes.
    pub forward_packet_lifetime_base: Duration,
    /// Ceiling on caller-requested retransmit counts.
    pub max_rexmits: u8,
    /// MAC-layer transmission attempts per hop for DATA packets.
    pub max_mac_rexmits: u8,
    /// MAC-layer transmission attempts for ACK packets.
    pub max_ack_mac_rexmits: u8,

    // ─── Hop limit / packet id space ────────────────────────────────
    /// Initial TTL stamped on self-originated packets.
    pub max_hoplim: u8,
    /// Bit width of the (extended) sequence-number space.
    pub collect_packet_id_bits: u32,

    // ─── Beaconing ──────────────────────────────────────────────────
    /// Default period the sink rearms its beacon timer to.
    pub beaconing_period: Duration,
    /// Period a non-sink rearms its beacon timer to after hearing any beacon.
    pub rebroadcast_time: Duration,

    // ─── Proactive probing ──────────────────────────────────────────
    /// Retransmit budget for the synthetic zero-payload probe packet.
    pub proactive_probing_rexmits: u8,
    /// Upper bound (ms) for the proactive-probing timer's random interval.
    ///
    /// The original C expresses this as `random_rand() % CLOCK_SECOND * 60`,
    /// which — due to operator precedence — is `(rand % CLOCK_SECOND) * 60`,
    /// not `rand % (CLOCK_SECOND * 60)`. That is very likely a bug, but is
    /// preserved here for wire-behaviour equivalence: the jitter is drawn
    /// uniformly from `[0, CLOCK_SECOND)` ticks and then scaled by 60,
    /// rather than drawn uniformly from `[0, 60 * CLOCK_SECOND)`. This field
    /// is that pre-scale bound, in the same units as `CLOCK_SECOND`
    /// (`clock_ticks_per_second`).
    pub clock_ticks_per_second: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let rexmit_time = Duration::from_millis(1280); // 32 * CLOCK_SECOND / 25 (typical RDC check rate)
        ConnectionConfig {
            max_neighbours: 8,
            periodic_interval: Duration::from_secs(60),
            max_age: 180,
            max_lm_age: 10,

            expected_congestion_duration: Duration::from_secs(240),
            congestion_penalty: 8 * UNIT,

            significant_rtmetric_parent_change: UNIT + UNIT / 2,

            max_sending_queue: 12, // 3 * QUEUEBUF_NUM/4 with QUEUEBUF_NUM = 16
            min_available_queue_entries: 4,

            num_recent_packets: 16,

            rexmit_time,
            forward_packet_lifetime_base: rexmit_time * 2,
            max_rexmits: 31,
            max_mac_rexmits: 2,
            max_ack_mac_rexmits: 5,

            max_hoplim: 15,
            collect_packet_id_bits: COLLECT_PACKET_ID_BITS,

            beaconing_period: Duration::from_secs(30),
            rebroadcast_time: Duration::from_secs(10),

            proactive_probing_rexmits: 15,
            clock_ticks_per_second: 128,
        }
    }
}

impl ConnectionConfig {
    /// `2^collect_packet_id_bits`, the modulus for seqno/eseqno arithmetic.
    pub fn packet_id_space(&self) -> u16 {
        1u16 << self.collect_packet_id_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_constants() {
        let c = ConnectionConfig::default();
        assert_eq!(c.max_neighbours, 8);
        assert_eq!(c.max_age, 180);
        assert_eq!(c.max_lm_age, 10);
        assert_eq!(c.significant_rtmetric_parent_change, 24);
        assert_eq!(c.congestion_penalty, 128);
        assert_eq!(c.max_rexmits, 31);
        assert_eq!(c.max_mac_rexmits, 2);
        assert_eq!(c.max_ack_mac_rexmits, 5);
        assert_eq!(c.max_hoplim, 15);
        assert_eq!(c.packet_id_space(), 128);
        assert_eq!(c.num_recent_packets, 16);
        assert_eq!(c.min_available_queue_entries, 4);
    }

    #[test]
    fn forward_lifetime_is_double_rexmit_time() {
        let c = ConnectionConfig::default();
        assert_eq!(c.forward_packet_lifetime_base, c.rexmit_time * 2);
    }
}
