//! # libp-core
//!
//! Least-Interference Beaconing Protocol: a hop-by-hop, tree-based
//! convergecast routing and forwarding engine for low-power multi-hop radio
//! networks.
//!
//! Pure logic, no I/O: the [`connection::Connection`] state machine is
//! driven entirely by explicit method calls carrying an external
//! [`quanta::Instant`], and talks to the outside world only through the
//! [`ports::Ports`] trait seam (MAC send, announcement control, application
//! delivery). The embedding event loop owns sockets, threads, and timers.
//!
//! ## Crate structure
//!
//! - [`address`] — Two-byte node addresses
//! - [`config`] — Tunable protocol constants, bundled as [`config::ConnectionConfig`]
//! - [`link_metric`] — EWMA expected-transmission-count estimator
//! - [`neighbour`] — Per-neighbour soft state
//! - [`neighbour_table`] — Bounded neighbour set, aging, best-parent query
//! - [`route`] — Parent selection and rtmetric (re)computation
//! - [`send_queue`] — Bounded outgoing FIFO with reserved forwarding headroom
//! - [`duplicate_cache`] — Forwarder duplicate suppression
//! - [`forward`] — Send/forward/ACK state machine and retransmission timing
//! - [`beacon`] — Beacon/announcement dispatch and proactive link probing
//! - [`packet`] — Frames and attributes exchanged with the MAC port
//! - [`wire`] — On-wire header encoding
//! - [`ports`] — Trait seams for the MAC, announcement, and callback collaborators
//! - [`stats`] — Per-connection counters
//! - [`connection`] — Connection façade: lifecycle and shared state

pub mod address;
pub mod beacon;
pub mod config;
pub mod connection;
pub mod duplicate_cache;
pub mod forward;
pub mod link_metric;
pub mod neighbour;
pub mod neighbour_table;
pub mod packet;
pub mod ports;
pub mod route;
pub mod send_queue;
pub mod stats;
pub mod wire;

pub use address::Address;
pub use config::ConnectionConfig;
pub use connection::{Connection, Role};
pub use ports::{Announcement, Callbacks, Mac, Ports};
