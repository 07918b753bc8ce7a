//! Bounded FIFO of outgoing packets, with a slot reservation so forwarded
//! traffic can never starve self-originated sends.

use quanta::Instant;
use std::collections::VecDeque;

use crate::config::ConnectionConfig;
use crate::packet::QueuedPacket;

#[derive(Debug, Default)]
pub struct SendQueue {
    items: VecDeque<QueuedPacket>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Admit a self-originated packet. Self-originated traffic may use the
    /// full capacity, including the slots reserved away from forwarded
    /// traffic.
    pub fn enqueue_self(&mut self, cfg: &ConnectionConfig, item: QueuedPacket) -> bool {
        if self.items.len() >= cfg.max_sending_queue {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Admit a forwarded packet. Rejected once fewer than
    /// `min_available_queue_entries` slots remain free, reserving headroom
    /// for this node's own traffic.
    pub fn enqueue_forwarded(&mut self, cfg: &ConnectionConfig, item: QueuedPacket) -> bool {
        if self.items.len() > cfg.max_sending_queue - cfg.min_available_queue_entries {
            return false;
        }
        self.items.push_back(item);
        true
    }

    pub fn peek_front(&self) -> Option<&QueuedPacket> {
        self.items.front()
    }

    pub fn pop_front(&mut self) -> Option<QueuedPacket> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Drop every expired item, wherever it sits in the queue. Returns how
    /// many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.is_expired(now));
        before - self.items.len()
    }
}
