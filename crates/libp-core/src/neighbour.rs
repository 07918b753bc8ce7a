//! Per-neighbour soft state.

use quanta::Instant;

use crate::address::Address;
use crate::config::ConnectionConfig;
use crate::link_metric::LinkMetric;

#[derive(Debug, Clone)]
pub struct Neighbour {
    pub addr: Address,
    pub rtmetric: u16,
    /// Ticks since this neighbour was last observed (tx/rx/update/add).
    pub age: u16,
    /// Ticks since the link metric was last updated.
    pub metric_age: u16,
    pub link_metric: LinkMetric,
    congested_until: Option<Instant>,
}

impl Neighbour {
    pub fn new(addr: Address, rtmetric: u16) -> Self {
        Neighbour {
            addr,
            rtmetric,
            age: 0,
            metric_age: 0,
            link_metric: LinkMetric::new(),
            congested_until: None,
        }
    }

    pub fn on_tx(&mut self, n_tx: u8) {
        self.link_metric.update_tx(n_tx);
        self.metric_age = 0;
        self.age = 0;
    }

    pub fn on_tx_fail(&mut self, n_tx: u8) {
        self.link_metric.update_tx_fail(n_tx);
        self.metric_age = 0;
        self.age = 0;
    }

    pub fn on_rx(&mut self) {
        self.link_metric.update_rx();
        self.age = 0;
    }

    pub fn update_rtmetric(&mut self, rtmetric: u16) {
        self.rtmetric = rtmetric;
        self.age = 0;
    }

    pub fn set_congested(&mut self, now: Instant, cfg: &ConnectionConfig) {
        self.congested_until = Some(now + cfg.expected_congestion_duration);
    }

    pub fn is_congested(&self, now: Instant) -> bool {
        self.congested_until.is_some_and(|until| now < until)
    }

    /// `value()` plus a penalty while the neighbour is marked congested.
    pub fn effective_link_cost(&self, now: Instant, cfg: &ConnectionConfig) -> u16 {
        let base = self.link_metric.value();
        if self.is_congested(now) {
            base.saturating_add(cfg.congestion_penalty)
        } else {
            base
        }
    }

    /// `rtmetric + effective_link_cost` — the value parent selection minimises.
    pub fn composite_metric(&self, now: Instant, cfg: &ConnectionConfig) -> u32 {
        self.rtmetric as u32 + self.effective_link_cost(now, cfg) as u32
    }

    /// Advance soft-state age by one periodic tick. Returns `true` if the
    /// link metric was reset this tick (`metric_age` hit the ceiling).
    pub fn tick(&mut self, cfg: &ConnectionConfig) -> TickResult {
        self.age = self.age.saturating_add(1);
        self.metric_age = self.metric_age.saturating_add(1);

        let metric_reset = if self.metric_age == cfg.max_lm_age {
            self.link_metric = LinkMetric::new();
            self.metric_age = 0;
            true
        } else {
            false
        };

        let expired = self.age == cfg.max_age;

        TickResult {
            metric_reset,
            expired,
        }
    }
}

pub struct TickResult {
    pub metric_reset: bool,
    pub expired: bool,
}
