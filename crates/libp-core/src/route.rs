//! Parent selection and rtmetric (re)computation.

use quanta::Instant;
use tracing::{debug, info};

use crate::config::RTMETRIC_MAX;
use crate::connection::Connection;
use crate::ports::Ports;

impl<P: Ports> Connection<P> {
    /// Idempotent: invoked on every event that can change routes (neighbour
    /// update, ACK, timeout, periodic age). No-op at the sink.
    pub(crate) fn update_rtmetric(&mut self, now: Instant) {
        if self.is_sink {
            return;
        }

        self.update_parent(now);

        let new = if !self.parent.is_null() {
            match self.neighbours.find(self.parent) {
                Some(n) => n.composite_metric(now, &self.cfg).min(RTMETRIC_MAX as u32) as u16,
                None => RTMETRIC_MAX,
            }
        } else {
            RTMETRIC_MAX
        };

        // Defensive: a freshly chosen parent can never legitimately produce
        // a zero composite metric (that would mean we are the sink). Fall
        // back rather than poison the tree with a false root.
        let new = if new == 0 { RTMETRIC_MAX } else { new };

        let previous = self.rtmetric;
        self.rtmetric = new;

        if self.is_router {
            self.ports.set_value(new);
        }

        if previous == RTMETRIC_MAX && new != RTMETRIC_MAX {
            debug!(addr = %self.addr, rtmetric = new, "route acquired, draining send queue");
            self.send_queued_packet(now);
        }
    }

    /// Re-evaluate `self.parent` against the neighbour table's current
    /// best candidate, applying hysteresis against flapping.
    pub(crate) fn update_parent(&mut self, now: Instant) {
        let current = if self.parent.is_null() {
            None
        } else {
            self.neighbours.find(self.parent)
        };
        let best = self.neighbours.best(now, &self.cfg);

        match (current, best) {
            (_, None) => {
                if !self.parent.is_null() {
                    self.stats.routelost += 1;
                    info!(addr = %self.addr, "lost route: no viable parent");
                }
                self.parent = crate::address::Address::NULL;
            }
            (None, Some(best)) => {
                let best_addr = best.addr;
                self.parent = best_addr;
                self.stats.foundroute += 1;
                info!(addr = %self.addr, parent = %best_addr, "found route");
                self.bump_advertisement();
            }
            (Some(current), Some(best)) => {
                let current_composite = current.composite_metric(now, &self.cfg);
                let best_composite = best.composite_metric(now, &self.cfg);
                let threshold = self.cfg.significant_rtmetric_parent_change as u32;
                if best.addr != self.parent && best_composite + threshold < current_composite {
                    let best_addr = best.addr;
                    info!(
                        addr = %self.addr,
                        old_parent = %self.parent,
                        new_parent = %best_addr,
                        old_composite = current_composite,
                        new_composite = best_composite,
                        "switching parent"
                    );
                    self.parent = best_addr;
                    self.stats.newparent += 1;
                    self.bump_advertisement();
                }
            }
        }
    }

    /// Ask the announcement subsystem to accelerate its next broadcast.
    pub(crate) fn bump_advertisement(&mut self) {
        self.ports.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::config::ConnectionConfig;
    use crate::connection::Role;
    use crate::ports::NullPorts;

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
    fn adopts_first_viable_parent() {
        let mut c = open((3, 0));
        let now = Instant::now();
        c.neighbours.add(&c.cfg.clone(), Address::new(1, 0), 0); // sink, composite=16
        c.update_rtmetric(now);
        assert_eq!(c.parent, Address::new(1, 0));
        assert_eq!(c.stats.foundroute, 1);
        assert_ne!(c.rtmetric, crate::config::RTMETRIC_MAX);
    }

    #[test]
    fn non_switch_when_improvement_is_below_threshold() {
        // spec.md §8 Scenario 4: P composite=100, Q composite=80, threshold=24.
        // 80 + 24 = 104 >= 100, so the parent must not change.
        let mut c = open((3, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let p = Address::new(1, 0);
        let q = Address::new(2, 0);
        c.neighbours.add(&cfg, p, 84);
        c.neighbours.find_mut(p).unwrap().link_metric.update_tx(1); // value 16, composite 100
        c.update_rtmetric(now);
        assert_eq!(c.parent, p);

        c.neighbours.add(&cfg, q, 64);
        c.neighbours.find_mut(q).unwrap().link_metric.update_tx(1); // value 16, composite 80
        c.update_rtmetric(now);
        assert_eq!(c.parent, p, "hysteresis should keep the existing parent");
        assert_eq!(c.stats.newparent, 0);
    }

    #[test]
    fn switches_parent_when_improvement_exceeds_threshold() {
        // spec.md §8 Scenario 3: P composite=100, Q composite=70, threshold=24.
        // 70 + 24 = 94 < 100, so the parent switches.
        let mut c = open((3, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let p = Address::new(1, 0);
        c.neighbours.add(&cfg, p, 84);
        c.neighbours.find_mut(p).unwrap().link_metric.update_tx(1); // composite 100
        c.update_rtmetric(now);
        assert_eq!(c.parent, p);

        let q = Address::new(2, 0);
        c.neighbours.add(&cfg, q, 54);
        c.neighbours.find_mut(q).unwrap().link_metric.update_tx(1); // composite 70
        c.update_rtmetric(now);
        assert_eq!(c.parent, q);
        assert_eq!(c.stats.newparent, 1);
    }

    #[test]
    fn losing_all_neighbours_loses_route() {
        let mut c = open((3, 0));
        let now = Instant::now();
        let cfg = c.cfg.clone();
        let p = Address::new(1, 0);
        c.neighbours.add(&cfg, p, 0);
        c.update_rtmetric(now);
        assert_eq!(c.parent, p);

        c.neighbours.remove(p);
        c.update_rtmetric(now);
        assert!(c.parent.is_null());
        assert_eq!(c.stats.routelost, 1);
        assert_eq!(c.rtmetric, crate::config::RTMETRIC_MAX);
    }

    #[test]
    fn sink_never_recomputes_rtmetric() {
        let mut c = open((1, 0));
        c.is_sink = true;
        c.rtmetric = 0;
        c.update_rtmetric(Instant::now());
        assert_eq!(c.rtmetric, 0);
    }
}
