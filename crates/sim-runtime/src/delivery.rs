//! In-transit deliveries with a per-tick failure roll.

use sim_core::{DeliveryUnit, OrderId, RandomSource};
use std::mem;

/// Deliveries that left transit during one [`DeliveryManager::advance`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveryTick {
    pub failed: Vec<DeliveryUnit>,
    pub completed: Vec<DeliveryUnit>,
}

#[derive(Clone, Debug, Default)]
pub struct DeliveryManager {
    in_transit: Vec<DeliveryUnit>,
}

impl DeliveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_units(in_transit: Vec<DeliveryUnit>) -> Self {
        Self { in_transit }
    }

    pub fn start(&mut self, unit: DeliveryUnit) {
        self.in_transit.push(unit);
    }

    pub fn in_transit(&self) -> &[DeliveryUnit] {
        &self.in_transit
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.in_transit.iter().any(|d| d.order_id == order_id)
    }

    pub fn clear(&mut self) {
        self.in_transit.clear();
    }

    /// Move every delivery started before `tick` one step closer. A delivery
    /// reaching zero completes without rolling; the rest roll for failure.
    pub fn advance(
        &mut self,
        tick: u64,
        failure_rate: f64,
        rng: &mut dyn RandomSource,
    ) -> DeliveryTick {
        let mut out = DeliveryTick::default();
        for mut unit in mem::take(&mut self.in_transit) {
            if unit.started_tick >= tick {
                self.in_transit.push(unit);
                continue;
            }
            unit.time_left = unit.time_left.saturating_sub(1);
            if unit.time_left == 0 {
                out.completed.push(unit);
            } else if rng.chance(failure_rate) {
                out.failed.push(unit);
            } else {
                self.in_transit.push(unit);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sim_core::{CustomerId, ProductId, ScriptedRandom, SeededRandom, UnitId};

    fn delivery(n: u64, time_left: u32, started_tick: u64) -> DeliveryUnit {
        DeliveryUnit {
            id: UnitId(n),
            order_id: OrderId(n),
            customer_id: CustomerId(1),
            product_id: ProductId("P".into()),
            product_name: "Axe".into(),
            cost: Decimal::new(10, 0),
            time_left,
            started_tick,
        }
    }

    #[test]
    fn completes_after_time_left_ticks() {
        let mut d = DeliveryManager::new();
        d.start(delivery(1, 3, 0));
        let mut rng = ScriptedRandom::new();
        assert!(d.advance(1, 0.0, &mut rng).completed.is_empty());
        assert!(d.advance(2, 0.0, &mut rng).completed.is_empty());
        let out = d.advance(3, 0.0, &mut rng);
        assert_eq!(out.completed.len(), 1);
        assert!(d.in_transit().is_empty());
    }

    #[test]
    fn arriving_unit_is_never_rolled() {
        let mut d = DeliveryManager::new();
        d.start(delivery(1, 1, 0));
        // A scripted failure would be consumed if the roll happened.
        let mut rng = ScriptedRandom::new().with_chances([true]);
        let out = d.advance(1, 1.0, &mut rng);
        assert_eq!(out.completed.len(), 1);
        assert!(out.failed.is_empty());
        assert!(rng.chance(0.0));
    }

    #[test]
    fn failed_roll_removes_unit() {
        let mut d = DeliveryManager::new();
        d.start(delivery(1, 3, 0));
        d.start(delivery(2, 3, 0));
        let mut rng = ScriptedRandom::new().with_chances([false, true]);
        let out = d.advance(1, 0.05, &mut rng);
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed[0].order_id, OrderId(2));
        assert!(d.contains(OrderId(1)));
        assert!(!d.contains(OrderId(2)));
    }

    #[test]
    fn delivery_started_this_tick_waits() {
        let mut d = DeliveryManager::new();
        d.start(delivery(1, 1, 4));
        let mut rng = SeededRandom::new(1);
        assert_eq!(d.advance(4, 1.0, &mut rng), DeliveryTick::default());
        assert_eq!(d.in_transit()[0].time_left, 1);
        assert_eq!(d.advance(5, 1.0, &mut rng).completed.len(), 1);
    }
}
