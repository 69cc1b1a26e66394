//! Capacity-bounded production: active slots, the overflow FIFO and
//! stage-by-stage progress.

use sim_core::{
    Catalog, CustomerId, MaterialId, OrderId, Product, ProductionUnit, UnitId, UnitPriority,
};
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, warn};

/// Where a unit sits in the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Active,
    Overflow,
}

/// A unit that left production this tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub unit: ProductionUnit,
    /// `None` when the product disappeared from the catalog mid-production.
    pub product: Option<Product>,
}

/// Units moved by [`ProductionScheduler::backfill`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Backfill {
    /// Pulled from overflow into a free slot.
    pub started: Vec<ProductionUnit>,
    /// Pushed back to overflow because capacity shrank.
    pub paused: Vec<ProductionUnit>,
}

#[derive(Clone, Debug, Default)]
pub struct ProductionScheduler {
    active: Vec<ProductionUnit>,
    overflow: VecDeque<ProductionUnit>,
}

impl ProductionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(active: Vec<ProductionUnit>, overflow: Vec<ProductionUnit>) -> Self {
        Self {
            active,
            overflow: overflow.into(),
        }
    }

    pub fn active(&self) -> &[ProductionUnit] {
        &self.active
    }

    pub fn overflow(&self) -> &VecDeque<ProductionUnit> {
        &self.overflow
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.overflow.clear();
    }

    /// Take a free slot if there is one, otherwise wait in overflow.
    /// Expedited units go to the front of whichever collection they land in.
    pub fn admit(&mut self, unit: ProductionUnit, capacity: usize) -> Placement {
        let expedited = unit.priority == UnitPriority::Expedited;
        if self.active.len() < capacity {
            if expedited {
                self.active.insert(0, unit);
            } else {
                self.active.push(unit);
            }
            Placement::Active
        } else {
            if expedited {
                self.overflow.push_front(unit);
            } else {
                self.overflow.push_back(unit);
            }
            Placement::Overflow
        }
    }

    pub fn get(&self, order_id: OrderId) -> Option<(Placement, &ProductionUnit)> {
        if let Some(u) = self.active.iter().find(|u| u.order_id == order_id) {
            return Some((Placement::Active, u));
        }
        self.overflow
            .iter()
            .find(|u| u.order_id == order_id)
            .map(|u| (Placement::Overflow, u))
    }

    /// Remove the unit for `order_id`, searching active slots before overflow.
    pub fn remove(&mut self, order_id: OrderId) -> Option<(Placement, ProductionUnit)> {
        if let Some(i) = self.active.iter().position(|u| u.order_id == order_id) {
            return Some((Placement::Active, self.active.remove(i)));
        }
        let i = self.overflow.iter().position(|u| u.order_id == order_id)?;
        self.overflow.remove(i).map(|u| (Placement::Overflow, u))
    }

    /// Rewrite a unit in place. A unit waiting in overflow is also moved to
    /// the front so it is the next one scheduled.
    pub fn rework(
        &mut self,
        order_id: OrderId,
        f: impl FnOnce(&mut ProductionUnit),
    ) -> Option<Placement> {
        if let Some(u) = self.active.iter_mut().find(|u| u.order_id == order_id) {
            f(u);
            return Some(Placement::Active);
        }
        let i = self.overflow.iter().position(|u| u.order_id == order_id)?;
        let mut unit = self.overflow.remove(i)?;
        f(&mut unit);
        self.overflow.push_front(unit);
        Some(Placement::Overflow)
    }

    /// One tick of work for every active unit admitted before `tick`.
    /// Finished units are removed and returned in slot order.
    pub fn advance<C: Catalog + ?Sized>(&mut self, catalog: &C, tick: u64) -> Vec<Completion> {
        let mut done = Vec::new();
        let mut i = 0;
        while i < self.active.len() {
            let unit = &mut self.active[i];
            if unit.admitted_tick >= tick {
                i += 1;
                continue;
            }
            unit.stage_time_left = unit.stage_time_left.saturating_sub(1);
            unit.total_time_left = unit.total_time_left.saturating_sub(1);
            if unit.stage_time_left > 0 {
                i += 1;
                continue;
            }

            let Some(product) = catalog.product(&unit.product_id) else {
                warn!(order = %unit.order_id, product = %unit.product_id, "product vanished mid-production");
                unit.total_time_left = 0;
                let unit = self.active.remove(i);
                done.push(Completion { unit, product: None });
                continue;
            };
            if let Some(m) = product.materials.get(unit.stage_index) {
                unit.materials_done.insert(m.clone());
            }
            match next_stage(product, unit.stage_index + 1, &mut unit.carried) {
                Some(next) => {
                    unit.stage_index = next;
                    unit.stage_time_left = catalog.stage_ticks(&product.materials[next]);
                    i += 1;
                }
                None => {
                    let product = product.clone();
                    let unit = self.active.remove(i);
                    debug!(order = %unit.order_id, "production finished");
                    done.push(Completion {
                        unit,
                        product: Some(product),
                    });
                }
            }
        }
        done
    }

    /// Restore the capacity bound by pausing the most recently admitted units
    /// (highest `admitted_tick`, later slot on ties), then fill free slots
    /// from the front of overflow. Units entering a slot are stamped with `tick`.
    pub fn backfill(&mut self, capacity: usize, tick: u64) -> Backfill {
        let mut out = Backfill::default();
        while self.active.len() > capacity {
            let Some((latest, _)) = self
                .active
                .iter()
                .enumerate()
                .max_by_key(|(i, u)| (u.admitted_tick, *i))
            else {
                break;
            };
            let unit = self.active.remove(latest);
            out.paused.push(unit.clone());
            self.overflow.push_front(unit);
        }
        while self.active.len() < capacity {
            let Some(mut unit) = self.overflow.pop_front() else { break };
            unit.admitted_tick = tick;
            out.started.push(unit.clone());
            self.active.push(unit);
        }
        out
    }
}

/// First stage at or after `from` that is not covered by a carried material.
/// Each carried entry covers one stage and is consumed when it does.
pub(crate) fn next_stage(
    product: &Product,
    from: usize,
    carried: &mut Vec<MaterialId>,
) -> Option<usize> {
    (from..product.materials.len()).find(|&i| {
        let material = &product.materials[i];
        match carried.iter().position(|c| c == material) {
            Some(p) => {
                carried.remove(p);
                false
            }
            None => true,
        }
    })
}

/// A unit for `product` at its first stage with nothing done yet.
pub fn fresh_unit<C: Catalog + ?Sized>(
    catalog: &C,
    id: UnitId,
    order_id: OrderId,
    customer_id: CustomerId,
    product: &Product,
    priority: UnitPriority,
    tick: u64,
) -> ProductionUnit {
    let stage_time_left = product
        .materials
        .first()
        .map(|m| catalog.stage_ticks(m))
        .unwrap_or(1);
    ProductionUnit {
        id,
        order_id,
        customer_id,
        product_id: product.id.clone(),
        stage_index: 0,
        stage_time_left,
        materials_done: BTreeSet::new(),
        total_time_left: catalog.product_ticks(product),
        priority,
        carried: Vec::new(),
        admitted_tick: tick,
    }
}
