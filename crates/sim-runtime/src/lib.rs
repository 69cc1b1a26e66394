#![deny(warnings)]

//! Order-fulfillment engine for one business.
//!
//! A [`Simulation`] owns the customer queues, the production slots with their
//! overflow FIFO, the in-transit deliveries and the order book. Each call to
//! [`Simulation::tick`] runs, in this order:
//!
//! 1. head-of-queue decision countdowns, fulfilling every customer that
//!    finished deciding (orders, reorders and cancellations);
//! 2. one unit of production work for every active unit, handing finished
//!    units to delivery;
//! 3. one unit of transit for every delivery started in an earlier tick,
//!    with failed deliveries reproduced as expedited units;
//! 4. backfill of free production slots from overflow.
//!
//! Events collected during the tick are published to the registered sinks
//! afterwards and returned in a [`TickReport`].

pub mod delivery;
pub mod driver;
pub mod events;
mod fulfillment;
pub mod orders;
pub mod production;
pub mod queues;

pub use delivery::{DeliveryManager, DeliveryTick};
pub use driver::{Driver, DriverError};
pub use events::{channel_sink, ChannelSink, EventDispatcher};
pub use orders::OrderBook;
pub use production::{fresh_unit, Backfill, Completion, Placement, ProductionScheduler};
pub use queues::{QueueManager, Rebalance};

use rust_decimal::Decimal;
use serde_json::json;
use sim_core::{
    validate_config, validate_customer_spec, BusinessId, Catalog, Customer, CustomerId,
    CustomerSpec, DeliveryUnit, EventSink, IdAllocator, OrderId, ProductionUnit, QueueId,
    RandomSource, ReasonCode, SeededRandom, SimConfig, SimEvent, SimSnapshot, SimStats,
    UnitPriority, ValidationError,
};
use sim_econ::random_wallet;
use tracing::{debug, info, warn};

/// Everything that happened during one tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub events: Vec<SimEvent>,
}

impl TickReport {
    /// Number of events carrying `reason`.
    pub fn count(&self, reason: ReasonCode) -> usize {
        self.events.iter().filter(|e| e.reason == reason).count()
    }
}

/// One business's simulation state and its collaborators.
pub struct Simulation<C: Catalog> {
    config: SimConfig,
    catalog: C,
    rng: Box<dyn RandomSource>,
    queues: QueueManager,
    production: ProductionScheduler,
    delivery: DeliveryManager,
    orders: OrderBook,
    sinks: EventDispatcher,
    pending: Vec<SimEvent>,
    tick: u64,
    ids: IdAllocator,
    stats: SimStats,
}

impl<C: Catalog> Simulation<C> {
    /// Engine seeded from `config.rng_seed`, with the business's configured
    /// number of queues.
    pub fn new(catalog: C, config: SimConfig) -> Result<Self, ValidationError> {
        let rng = Box::new(SeededRandom::new(config.rng_seed));
        Self::with_rng(catalog, config, rng)
    }

    /// Engine driven by a caller-supplied random source.
    pub fn with_rng(
        catalog: C,
        config: SimConfig,
        rng: Box<dyn RandomSource>,
    ) -> Result<Self, ValidationError> {
        validate_config(&config)?;
        let queues = QueueManager::new(catalog.business().queue_count);
        info!(business = %catalog.business().id, queues = queues.queues().len(), "simulation created");
        Ok(Self {
            config,
            catalog,
            rng,
            queues,
            production: ProductionScheduler::new(),
            delivery: DeliveryManager::new(),
            orders: OrderBook::default(),
            sinks: EventDispatcher::default(),
            pending: Vec::new(),
            tick: 0,
            ids: IdAllocator::default(),
            stats: SimStats::default(),
        })
    }

    /// Rebuild an engine from a saved snapshot. The snapshot must belong to
    /// the catalog's business.
    pub fn restore(
        snapshot: SimSnapshot,
        catalog: C,
        config: SimConfig,
        rng: Box<dyn RandomSource>,
    ) -> Result<Self, ValidationError> {
        validate_config(&config)?;
        let expected = &catalog.business().id;
        if &snapshot.business_id != expected {
            return Err(ValidationError::BusinessMismatch {
                expected: expected.0.clone(),
                found: snapshot.business_id.0,
            });
        }
        info!(business = %snapshot.business_id, tick = snapshot.tick, "simulation restored");
        Ok(Self {
            config,
            catalog,
            rng,
            queues: QueueManager::from_queues(snapshot.queues),
            production: ProductionScheduler::from_parts(snapshot.active, snapshot.overflow),
            delivery: DeliveryManager::from_units(snapshot.deliveries),
            orders: OrderBook::from_snapshot(&snapshot.orders),
            sinks: EventDispatcher::default(),
            pending: Vec::new(),
            tick: snapshot.tick,
            ids: snapshot.ids,
            stats: snapshot.stats,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// External catalog edits (restock, capacity changes) between ticks.
    pub fn catalog_mut(&mut self) -> &mut C {
        &mut self.catalog
    }

    pub fn business_id(&self) -> &BusinessId {
        &self.catalog.business().id
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    pub fn production(&self) -> &ProductionScheduler {
        &self.production
    }

    pub fn delivery(&self) -> &DeliveryManager {
        &self.delivery
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Orders of `customer` that are still in production or in transit.
    pub fn live_orders(&self, customer: CustomerId) -> Vec<OrderId> {
        self.orders.orders_of(customer)
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.add(sink);
        debug!(sinks = self.sinks.len(), "event sink registered");
    }

    /// Replace every queue with `count` fresh ones; waiting customers are dropped.
    pub fn init_queues(&mut self, count: u32) {
        self.queues.init(count);
    }

    /// Admit a customer. Missing countdown and money are drawn at random;
    /// priority defaults from the action. `Ok(None)` when no queue exists.
    pub fn enqueue(
        &mut self,
        spec: CustomerSpec,
        target: Option<QueueId>,
    ) -> Result<Option<Customer>, ValidationError> {
        validate_customer_spec(&spec)?;
        let ordering_time_left = match spec.ordering_time_left {
            Some(t) => t,
            None => self
                .rng
                .range_inclusive(self.config.decision_ticks_min, self.config.decision_ticks_max),
        };
        let money = match spec.money {
            Some(m) => m,
            None => random_wallet(&mut *self.rng, self.config.money_min, self.config.money_max),
        };
        let customer = Customer {
            id: self.ids.customer(),
            priority: spec.priority.unwrap_or_else(|| spec.action.default_priority()),
            order: spec.order,
            ordering_time_left,
            money,
            retries: 0,
            action: spec.action,
            original_order_ids: spec.original_order_ids,
            arrival: self.ids.arrival(),
        };
        match self.queues.enqueue(customer.clone(), target) {
            Ok(queue) => {
                self.stats.customers_admitted += 1;
                debug!(customer = %customer.id, queue = %queue, action = ?customer.action, "customer admitted");
                Ok(Some(customer))
            }
            Err(dropped) => {
                warn!(customer = %dropped.id, "no queue can accept customer, dropped");
                Ok(None)
            }
        }
    }

    /// Enqueue a regular order for one random catalog product.
    pub fn add_random_customer(&mut self) -> Option<Customer> {
        let products = self.catalog.product_ids();
        if products.is_empty() {
            return None;
        }
        let last = u32::try_from(products.len() - 1).unwrap_or(u32::MAX);
        let pick = self.rng.range_inclusive(0, last) as usize;
        let product = products.get(pick)?.clone();
        match self.enqueue(CustomerSpec::order(vec![product]), None) {
            Ok(customer) => customer,
            Err(e) => {
                warn!(error = %e, "random customer rejected");
                None
            }
        }
    }

    pub fn rebalance(&mut self) -> Rebalance {
        self.queues.rebalance()
    }

    pub fn toggle_queue(&mut self, id: QueueId) -> Option<Rebalance> {
        self.queues.toggle_open(id)
    }

    pub fn add_queue(&mut self) -> QueueId {
        self.queues.add_queue()
    }

    /// Drop all customers, units, deliveries and ownership records. Queues,
    /// counters and statistics are kept.
    pub fn clear(&mut self) {
        self.queues.clear();
        self.production.clear();
        self.delivery.clear();
        self.orders.clear();
        self.pending.clear();
        info!(business = %self.business_id(), "simulation cleared");
    }

    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            business_id: self.business_id().clone(),
            tick: self.tick,
            queues: self.queues.queues().to_vec(),
            active: self.production.active().to_vec(),
            overflow: self.production.overflow().iter().cloned().collect(),
            deliveries: self.delivery.in_transit().to_vec(),
            orders: self.orders.to_snapshot(),
            ids: self.ids.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) -> TickReport {
        self.tick += 1;
        let tick = self.tick;

        for (queue, customer) in self.queues.tick_head_decisions() {
            self.fulfill(queue, customer);
        }

        for done in self.production.advance(&self.catalog, tick) {
            self.start_delivery(done);
        }

        let rate = self.config.delivery_failure_rate;
        let moved = self.delivery.advance(tick, rate, &mut *self.rng);
        for failed in moved.failed {
            self.reproduce(failed);
        }
        for arrived in moved.completed {
            self.complete_delivery(arrived);
        }

        self.backfill();

        self.stats.ticks += 1;
        let events = std::mem::take(&mut self.pending);
        if !self.sinks.is_empty() {
            self.sinks.publish_all(&events);
        }
        if !events.is_empty() {
            debug!(tick, events = events.len(), "tick complete");
        }
        TickReport { tick, events }
    }

    fn capacity(&self) -> usize {
        self.catalog.business().capacity()
    }

    fn event(&self, customer: CustomerId, reason: ReasonCode, success: bool) -> SimEvent {
        SimEvent::new(self.tick, self.business_id().clone(), customer, reason, success)
    }

    /// Event about `unit`, priced from the catalog when the product still exists.
    fn unit_event(
        &self,
        customer: CustomerId,
        unit: &ProductionUnit,
        reason: ReasonCode,
        success: bool,
    ) -> SimEvent {
        let (name, cost) = self
            .catalog
            .product(&unit.product_id)
            .map(|p| (p.name.clone(), p.price))
            .unwrap_or_default();
        self.event(customer, reason, success)
            .with_products(name, cost, vec![unit.product_id.clone()])
            .with_extra(json!({ "orderId": unit.order_id.0 }))
    }

    fn emit(&mut self, event: SimEvent) {
        debug!(
            tick = event.tick,
            customer = %event.customer_id,
            reason = %event.reason,
            success = event.success,
            "event"
        );
        self.pending.push(event);
    }

    fn backfill(&mut self) {
        let capacity = self.capacity();
        let moved = self.production.backfill(capacity, self.tick);
        for unit in &moved.paused {
            let ev = self.unit_event(unit.customer_id, unit, ReasonCode::ProductionPausedCapacityReduced, false);
            self.emit(ev);
        }
        for unit in &moved.started {
            let ev = self.unit_event(unit.customer_id, unit, ReasonCode::ProductionStartedFromQueue, true);
            self.emit(ev);
        }
    }

    fn start_delivery(&mut self, done: Completion) {
        let Completion { unit, product } = done;
        let (name, cost) = product.map(|p| (p.name, p.price)).unwrap_or_default();
        let time_left = self.catalog.business().delivery_ticks();
        let delivery = DeliveryUnit {
            id: self.ids.unit(),
            order_id: unit.order_id,
            customer_id: unit.customer_id,
            product_id: unit.product_id.clone(),
            product_name: name.clone(),
            cost,
            time_left,
            started_tick: self.tick,
        };
        self.stats.deliveries_started += 1;
        let ev = self
            .event(unit.customer_id, ReasonCode::DeliveryStarted, true)
            .with_products(name, cost, vec![unit.product_id])
            .with_extra(json!({ "orderId": unit.order_id.0, "timeLeft": time_left }));
        self.emit(ev);
        self.delivery.start(delivery);
    }

    /// Rebuild a failed delivery from scratch as an expedited unit under a
    /// new order id.
    fn reproduce(&mut self, failed: DeliveryUnit) {
        self.stats.deliveries_failed += 1;
        let order_id = self.ids.order();
        if self.orders.transfer(failed.order_id, order_id).is_none() {
            self.orders.record(failed.customer_id, order_id);
        }
        let ev = self
            .event(failed.customer_id, ReasonCode::DeliveryFailedReproducingOrder, false)
            .with_products(failed.product_name.clone(), failed.cost, vec![failed.product_id.clone()])
            .with_extra(json!({ "orderId": failed.order_id.0, "newOrderId": order_id.0 }));
        self.emit(ev);

        let Some(product) = self.catalog.product(&failed.product_id).cloned() else {
            warn!(order = %failed.order_id, product = %failed.product_id, "cannot reproduce, product no longer exists");
            self.orders.release(order_id);
            return;
        };
        let unit = fresh_unit(
            &self.catalog,
            self.ids.unit(),
            order_id,
            failed.customer_id,
            &product,
            UnitPriority::Expedited,
            self.tick,
        );
        let capacity = self.capacity();
        let reason = match self.production.admit(unit, capacity) {
            Placement::Active => ReasonCode::OrderAcceptedAndStarted,
            Placement::Overflow => ReasonCode::ReproductionQueued,
        };
        let ev = self
            .event(failed.customer_id, reason, true)
            .with_products(product.name, Decimal::ZERO, vec![product.id])
            .with_extra(json!({ "orderId": order_id.0, "reproduction": true }));
        self.emit(ev);
    }

    fn complete_delivery(&mut self, arrived: DeliveryUnit) {
        self.stats.deliveries_completed += 1;
        self.orders.release(arrived.order_id);
        let ev = self
            .event(arrived.customer_id, ReasonCode::DeliveryComplete, true)
            .with_products(arrived.product_name, arrived.cost, vec![arrived.product_id])
            .with_extra(json!({ "orderId": arrived.order_id.0 }));
        self.emit(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{
        Business, InMemoryCatalog, Material, MaterialId, Priority, Product, ProductId,
        ScriptedRandom,
    };

    fn catalog(slots: u32) -> InMemoryCatalog {
        let business = Business {
            id: BusinessId("forge".into()),
            name: "Forge".into(),
            production_slots_count: slots,
            delivery_time_seconds: 2,
            queue_count: 1,
        };
        let materials = vec![
            Material { id: MaterialId("M1".into()), name: "Iron".into(), time_required: 2, stock: 5 },
            Material { id: MaterialId("M2".into()), name: "Oak".into(), time_required: 3, stock: 5 },
        ];
        let products = vec![Product {
            id: ProductId("P".into()),
            name: "Axe".into(),
            price: Decimal::new(10, 0),
            materials: vec![MaterialId("M1".into()), MaterialId("M2".into())],
        }];
        InMemoryCatalog::new(business, materials, products).unwrap()
    }

    fn sim(slots: u32, rng: ScriptedRandom) -> Simulation<InMemoryCatalog> {
        Simulation::with_rng(catalog(slots), SimConfig::default(), Box::new(rng)).unwrap()
    }

    fn order_p() -> CustomerSpec {
        CustomerSpec::order(vec![ProductId("P".into())])
            .with_money(Decimal::new(100, 0))
            .with_decision_ticks(1)
    }

    #[test]
    fn enqueue_fills_random_defaults() {
        let rng = ScriptedRandom::new().with_values([4, 37]);
        let mut s = sim(1, rng);
        let c = s
            .enqueue(CustomerSpec::cancel(vec![OrderId(1)]), None)
            .unwrap()
            .unwrap();
        assert_eq!(c.ordering_time_left, 4);
        assert_eq!(c.money, Decimal::new(37, 0));
        assert_eq!(c.priority, Priority::Followup);
        assert_eq!(s.stats().customers_admitted, 1);
    }

    #[test]
    fn invalid_spec_never_enters_a_queue() {
        let mut s = sim(1, ScriptedRandom::new());
        let err = s.enqueue(CustomerSpec::order(vec![]), None).unwrap_err();
        assert_eq!(err, ValidationError::EmptyOrder);
        assert_eq!(s.queues().waiting(), 0);
    }

    #[test]
    fn no_queue_drops_customer() {
        let mut s = sim(1, ScriptedRandom::new());
        s.init_queues(0);
        assert_eq!(s.enqueue(order_p(), None).unwrap(), None);
    }

    #[test]
    fn order_runs_through_production_and_delivery() {
        let mut s = sim(1, ScriptedRandom::new());
        s.enqueue(order_p(), None).unwrap();

        let r = s.tick();
        assert_eq!(r.count(ReasonCode::OrderAcceptedAndStarted), 1);
        let unit = &s.production().active()[0];
        assert_eq!((unit.stage_index, unit.stage_time_left, unit.total_time_left), (0, 2, 5));

        let mut started = 0;
        for _ in 0..5 {
            started += s.tick().count(ReasonCode::DeliveryStarted);
        }
        assert_eq!(started, 1);
        assert_eq!(s.delivery().in_transit()[0].time_left, 2);

        s.tick();
        let r = s.tick();
        assert_eq!(r.count(ReasonCode::DeliveryComplete), 1);
        assert!(s.live_orders(CustomerId(1)).is_empty());
        assert_eq!(s.stats().deliveries_completed, 1);
        assert_eq!(s.catalog().revenue(), Decimal::new(10, 0));
    }

    #[test]
    fn failed_delivery_is_reproduced_with_new_order_id() {
        // No roll during production; the first delivery roll fails.
        let mut s = sim(1, ScriptedRandom::new().with_chances([false, true]));
        s.enqueue(order_p(), None).unwrap();
        for _ in 0..6 {
            s.tick();
        }
        let first = s.live_orders(CustomerId(1));
        assert_eq!(first, vec![OrderId(1)]);

        let r = s.tick();
        assert_eq!(r.count(ReasonCode::DeliveryFailedReproducingOrder), 1);
        assert_eq!(r.count(ReasonCode::OrderAcceptedAndStarted), 1);
        let unit = &s.production().active()[0];
        assert_eq!(unit.priority, UnitPriority::Expedited);
        assert_eq!(unit.stage_index, 0);
        assert!(unit.materials_done.is_empty());
        assert_eq!(s.live_orders(CustomerId(1)), vec![unit.order_id]);
        assert_ne!(unit.order_id, OrderId(1));
    }

    #[test]
    fn product_removed_mid_production_still_ships() {
        let mut s = sim(1, ScriptedRandom::new());
        s.enqueue(order_p(), None).unwrap();
        s.tick();
        s.catalog_mut().remove_product(&ProductId("P".into()));
        assert_eq!(s.tick().count(ReasonCode::DeliveryStarted), 0);

        // The first stage ends on tick 3 and finds no product.
        let r = s.tick();
        let started: Vec<&SimEvent> = r
            .events
            .iter()
            .filter(|e| e.reason == ReasonCode::DeliveryStarted)
            .collect();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].product_name, "");
        assert_eq!(started[0].cost, Decimal::ZERO);
        assert!(s.production().active().is_empty());
        assert_eq!(s.delivery().in_transit()[0].product_name, "");
    }

    #[test]
    fn lost_delivery_of_vanished_product_is_not_rebuilt() {
        // Payment roll passes, the first transit roll fails.
        let mut s = sim(1, ScriptedRandom::new().with_chances([false, true]));
        s.enqueue(order_p(), None).unwrap();
        for _ in 0..6 {
            s.tick();
        }
        assert_eq!(s.delivery().in_transit().len(), 1);
        s.catalog_mut().remove_product(&ProductId("P".into()));

        let r = s.tick();
        assert_eq!(r.count(ReasonCode::DeliveryFailedReproducingOrder), 1);
        assert_eq!(r.count(ReasonCode::OrderAcceptedAndStarted), 0);
        assert_eq!(r.count(ReasonCode::ReproductionQueued), 0);
        assert!(s.production().active().is_empty());
        assert!(s.production().overflow().is_empty());
        assert!(s.delivery().in_transit().is_empty());
        assert!(s.live_orders(CustomerId(1)).is_empty());
        assert_eq!(s.stats().deliveries_failed, 1);
    }

    #[test]
    fn edited_recipe_applies_to_units_in_progress() {
        let mut s = sim(1, ScriptedRandom::new());
        s.enqueue(order_p(), None).unwrap();
        s.tick();
        // Drop the second stage while the first is still running.
        s.catalog_mut().upsert_product(Product {
            id: ProductId("P".into()),
            name: "Hatchet".into(),
            price: Decimal::new(7, 0),
            materials: vec![MaterialId("M1".into())],
        });
        s.tick();
        let r = s.tick();
        assert_eq!(r.count(ReasonCode::DeliveryStarted), 1);
        assert_eq!(r.events[0].product_name, "Hatchet");
        assert_eq!(r.events[0].cost, Decimal::new(7, 0));
        // Revenue was booked at the price paid.
        assert_eq!(s.catalog().revenue(), Decimal::new(10, 0));
    }

    #[test]
    fn config_is_kept_as_given() {
        let config = SimConfig {
            rng_seed: 9,
            tick_interval_ms: 250,
            ..SimConfig::default()
        };
        let s = Simulation::new(catalog(1), config.clone()).unwrap();
        assert_eq!(s.config(), &config);
    }

    #[test]
    fn snapshot_restore_resumes_identically() {
        let mut s = sim(1, ScriptedRandom::new());
        s.enqueue(order_p(), None).unwrap();
        s.enqueue(order_p(), None).unwrap();
        s.tick();
        s.tick();
        let snap = s.snapshot();
        let mut restored =
            Simulation::restore(snap.clone(), s.catalog().clone(), SimConfig::default(), Box::new(ScriptedRandom::new()))
                .unwrap();
        assert_eq!(restored.snapshot(), snap);
        assert_eq!(s.tick().events, restored.tick().events);
    }

    #[test]
    fn restore_rejects_other_business() {
        let s = sim(1, ScriptedRandom::new());
        let mut snap = s.snapshot();
        snap.business_id = BusinessId("elsewhere".into());
        let err = Simulation::restore(snap, catalog(1), SimConfig::default(), Box::new(ScriptedRandom::new()))
            .err()
            .unwrap();
        assert!(matches!(err, ValidationError::BusinessMismatch { .. }));
    }

    #[test]
    fn clear_keeps_queues_but_drops_work() {
        let mut s = sim(1, ScriptedRandom::new());
        s.add_queue();
        s.enqueue(order_p(), None).unwrap();
        s.enqueue(order_p().with_decision_ticks(5), None).unwrap();
        s.tick();
        s.clear();
        assert_eq!(s.queues().queues().len(), 2);
        assert_eq!(s.queues().waiting(), 0);
        assert!(s.production().active().is_empty());
        assert!(s.live_orders(CustomerId(1)).is_empty());
    }

    #[test]
    fn random_customer_orders_a_catalog_product() {
        let mut s = sim(1, ScriptedRandom::new());
        let c = s.add_random_customer().unwrap();
        assert_eq!(c.order, vec![ProductId("P".into())]);
        assert_eq!(c.priority, Priority::Regular);
    }
}
