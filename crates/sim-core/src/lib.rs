#![deny(warnings)]

//! Core domain models and invariants for the order-fulfillment simulation.
//!
//! This crate defines the serializable types shared by the engine and its
//! collaborators, with validation helpers that guard admission-time
//! invariants. The [`Catalog`] trait is the seam to externally owned
//! product/material records, [`RandomSource`] drives every stochastic
//! outcome, and [`SimEvent`] is the contract consumed by reporting layers.

pub mod catalog;
pub mod event;
pub mod rng;

pub use catalog::{Catalog, InMemoryCatalog};
pub use event::{EventSink, ReasonCode, SimEvent, SinkError};
pub use rng::{RandomSource, ScriptedRandom, SeededRandom};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use thiserror::Error;

/// Identifier of the business that owns a simulation.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BusinessId(pub String);

/// Identifier of a catalog product.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

/// Identifier of a raw material.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub String);

/// Engine-assigned customer identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub u64);

/// Identifier of one production attempt. Unique for the lifetime of a simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

/// Identifier of a production or delivery record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u64);

/// Queue number, starting at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueId(pub u32);

impl fmt::Display for BusinessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Business configuration. Owned externally and read every tick, so capacity
/// may grow or shrink between ticks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    /// Number of production units that can progress at the same time.
    pub production_slots_count: u32,
    /// Transit time for a finished unit, in ticks (>= 1).
    pub delivery_time_seconds: u32,
    /// Number of customer queues created at start-up.
    pub queue_count: u32,
}

impl Business {
    /// Transit time with the lower bound of one tick applied.
    pub fn delivery_ticks(&self) -> u32 {
        self.delivery_time_seconds.max(1)
    }

    /// Production capacity as a slot count.
    pub fn capacity(&self) -> usize {
        self.production_slots_count as usize
    }
}

/// A raw material consumed by one production stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    /// Seconds (ticks) needed to process one unit.
    pub time_required: u32,
    /// Units available for reservation.
    pub stock: u32,
}

impl Material {
    /// Duration of a stage using this material; never shorter than one tick.
    pub fn stage_ticks(&self) -> u32 {
        self.time_required.max(1)
    }
}

/// A sellable product. Its material list defines the stage order; repeated
/// materials are separate stages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub materials: Vec<MaterialId>,
}

/// Customer priority. Higher variants are seated closer to the front of a
/// queue, but never ahead of the customer being served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Regular,
    /// Reorder and cancel requests.
    Followup,
    Vip,
}

/// What a customer came to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    #[default]
    Order,
    Reorder,
    Cancel,
}

impl ActionType {
    /// Priority given to a customer that did not ask for one.
    pub fn default_priority(self) -> Priority {
        match self {
            ActionType::Order => Priority::Regular,
            ActionType::Reorder | ActionType::Cancel => Priority::Followup,
        }
    }
}

/// A customer waiting in (or leaving) a queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub priority: Priority,
    /// Requested products; empty for cancellations.
    pub order: Vec<ProductId>,
    /// Ticks until the customer finishes deciding at the head of a queue.
    pub ordering_time_left: u32,
    pub money: Decimal,
    /// Failed payment attempts so far.
    pub retries: u32,
    pub action: ActionType,
    /// Production attempts targeted by a reorder or cancel.
    pub original_order_ids: Vec<OrderId>,
    /// Admission sequence number; lower arrived earlier.
    pub arrival: u64,
}

/// Caller-supplied description of an arriving customer. Missing fields are
/// filled in by the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerSpec {
    pub action: ActionType,
    pub priority: Option<Priority>,
    pub order: Vec<ProductId>,
    pub ordering_time_left: Option<u32>,
    pub money: Option<Decimal>,
    pub original_order_ids: Vec<OrderId>,
}

impl CustomerSpec {
    /// A regular order for `products`.
    pub fn order(products: Vec<ProductId>) -> Self {
        Self {
            action: ActionType::Order,
            order: products,
            ..Self::default()
        }
    }

    /// Replace the products of `originals` with `products`.
    pub fn reorder(originals: Vec<OrderId>, products: Vec<ProductId>) -> Self {
        Self {
            action: ActionType::Reorder,
            order: products,
            original_order_ids: originals,
            ..Self::default()
        }
    }

    /// Cancel the production attempts in `originals`.
    pub fn cancel(originals: Vec<OrderId>) -> Self {
        Self {
            action: ActionType::Cancel,
            original_order_ids: originals,
            ..Self::default()
        }
    }

    pub fn with_money(mut self, money: Decimal) -> Self {
        self.money = Some(money);
        self
    }

    pub fn with_decision_ticks(mut self, ticks: u32) -> Self {
        self.ordering_time_left = Some(ticks);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// A customer queue. Index 0 is the customer currently being served.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub customers: Vec<Customer>,
    pub is_open: bool,
}

impl Queue {
    /// A fresh, open, empty queue.
    pub fn new(id: QueueId) -> Self {
        Self {
            id,
            customers: Vec::new(),
            is_open: true,
        }
    }
}

/// Scheduling class of a production unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPriority {
    #[default]
    Normal,
    /// Reorders and reproductions after a failed delivery.
    Expedited,
}

/// A product being fabricated, either in an active slot or waiting in overflow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductionUnit {
    pub id: UnitId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    /// Position of the current stage in the product's material list.
    pub stage_index: usize,
    pub stage_time_left: u32,
    pub materials_done: BTreeSet<MaterialId>,
    pub total_time_left: u32,
    pub priority: UnitPriority,
    /// Materials reused from a replaced product; one matching stage is
    /// skipped per entry.
    #[serde(default)]
    pub carried: Vec<MaterialId>,
    /// Tick in which the unit entered the scheduler.
    pub admitted_tick: u64,
}

/// A finished unit in transit to its customer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryUnit {
    pub id: UnitId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub product_id: ProductId,
    pub product_name: String,
    pub cost: Decimal,
    pub time_left: u32,
    /// Tick in which the delivery was created.
    pub started_tick: u64,
}

/// Simulation configuration parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for deterministic RNG.
    pub rng_seed: u64,
    /// Per-tick probability that an in-transit delivery fails.
    pub delivery_failure_rate: f64,
    /// Probability of a generic payment failure after the funds check.
    pub business_error_rate: f64,
    /// Failed payment attempts after which an order is abandoned.
    pub max_payment_retries: u32,
    /// Bounds of the random decision countdown, in ticks.
    pub decision_ticks_min: u32,
    pub decision_ticks_max: u32,
    /// Decision countdown given to a customer re-queued after a payment failure.
    pub retry_decision_ticks: u32,
    /// Bounds of a random customer's wallet.
    pub money_min: u32,
    pub money_max: u32,
    /// Real-time pacing of the driver (milliseconds per tick).
    pub tick_interval_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rng_seed: 42,
            delivery_failure_rate: 0.05,
            business_error_rate: 0.05,
            max_payment_retries: 3,
            decision_ticks_min: 2,
            decision_ticks_max: 6,
            retry_decision_ticks: 2,
            money_min: 10,
            money_max: 50,
            tick_interval_ms: 1000,
        }
    }
}

/// Monotonic counters used to mint engine identifiers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdAllocator {
    next_customer: u64,
    next_order: u64,
    next_unit: u64,
    next_arrival: u64,
}

impl IdAllocator {
    pub fn customer(&mut self) -> CustomerId {
        self.next_customer += 1;
        CustomerId(self.next_customer)
    }

    pub fn order(&mut self) -> OrderId {
        self.next_order += 1;
        OrderId(self.next_order)
    }

    pub fn unit(&mut self) -> UnitId {
        self.next_unit += 1;
        UnitId(self.next_unit)
    }

    pub fn arrival(&mut self) -> u64 {
        self.next_arrival += 1;
        self.next_arrival
    }
}

/// Running totals reported to dashboards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStats {
    pub ticks: u64,
    pub customers_admitted: u64,
    pub orders_accepted: u64,
    pub orders_failed: u64,
    pub deliveries_started: u64,
    pub deliveries_completed: u64,
    pub deliveries_failed: u64,
    pub cancellations: u64,
    pub reorders: u64,
}

/// Production attempts owned by one customer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderOwnership {
    pub customer_id: CustomerId,
    pub order_ids: Vec<OrderId>,
}

/// Complete engine state, suitable for saving and restoring a simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimSnapshot {
    pub business_id: BusinessId,
    pub tick: u64,
    pub queues: Vec<Queue>,
    pub active: Vec<ProductionUnit>,
    pub overflow: Vec<ProductionUnit>,
    pub deliveries: Vec<DeliveryUnit>,
    pub orders: Vec<OrderOwnership>,
    pub ids: IdAllocator,
    pub stats: SimStats,
}

/// Validation errors for admission-time invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// An order or reorder must request at least one product.
    #[error("order must contain at least one product")]
    EmptyOrder,
    /// Cancellations do not request products.
    #[error("cancel requests must not contain products")]
    UnexpectedProducts,
    /// Reorders and cancellations must name the attempts they target.
    #[error("{0:?} requires at least one original order id")]
    MissingOriginalOrders(ActionType),
    /// A reorder pairs products with original ids; surplus products have no target.
    #[error("reorder lists {products} products for {ids} original order ids")]
    SurplusReorderProducts { products: usize, ids: usize },
    /// Regular orders do not target earlier attempts.
    #[error("new orders must not reference original order ids")]
    UnexpectedOriginalOrders,
    /// A supplied decision countdown must be at least one tick.
    #[error("decision countdown must be >= 1")]
    ZeroDecisionTime,
    /// Price or money must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    /// Probability outside [0, 1] or not finite.
    #[error("probability {0} is outside [0, 1]")]
    InvalidProbability(f64),
    /// Lower bound above upper bound, or a zero lower bound where one tick is required.
    #[error("invalid range for {field}: {min}..={max}")]
    InvalidRange {
        field: &'static str,
        min: u32,
        max: u32,
    },
    /// The retry cap must allow at least one attempt.
    #[error("max payment retries must be >= 1")]
    ZeroRetries,
    /// Two catalog records share an id.
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    /// A product references a material the catalog does not contain.
    #[error("product {product} references unknown material {material}")]
    UnknownMaterial { product: String, material: String },
    /// Restored state belongs to another business.
    #[error("snapshot belongs to business {found}, expected {expected}")]
    BusinessMismatch { expected: String, found: String },
}

/// Validate a customer before it is admitted to any queue.
pub fn validate_customer_spec(spec: &CustomerSpec) -> Result<(), ValidationError> {
    match spec.action {
        ActionType::Order => {
            if spec.order.is_empty() {
                return Err(ValidationError::EmptyOrder);
            }
            if !spec.original_order_ids.is_empty() {
                return Err(ValidationError::UnexpectedOriginalOrders);
            }
        }
        ActionType::Reorder => {
            if spec.order.is_empty() {
                return Err(ValidationError::EmptyOrder);
            }
            if spec.original_order_ids.is_empty() {
                return Err(ValidationError::MissingOriginalOrders(spec.action));
            }
            if spec.order.len() > spec.original_order_ids.len() {
                return Err(ValidationError::SurplusReorderProducts {
                    products: spec.order.len(),
                    ids: spec.original_order_ids.len(),
                });
            }
        }
        ActionType::Cancel => {
            if !spec.order.is_empty() {
                return Err(ValidationError::UnexpectedProducts);
            }
            if spec.original_order_ids.is_empty() {
                return Err(ValidationError::MissingOriginalOrders(spec.action));
            }
        }
    }
    if spec.ordering_time_left == Some(0) {
        return Err(ValidationError::ZeroDecisionTime);
    }
    if matches!(spec.money, Some(m) if m < Decimal::ZERO) {
        return Err(ValidationError::NegativeMoney);
    }
    Ok(())
}

fn validate_probability(p: f64) -> Result<(), ValidationError> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(ValidationError::InvalidProbability(p));
    }
    Ok(())
}

/// Validate simulation parameters.
pub fn validate_config(cfg: &SimConfig) -> Result<(), ValidationError> {
    validate_probability(cfg.delivery_failure_rate)?;
    validate_probability(cfg.business_error_rate)?;
    if cfg.max_payment_retries == 0 {
        return Err(ValidationError::ZeroRetries);
    }
    if cfg.decision_ticks_min == 0 || cfg.decision_ticks_min > cfg.decision_ticks_max {
        return Err(ValidationError::InvalidRange {
            field: "decision_ticks",
            min: cfg.decision_ticks_min,
            max: cfg.decision_ticks_max,
        });
    }
    if cfg.retry_decision_ticks == 0 {
        return Err(ValidationError::ZeroDecisionTime);
    }
    if cfg.money_min > cfg.money_max {
        return Err(ValidationError::InvalidRange {
            field: "money",
            min: cfg.money_min,
            max: cfg.money_max,
        });
    }
    Ok(())
}

/// Validate catalog records, including product -> material references.
pub fn validate_catalog(materials: &[Material], products: &[Product]) -> Result<(), ValidationError> {
    let mut material_ids = HashSet::new();
    for m in materials {
        if !material_ids.insert(&m.id) {
            return Err(ValidationError::DuplicateId(m.id.0.clone()));
        }
    }
    let mut product_ids = HashSet::new();
    for p in products {
        if !product_ids.insert(&p.id) {
            return Err(ValidationError::DuplicateId(p.id.0.clone()));
        }
        if p.price < Decimal::ZERO {
            return Err(ValidationError::NegativeMoney);
        }
        if let Some(missing) = p.materials.iter().find(|m| !material_ids.contains(m)) {
            return Err(ValidationError::UnknownMaterial {
                product: p.id.0.clone(),
                material: missing.0.clone(),
            });
        }
    }
    Ok(())
}
