//! Domain events emitted for every state transition, and the sink contract
//! used by reporting and persistence layers.

use crate::{BusinessId, CustomerId, ProductId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of transitions an event can describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    // -- Ordering --
    OrderAcceptedAndStarted,
    OrderQueued,
    ProductNotFound,
    MaterialsMissingForProduct,
    PaymentFailedInsufficientFunds,
    PaymentFailedBusinessError,
    OrderFailedMaxRetriesInsufficientFunds,
    OrderFailedMaxRetriesBusinessError,

    // -- Production --
    ProductionStartedFromQueue,
    ProductionPausedCapacityReduced,

    // -- Delivery --
    DeliveryStarted,
    DeliveryComplete,
    DeliveryFailedReproducingOrder,
    ReproductionQueued,

    // -- Cancel --
    CancelSuccessfulActive,
    CancelSuccessfulQueued,
    CancelFailedInDelivery,
    CancelFailedNotFound,

    // -- Reorder --
    ReorderSuccessWithOverlap,
    ReorderProcessedAsNewOrder,
    ReorderFailedNotFound,
    ReorderFailedInDelivery,
    ReorderFailedProductNotFound,
}

impl ReasonCode {
    /// Wire name of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::OrderAcceptedAndStarted => "ORDER_ACCEPTED_AND_STARTED",
            ReasonCode::OrderQueued => "ORDER_QUEUED",
            ReasonCode::ProductNotFound => "PRODUCT_NOT_FOUND",
            ReasonCode::MaterialsMissingForProduct => "MATERIALS_MISSING_FOR_PRODUCT",
            ReasonCode::PaymentFailedInsufficientFunds => "PAYMENT_FAILED_INSUFFICIENT_FUNDS",
            ReasonCode::PaymentFailedBusinessError => "PAYMENT_FAILED_BUSINESS_ERROR",
            ReasonCode::OrderFailedMaxRetriesInsufficientFunds => {
                "ORDER_FAILED_MAX_RETRIES_INSUFFICIENT_FUNDS"
            }
            ReasonCode::OrderFailedMaxRetriesBusinessError => "ORDER_FAILED_MAX_RETRIES_BUSINESS_ERROR",
            ReasonCode::ProductionStartedFromQueue => "PRODUCTION_STARTED_FROM_QUEUE",
            ReasonCode::ProductionPausedCapacityReduced => "PRODUCTION_PAUSED_CAPACITY_REDUCED",
            ReasonCode::DeliveryStarted => "DELIVERY_STARTED",
            ReasonCode::DeliveryComplete => "DELIVERY_COMPLETE",
            ReasonCode::DeliveryFailedReproducingOrder => "DELIVERY_FAILED_REPRODUCING_ORDER",
            ReasonCode::ReproductionQueued => "REPRODUCTION_QUEUED",
            ReasonCode::CancelSuccessfulActive => "CANCEL_SUCCESSFUL_ACTIVE",
            ReasonCode::CancelSuccessfulQueued => "CANCEL_SUCCESSFUL_QUEUED",
            ReasonCode::CancelFailedInDelivery => "CANCEL_FAILED_IN_DELIVERY",
            ReasonCode::CancelFailedNotFound => "CANCEL_FAILED_NOT_FOUND",
            ReasonCode::ReorderSuccessWithOverlap => "REORDER_SUCCESS_WITH_OVERLAP",
            ReasonCode::ReorderProcessedAsNewOrder => "REORDER_PROCESSED_AS_NEW_ORDER",
            ReasonCode::ReorderFailedNotFound => "REORDER_FAILED_NOT_FOUND",
            ReasonCode::ReorderFailedInDelivery => "REORDER_FAILED_IN_DELIVERY",
            ReasonCode::ReorderFailedProductNotFound => "REORDER_FAILED_PRODUCT_NOT_FOUND",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state transition, in the shape consumed by the reporting layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimEvent {
    /// Tick during which the transition happened.
    pub tick: u64,
    pub business_id: BusinessId,
    pub customer_id: CustomerId,
    pub success: bool,
    pub reason: ReasonCode,
    pub product_name: String,
    pub cost: Decimal,
    pub product_ids: Vec<ProductId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl SimEvent {
    pub fn new(
        tick: u64,
        business_id: BusinessId,
        customer_id: CustomerId,
        reason: ReasonCode,
        success: bool,
    ) -> Self {
        Self {
            tick,
            business_id,
            customer_id,
            success,
            reason,
            product_name: String::new(),
            cost: Decimal::ZERO,
            product_ids: Vec::new(),
            extra: None,
        }
    }

    pub fn with_products(mut self, name: impl Into<String>, cost: Decimal, ids: Vec<ProductId>) -> Self {
        self.product_name = name.into();
        self.cost = cost;
        self.product_ids = ids;
        self
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// Failures a sink may report. They are logged by the engine and never
/// interrupt a tick.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,
    #[error("sink is full, event dropped")]
    Full,
    #[error("io error: {0}")]
    Io(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e.to_string())
    }
}

/// Receiver of domain events. Publishing is fire-and-forget.
pub trait EventSink: Send {
    fn publish(&mut self, event: &SimEvent) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_serializes_as_wire_name() {
        let s = serde_json::to_string(&ReasonCode::OrderFailedMaxRetriesInsufficientFunds).unwrap();
        assert_eq!(s, "\"ORDER_FAILED_MAX_RETRIES_INSUFFICIENT_FUNDS\"");
        let s = serde_json::to_string(&ReasonCode::DeliveryFailedReproducingOrder).unwrap();
        assert_eq!(s, format!("\"{}\"", ReasonCode::DeliveryFailedReproducingOrder));
    }

    #[test]
    fn event_uses_camel_case_and_skips_empty_extra() {
        let ev = SimEvent::new(3, BusinessId("b".into()), CustomerId(9), ReasonCode::OrderQueued, true)
            .with_products("Axe", Decimal::new(20, 0), vec![ProductId("P".into())]);
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["customerId"], 9);
        assert_eq!(v["reason"], "ORDER_QUEUED");
        assert_eq!(v["productName"], "Axe");
        assert!(v.get("extra").is_none());
        let back: SimEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, ev);
    }
}
