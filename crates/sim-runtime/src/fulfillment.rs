//! Customers leaving the head of a queue: orders, reorders and cancellations.

use crate::production::{fresh_unit, next_stage, Placement};
use crate::Simulation;
use rust_decimal::Decimal;
use serde_json::json;
use sim_core::{
    ActionType, Catalog, Customer, CustomerId, MaterialId, OrderId, Product, ProductId, QueueId,
    ReasonCode, UnitPriority,
};
use sim_econ::{authorize_payment, order_total, PaymentError, RetryDecision, RetryPolicy};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

fn placement_name(placement: Placement) -> &'static str {
    match placement {
        Placement::Active => "active",
        Placement::Overflow => "overflow",
    }
}

#[derive(Clone, Copy, Debug)]
enum OrderMode {
    Regular,
    /// Replacement for `replaced`, a unit with no reusable progress.
    Reorder { owner: CustomerId, replaced: OrderId },
}

/// A charge the customer could not pay. Nothing was reserved or charged.
struct Declined {
    error: PaymentError,
    name: String,
    total: Decimal,
}

impl<C: Catalog> Simulation<C> {
    pub(crate) fn fulfill(&mut self, queue: QueueId, mut customer: Customer) {
        debug!(customer = %customer.id, queue = %queue, action = ?customer.action, "customer decided");
        match customer.action {
            ActionType::Order => {
                if let Some(declined) = self.place_order(&mut customer, OrderMode::Regular) {
                    self.payment_failed(queue, customer, declined);
                }
            }
            ActionType::Reorder => self.reorder(queue, customer),
            ActionType::Cancel => self.cancel(customer),
        }
    }

    fn cancel(&mut self, customer: Customer) {
        for &order_id in &customer.original_order_ids {
            if let Some((placement, unit)) = self.production.remove(order_id) {
                self.orders.release(order_id);
                self.stats.cancellations += 1;
                let reason = match placement {
                    Placement::Active => ReasonCode::CancelSuccessfulActive,
                    Placement::Overflow => ReasonCode::CancelSuccessfulQueued,
                };
                let ev = self.unit_event(customer.id, &unit, reason, true);
                self.emit(ev);
            } else {
                let reason = if self.delivery.contains(order_id) {
                    ReasonCode::CancelFailedInDelivery
                } else {
                    ReasonCode::CancelFailedNotFound
                };
                let ev = self
                    .event(customer.id, reason, false)
                    .with_extra(json!({ "orderId": order_id.0 }));
                self.emit(ev);
            }
        }
        self.backfill();
    }

    /// Rework or replace every original id. The customer's wallet is shared
    /// across ids; replacements it cannot pay for are retried together as
    /// one plain order.
    fn reorder(&mut self, queue: QueueId, mut customer: Customer) {
        let Some(last) = customer.order.last().cloned() else {
            return;
        };
        let requested = std::mem::take(&mut customer.order);
        let originals = customer.original_order_ids.clone();
        let mut unpaid: Vec<ProductId> = Vec::new();
        let mut first_decline: Option<Declined> = None;
        for (i, &order_id) in originals.iter().enumerate() {
            let product_id = requested.get(i).cloned().unwrap_or_else(|| last.clone());
            let Some(product) = self.catalog.product(&product_id).cloned() else {
                let ev = self
                    .event(customer.id, ReasonCode::ReorderFailedProductNotFound, false)
                    .with_products("", Decimal::ZERO, vec![product_id])
                    .with_extra(json!({ "orderId": order_id.0 }));
                self.emit(ev);
                continue;
            };
            let Some(done) = self
                .production
                .get(order_id)
                .map(|(_, u)| u.materials_done.clone())
            else {
                let reason = if self.delivery.contains(order_id) {
                    ReasonCode::ReorderFailedInDelivery
                } else {
                    ReasonCode::ReorderFailedNotFound
                };
                let ev = self
                    .event(customer.id, reason, false)
                    .with_products(product.name, Decimal::ZERO, vec![product.id])
                    .with_extra(json!({ "orderId": order_id.0 }));
                self.emit(ev);
                continue;
            };

            let overlap: BTreeSet<MaterialId> = product
                .materials
                .iter()
                .filter(|m| done.contains(*m))
                .cloned()
                .collect();
            if !overlap.is_empty() {
                self.reuse_progress(customer.id, order_id, &product, overlap);
                continue;
            }

            self.production.remove(order_id);
            let owner = self.orders.release(order_id).unwrap_or(customer.id);
            customer.order = vec![product.id.clone()];
            let mode = OrderMode::Reorder {
                owner,
                replaced: order_id,
            };
            if let Some(declined) = self.place_order(&mut customer, mode) {
                debug!(customer = %customer.id, order = %order_id, error = %declined.error, "reorder replacement declined");
                unpaid.push(product.id);
                first_decline.get_or_insert(declined);
            }
        }

        if let Some(mut declined) = first_decline {
            let products: Vec<&Product> = unpaid
                .iter()
                .filter_map(|id| self.catalog.product(id))
                .collect();
            declined.total = order_total(products.iter().copied());
            declined.name = products
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            customer.order = unpaid;
            customer.action = ActionType::Order;
            customer.original_order_ids.clear();
            self.payment_failed(queue, customer, declined);
        }
    }

    /// Switch a unit to `product`, keeping the stages it shares with the
    /// work already done.
    fn reuse_progress(
        &mut self,
        customer: CustomerId,
        order_id: OrderId,
        product: &Product,
        overlap: BTreeSet<MaterialId>,
    ) {
        let time_saved = overlap
            .iter()
            .map(|m| self.catalog.stage_ticks(m))
            .fold(0u32, u32::saturating_add);
        let adjusted = self
            .catalog
            .product_ticks(product)
            .saturating_sub(time_saved)
            .max(1);
        let mut carried: Vec<MaterialId> = overlap.into_iter().collect();
        let (stage_index, stage_time_left) = match next_stage(product, 0, &mut carried) {
            Some(i) => (i, self.catalog.stage_ticks(&product.materials[i])),
            // Everything is reused; one closing tick remains.
            None => (product.materials.len().saturating_sub(1), 1),
        };

        let placed = self.production.rework(order_id, |u| {
            u.product_id = product.id.clone();
            u.stage_index = stage_index;
            u.stage_time_left = stage_time_left;
            u.total_time_left = adjusted;
            u.carried = carried;
            u.priority = UnitPriority::Expedited;
        });
        let Some(placed) = placed else {
            warn!(order = %order_id, "unit disappeared during reorder");
            return;
        };
        self.stats.reorders += 1;
        let ev = self
            .event(customer, ReasonCode::ReorderSuccessWithOverlap, true)
            .with_products(product.name.clone(), Decimal::ZERO, vec![product.id.clone()])
            .with_extra(json!({
                "orderId": order_id.0,
                "timeSaved": time_saved,
                "adjustedTotal": adjusted,
                "placement": placement_name(placed),
            }));
        self.emit(ev);
    }

    /// The order branch: resolve products, reserve materials for the whole
    /// order, charge, then hand one unit per product to production. A failed
    /// payment is handed back to the caller, which owns the retry.
    fn place_order(&mut self, customer: &mut Customer, mode: OrderMode) -> Option<Declined> {
        let resolved: Result<Vec<Product>, ProductId> = customer
            .order
            .iter()
            .map(|id| self.catalog.product(id).cloned().ok_or_else(|| id.clone()))
            .collect();
        let products = match resolved {
            Ok(products) => products,
            Err(missing) => {
                let reason = match mode {
                    OrderMode::Regular => ReasonCode::ProductNotFound,
                    OrderMode::Reorder { .. } => ReasonCode::ReorderFailedProductNotFound,
                };
                self.stats.orders_failed += 1;
                let ev = self
                    .event(customer.id, reason, false)
                    .with_products("", Decimal::ZERO, customer.order.clone())
                    .with_extra(json!({ "productId": missing.0 }));
                self.emit(ev);
                return None;
            }
        };
        let name = products
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let total = order_total(&products);

        let mut demand: BTreeMap<&MaterialId, u32> = BTreeMap::new();
        for m in products.iter().flat_map(|p| &p.materials) {
            *demand.entry(m).or_default() += 1;
        }
        let mut missing = Vec::new();
        for (m, need) in &demand {
            let have = self.catalog.material(m).map(|mat| mat.stock).unwrap_or(0);
            if have < *need {
                missing.push(m.0.clone());
            }
        }
        if !missing.is_empty() {
            self.stats.orders_failed += 1;
            let ev = self
                .event(customer.id, ReasonCode::MaterialsMissingForProduct, false)
                .with_products(name, total, customer.order.clone())
                .with_extra(json!({ "missing": missing }));
            self.emit(ev);
            return None;
        }

        let rate = self.config.business_error_rate;
        customer.money = match authorize_payment(customer.money, total, rate, &mut *self.rng) {
            Ok(remaining) => remaining,
            Err(error) => return Some(Declined { error, name, total }),
        };

        self.catalog.add_revenue(total);
        for (m, need) in &demand {
            let have = self.catalog.material(m).map(|mat| mat.stock).unwrap_or(0);
            self.catalog.set_material_stock(m, have.saturating_sub(*need));
        }

        let (owner, priority) = match mode {
            OrderMode::Regular => (customer.id, UnitPriority::Normal),
            OrderMode::Reorder { owner, .. } => (owner, UnitPriority::Expedited),
        };
        let capacity = self.capacity();
        for product in &products {
            let order_id = self.ids.order();
            let unit = fresh_unit(
                &self.catalog,
                self.ids.unit(),
                order_id,
                owner,
                product,
                priority,
                self.tick,
            );
            self.orders.record(owner, order_id);
            let placement = self.production.admit(unit, capacity);
            let (reason, extra) = match (mode, placement) {
                (OrderMode::Reorder { replaced, .. }, placed) => (
                    ReasonCode::ReorderProcessedAsNewOrder,
                    json!({
                        "orderId": order_id.0,
                        "replacedOrderId": replaced.0,
                        "placement": placement_name(placed),
                    }),
                ),
                (OrderMode::Regular, Placement::Active) => {
                    (ReasonCode::OrderAcceptedAndStarted, json!({ "orderId": order_id.0 }))
                }
                (OrderMode::Regular, Placement::Overflow) => {
                    (ReasonCode::OrderQueued, json!({ "orderId": order_id.0 }))
                }
            };
            let ev = self
                .event(customer.id, reason, true)
                .with_products(product.name.clone(), product.price, vec![product.id.clone()])
                .with_extra(extra);
            self.emit(ev);
        }
        match mode {
            OrderMode::Regular => self.stats.orders_accepted += 1,
            OrderMode::Reorder { .. } => self.stats.reorders += 1,
        }
        debug!(customer = %customer.id, %total, remaining = %customer.money, units = products.len(), "order accepted");
        None
    }

    /// Count a failed payment against the retry cap. Below the cap the same
    /// customer goes back to its queue with a short countdown.
    fn payment_failed(&mut self, queue: QueueId, mut customer: Customer, declined: Declined) {
        let Declined { error, name, total } = declined;
        let funds = !matches!(error, PaymentError::BusinessError);
        let policy = RetryPolicy::new(self.config.max_payment_retries);
        match policy.register_failure(&mut customer.retries) {
            RetryDecision::Retry { attempt } => {
                let reason = if funds {
                    ReasonCode::PaymentFailedInsufficientFunds
                } else {
                    ReasonCode::PaymentFailedBusinessError
                };
                let ev = self
                    .event(customer.id, reason, false)
                    .with_products(name, total, customer.order.clone())
                    .with_extra(json!({ "retries": attempt, "error": error.to_string() }));
                self.emit(ev);

                customer.ordering_time_left = self.config.retry_decision_ticks;
                if let Err(dropped) = self.queues.enqueue(customer, Some(queue)) {
                    warn!(customer = %dropped.id, "no queue left for payment retry, dropped");
                }
            }
            RetryDecision::GiveUp { attempts } => {
                let reason = if funds {
                    ReasonCode::OrderFailedMaxRetriesInsufficientFunds
                } else {
                    ReasonCode::OrderFailedMaxRetriesBusinessError
                };
                self.stats.orders_failed += 1;
                let ev = self
                    .event(customer.id, reason, false)
                    .with_products(name, total, customer.order.clone())
                    .with_extra(json!({ "retries": attempts, "error": error.to_string() }));
                self.emit(ev);
            }
        }
    }
}
