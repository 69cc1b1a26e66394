//! Which customer owns which live production attempt.

use sim_core::{CustomerId, OrderId, OrderOwnership};
use std::collections::{BTreeMap, BTreeSet};

/// Two-way index between customers and the order ids they own. An order is
/// live from acceptance until it is delivered or cancelled.
#[derive(Clone, Debug, Default)]
pub struct OrderBook {
    by_customer: BTreeMap<CustomerId, BTreeSet<OrderId>>,
    owner: BTreeMap<OrderId, CustomerId>,
}

impl OrderBook {
    pub fn record(&mut self, customer: CustomerId, order: OrderId) {
        self.by_customer.entry(customer).or_default().insert(order);
        self.owner.insert(order, customer);
    }

    /// Forget `order`. Returns its former owner.
    pub fn release(&mut self, order: OrderId) -> Option<CustomerId> {
        let customer = self.owner.remove(&order)?;
        if let Some(set) = self.by_customer.get_mut(&customer) {
            set.remove(&order);
            if set.is_empty() {
                self.by_customer.remove(&customer);
            }
        }
        Some(customer)
    }

    /// Hand the ownership of `old` over to `new`, e.g. for a reproduction.
    pub fn transfer(&mut self, old: OrderId, new: OrderId) -> Option<CustomerId> {
        let customer = self.release(old)?;
        self.record(customer, new);
        Some(customer)
    }

    pub fn owner(&self, order: OrderId) -> Option<CustomerId> {
        self.owner.get(&order).copied()
    }

    /// Live orders of `customer`, ascending.
    pub fn orders_of(&self, customer: CustomerId) -> Vec<OrderId> {
        self.by_customer
            .get(&customer)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.owner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_customer.clear();
        self.owner.clear();
    }

    pub fn to_snapshot(&self) -> Vec<OrderOwnership> {
        self.by_customer
            .iter()
            .map(|(customer, orders)| OrderOwnership {
                customer_id: *customer,
                order_ids: orders.iter().copied().collect(),
            })
            .collect()
    }

    pub fn from_snapshot(entries: &[OrderOwnership]) -> Self {
        let mut book = Self::default();
        for e in entries {
            for order in &e.order_ids {
                book.record(e.customer_id, *order);
            }
        }
        book
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_release_and_transfer() {
        let mut book = OrderBook::default();
        book.record(CustomerId(1), OrderId(10));
        book.record(CustomerId(1), OrderId(11));
        book.record(CustomerId(2), OrderId(12));
        assert_eq!(book.orders_of(CustomerId(1)), vec![OrderId(10), OrderId(11)]);

        assert_eq!(book.transfer(OrderId(10), OrderId(13)), Some(CustomerId(1)));
        assert_eq!(book.owner(OrderId(13)), Some(CustomerId(1)));
        assert_eq!(book.owner(OrderId(10)), None);

        assert_eq!(book.release(OrderId(12)), Some(CustomerId(2)));
        assert!(book.orders_of(CustomerId(2)).is_empty());
        assert_eq!(book.release(OrderId(12)), None);
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn snapshot_roundtrip_keeps_ownership() {
        let mut book = OrderBook::default();
        book.record(CustomerId(3), OrderId(1));
        book.record(CustomerId(3), OrderId(4));
        let back = OrderBook::from_snapshot(&book.to_snapshot());
        assert_eq!(back.orders_of(CustomerId(3)), vec![OrderId(1), OrderId(4)]);
        assert_eq!(back.owner(OrderId(4)), Some(CustomerId(3)));
    }
}
