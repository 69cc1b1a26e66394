//! Customer queues: priority-respecting admission, head-of-queue decision
//! countdowns and rebalancing across open queues.

use sim_core::{Customer, Queue, QueueId};
use tracing::{debug, warn};

/// Outcome of a [`QueueManager::rebalance`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rebalance {
    /// Customers redistributed into open queues.
    pub moved: usize,
    /// Customers dropped because no queue was open.
    pub dropped: usize,
}

/// Owns every customer queue of one business.
#[derive(Clone, Debug, Default)]
pub struct QueueManager {
    queues: Vec<Queue>,
}

impl QueueManager {
    /// `count` fresh open queues numbered from 1.
    pub fn new(count: u32) -> Self {
        let mut m = Self::default();
        m.init(count);
        m
    }

    pub(crate) fn from_queues(queues: Vec<Queue>) -> Self {
        Self { queues }
    }

    /// Replace all queues with `count` fresh open queues. Waiting customers
    /// are dropped, not migrated.
    pub fn init(&mut self, count: u32) {
        let dropped = self.waiting();
        if dropped > 0 {
            debug!(dropped, "queues reinitialized");
        }
        self.queues = (1..=count).map(|n| Queue::new(QueueId(n))).collect();
    }

    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    pub fn queue(&self, id: QueueId) -> Option<&Queue> {
        self.queues.iter().find(|q| q.id == id)
    }

    /// Customers waiting across all queues.
    pub fn waiting(&self) -> usize {
        self.queues.iter().map(|q| q.customers.len()).sum()
    }

    /// Empties every queue but keeps the queues themselves.
    pub fn clear(&mut self) {
        for q in &mut self.queues {
            q.customers.clear();
        }
    }

    fn position(&self, id: QueueId) -> Option<usize> {
        self.queues.iter().position(|q| q.id == id)
    }

    /// The requested queue if it exists, else the shortest open queue (first
    /// one wins ties), else the shortest queue of any state.
    fn select(&self, target: Option<QueueId>) -> Option<usize> {
        if let Some(i) = target.and_then(|id| self.position(id)) {
            return Some(i);
        }
        let shortest_open = self
            .queues
            .iter()
            .enumerate()
            .filter(|(_, q)| q.is_open)
            .min_by_key(|(_, q)| q.customers.len())
            .map(|(i, _)| i);
        shortest_open.or_else(|| {
            self.queues
                .iter()
                .enumerate()
                .min_by_key(|(_, q)| q.customers.len())
                .map(|(i, _)| i)
        })
    }

    /// Seat `customer`, returning the queue it joined. Hands the customer
    /// back when there is no queue at all.
    pub fn enqueue(&mut self, customer: Customer, target: Option<QueueId>) -> Result<QueueId, Customer> {
        let Some(i) = self.select(target) else {
            return Err(customer);
        };
        let queue = &mut self.queues[i];
        insert_by_priority(&mut queue.customers, customer);
        Ok(queue.id)
    }

    /// Redistribute every waiting customer, oldest arrival first, round-robin
    /// over the open queues.
    pub fn rebalance(&mut self) -> Rebalance {
        let mut everyone = Vec::with_capacity(self.waiting());
        for q in &mut self.queues {
            everyone.append(&mut q.customers);
        }
        everyone.sort_by_key(|c| c.arrival);

        let open: Vec<usize> = self
            .queues
            .iter()
            .enumerate()
            .filter(|(_, q)| q.is_open)
            .map(|(i, _)| i)
            .collect();
        if open.is_empty() {
            if !everyone.is_empty() {
                warn!(dropped = everyone.len(), "no open queues to rebalance into");
            }
            return Rebalance {
                moved: 0,
                dropped: everyone.len(),
            };
        }

        let moved = everyone.len();
        for (n, customer) in everyone.into_iter().enumerate() {
            let i = open[n % open.len()];
            insert_by_priority(&mut self.queues[i].customers, customer);
        }
        debug!(moved, open = open.len(), "queues rebalanced");
        Rebalance { moved, dropped: 0 }
    }

    /// Flip a queue between open and closed, then rebalance. `None` when the
    /// queue does not exist.
    pub fn toggle_open(&mut self, id: QueueId) -> Option<Rebalance> {
        let Some(i) = self.position(id) else {
            warn!(queue = %id, "toggle on unknown queue ignored");
            return None;
        };
        self.queues[i].is_open = !self.queues[i].is_open;
        debug!(queue = %id, open = self.queues[i].is_open, "queue toggled");
        Some(self.rebalance())
    }

    /// Append a new open queue with the next number, then rebalance.
    pub fn add_queue(&mut self) -> QueueId {
        let next = self.queues.iter().map(|q| q.id.0).max().unwrap_or(0) + 1;
        let id = QueueId(next);
        self.queues.push(Queue::new(id));
        self.rebalance();
        id
    }

    /// Count down the head customer of every queue; customers whose countdown
    /// reaches zero leave their queue and are returned with the queue they
    /// left. Customers behind the head do not advance.
    pub fn tick_head_decisions(&mut self) -> Vec<(QueueId, Customer)> {
        let mut decided = Vec::new();
        for q in &mut self.queues {
            let Some(head) = q.customers.first_mut() else {
                continue;
            };
            head.ordering_time_left = head.ordering_time_left.saturating_sub(1);
            if head.ordering_time_left == 0 {
                let customer = q.customers.remove(0);
                decided.push((q.id, customer));
            }
        }
        decided
    }
}

/// Insert behind the head, before the first customer of strictly lower
/// priority; append when there is none.
fn insert_by_priority(line: &mut Vec<Customer>, customer: Customer) {
    let at = line
        .iter()
        .skip(1)
        .position(|c| c.priority < customer.priority)
        .map(|p| p + 1)
        .unwrap_or(line.len());
    line.insert(at, customer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use sim_core::{ActionType, CustomerId, Priority};

    fn customer(id: u64, priority: Priority) -> Customer {
        Customer {
            id: CustomerId(id),
            priority,
            order: vec![],
            ordering_time_left: 3,
            money: Decimal::new(20, 0),
            retries: 0,
            action: ActionType::Order,
            original_order_ids: vec![],
            arrival: id,
        }
    }

    fn ids(q: &Queue) -> Vec<u64> {
        q.customers.iter().map(|c| c.id.0).collect()
    }

    fn priority_of(n: u8) -> Priority {
        match n % 3 {
            0 => Priority::Regular,
            1 => Priority::Followup,
            _ => Priority::Vip,
        }
    }

    #[test]
    fn picks_shortest_open_queue_first_on_ties() {
        let mut m = QueueManager::new(3);
        assert_eq!(m.enqueue(customer(1, Priority::Regular), None), Ok(QueueId(1)));
        assert_eq!(m.enqueue(customer(2, Priority::Regular), None), Ok(QueueId(2)));
        assert_eq!(m.enqueue(customer(3, Priority::Regular), None), Ok(QueueId(3)));
        assert_eq!(m.enqueue(customer(4, Priority::Regular), None), Ok(QueueId(1)));
    }

    #[test]
    fn explicit_target_wins_and_unknown_target_falls_back() {
        let mut m = QueueManager::new(2);
        assert_eq!(m.enqueue(customer(1, Priority::Regular), Some(QueueId(2))), Ok(QueueId(2)));
        assert_eq!(m.enqueue(customer(2, Priority::Regular), Some(QueueId(2))), Ok(QueueId(2)));
        assert_eq!(m.enqueue(customer(3, Priority::Regular), Some(QueueId(9))), Ok(QueueId(1)));
    }

    #[test]
    fn falls_back_to_closed_queue_when_none_open() {
        let mut m = QueueManager::new(1);
        m.toggle_open(QueueId(1));
        assert_eq!(m.enqueue(customer(1, Priority::Regular), None), Ok(QueueId(1)));
    }

    #[test]
    fn no_queues_hands_customer_back() {
        let mut m = QueueManager::new(0);
        let back = m.enqueue(customer(1, Priority::Vip), None).unwrap_err();
        assert_eq!(back.id, CustomerId(1));
    }

    #[test]
    fn vip_jumps_line_but_not_head() {
        let mut m = QueueManager::new(1);
        m.enqueue(customer(1, Priority::Regular), None).unwrap();
        m.enqueue(customer(2, Priority::Regular), None).unwrap();
        m.enqueue(customer(3, Priority::Followup), None).unwrap();
        m.enqueue(customer(4, Priority::Vip), None).unwrap();
        m.enqueue(customer(5, Priority::Followup), None).unwrap();
        // Head stays; VIP first behind it; equal priority keeps arrival order.
        assert_eq!(ids(&m.queues()[0]), vec![1, 4, 3, 5, 2]);
    }

    #[test]
    fn only_head_counts_down() {
        let mut m = QueueManager::new(1);
        let mut first = customer(1, Priority::Regular);
        first.ordering_time_left = 2;
        m.enqueue(first, None).unwrap();
        m.enqueue(customer(2, Priority::Regular), None).unwrap();

        assert!(m.tick_head_decisions().is_empty());
        assert_eq!(m.queues()[0].customers[1].ordering_time_left, 3);
        let decided = m.tick_head_decisions();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].0, QueueId(1));
        assert_eq!(decided[0].1.id, CustomerId(1));
        assert_eq!(ids(&m.queues()[0]), vec![2]);
    }

    #[test]
    fn rebalance_round_robins_by_arrival() {
        let mut m = QueueManager::new(2);
        for id in 1..=4 {
            m.enqueue(customer(id, Priority::Regular), Some(QueueId(1))).unwrap();
        }
        let r = m.rebalance();
        assert_eq!(r, Rebalance { moved: 4, dropped: 0 });
        assert_eq!(ids(&m.queues()[0]), vec![1, 3]);
        assert_eq!(ids(&m.queues()[1]), vec![2, 4]);
    }

    #[test]
    fn closing_a_queue_moves_its_customers() {
        let mut m = QueueManager::new(2);
        for id in 1..=4 {
            m.enqueue(customer(id, Priority::Regular), None).unwrap();
        }
        let r = m.toggle_open(QueueId(2)).unwrap();
        assert_eq!(r.moved, 4);
        assert!(m.queues()[1].customers.is_empty());
        assert_eq!(ids(&m.queues()[0]), vec![1, 2, 3, 4]);
        assert!(m.toggle_open(QueueId(7)).is_none());
    }

    #[test]
    fn rebalance_without_open_queue_drops() {
        let mut m = QueueManager::new(1);
        m.enqueue(customer(1, Priority::Regular), None).unwrap();
        let r = m.toggle_open(QueueId(1)).unwrap();
        assert_eq!(r, Rebalance { moved: 0, dropped: 1 });
        assert_eq!(m.waiting(), 0);
    }

    #[test]
    fn add_queue_numbers_sequentially_and_spreads_load() {
        let mut m = QueueManager::new(1);
        for id in 1..=4 {
            m.enqueue(customer(id, Priority::Regular), None).unwrap();
        }
        assert_eq!(m.add_queue(), QueueId(2));
        assert_eq!(m.queues()[0].customers.len(), 2);
        assert_eq!(m.queues()[1].customers.len(), 2);
    }

    #[test]
    fn init_drops_waiting_customers() {
        let mut m = QueueManager::new(2);
        m.enqueue(customer(1, Priority::Regular), None).unwrap();
        m.init(3);
        assert_eq!(m.queues().len(), 3);
        assert_eq!(m.waiting(), 0);
        assert_eq!(m.queues()[2].id, QueueId(3));
    }

    proptest! {
        #[test]
        fn head_never_displaced(existing in proptest::collection::vec(0u8..3, 1..8), newcomer in 0u8..3) {
            let mut m = QueueManager::new(1);
            for (i, p) in existing.iter().enumerate() {
                m.enqueue(customer(i as u64 + 1, priority_of(*p)), None).unwrap();
            }
            let head = m.queues()[0].customers[0].id;
            m.enqueue(customer(100, priority_of(newcomer)), None).unwrap();
            prop_assert_eq!(m.queues()[0].customers[0].id, head);
        }

        #[test]
        fn rebalance_is_idempotent(
            prios in proptest::collection::vec(0u8..3, 0..20),
            queues in 1u32..5,
            closed in proptest::collection::vec(any::<bool>(), 4),
        ) {
            let mut m = QueueManager::new(queues);
            for (i, p) in prios.iter().enumerate() {
                m.enqueue(customer(i as u64 + 1, priority_of(*p)), None).unwrap();
            }
            for (i, c) in closed.iter().enumerate().take(queues as usize) {
                if *c && i > 0 {
                    m.queues[i].is_open = false;
                }
            }
            m.rebalance();
            let first: Vec<Vec<u64>> = m.queues().iter().map(ids).collect();
            m.rebalance();
            let second: Vec<Vec<u64>> = m.queues().iter().map(ids).collect();
            let mut a: Vec<Vec<u64>> = first.iter().map(|q| { let mut q = q.clone(); q.sort(); q }).collect();
            let mut b: Vec<Vec<u64>> = second.iter().map(|q| { let mut q = q.clone(); q.sort(); q }).collect();
            a.sort();
            b.sort();
            prop_assert_eq!(a, b);
            prop_assert_eq!(m.waiting(), prios.len());
        }
    }
}
