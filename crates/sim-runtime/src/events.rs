//! Fan-out of tick events to registered sinks.

use sim_core::{EventSink, SimEvent, SinkError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Publishes events to every sink; sink failures are logged and swallowed.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventDispatcher {
    pub fn add(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn publish_all(&mut self, events: &[SimEvent]) {
        for event in events {
            for (i, sink) in self.sinks.iter_mut().enumerate() {
                if let Err(e) = sink.publish(event) {
                    warn!(sink = i, tick = event.tick, reason = %event.reason, error = %e, "event sink failed");
                }
            }
        }
    }
}

/// Forwards events into a bounded tokio channel without ever blocking the
/// tick. A full channel drops the event.
pub struct ChannelSink {
    tx: mpsc::Sender<SimEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SimEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn publish(&mut self, event: &SimEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// A [`ChannelSink`] and the receiver draining it.
pub fn channel_sink(capacity: usize) -> (ChannelSink, mpsc::Receiver<SimEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{BusinessId, CustomerId, ReasonCode};
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<ReasonCode>>>);

    impl EventSink for Recorder {
        fn publish(&mut self, event: &SimEvent) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(event.reason);
            Ok(())
        }
    }

    struct Broken;

    impl EventSink for Broken {
        fn publish(&mut self, _event: &SimEvent) -> Result<(), SinkError> {
            Err(SinkError::Io("disk full".into()))
        }
    }

    fn event(reason: ReasonCode) -> SimEvent {
        SimEvent::new(1, BusinessId("b".into()), CustomerId(1), reason, true)
    }

    #[test]
    fn failing_sink_does_not_starve_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut d = EventDispatcher::default();
        assert!(d.is_empty());
        d.add(Box::new(Broken));
        d.add(Box::new(Recorder(seen.clone())));
        assert_eq!(d.len(), 2);
        d.publish_all(&[event(ReasonCode::OrderQueued), event(ReasonCode::DeliveryComplete)]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ReasonCode::OrderQueued, ReasonCode::DeliveryComplete]
        );
    }

    #[test]
    fn channel_sink_drops_when_full_and_reports_closed() {
        let (mut sink, mut rx) = channel_sink(1);
        sink.publish(&event(ReasonCode::OrderQueued)).unwrap();
        assert!(matches!(sink.publish(&event(ReasonCode::OrderQueued)), Err(SinkError::Full)));
        assert_eq!(rx.try_recv().unwrap().reason, ReasonCode::OrderQueued);
        drop(rx);
        assert!(matches!(sink.publish(&event(ReasonCode::OrderQueued)), Err(SinkError::Closed)));
    }
}
