use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{CarId, Event};

const CHANNEL_CAPACITY: usize = 256;

/// Per-car broadcast of applied events. A push gateway subscribes here.
pub struct NotifyHub {
    channels: DashMap<CarId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a car's events. Creates the channel if needed.
    pub fn subscribe(&self, car_id: CarId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(car_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, car_id: CarId, event: &Event) {
        if let Some(sender) = self.channels.get(&car_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a car's channel; subscribers see the stream close.
    pub fn remove(&self, car_id: &CarId) {
        self.channels.remove(car_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(7);

        let event = Event::ReservationCancelled {
            id: Ulid::new(),
            car_id: 7,
        };
        hub.send(7, &event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_cars_are_not_delivered() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(1);
        hub.send(2, &Event::CarRemoved { id: 2 });
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn remove_closes_stream() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(3);
        hub.remove(&3);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(1, &Event::CarRemoved { id: 1 });
    }
}
