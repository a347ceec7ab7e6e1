/*!
 * Event queue for hublink.
 *
 * Events produced by hub notifications and attribute loads are queued here
 * and only delivered when the caller drains the queue. Nothing in this crate
 * invokes observer code from a background task.
 */
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Mutex;

use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Default number of events buffered before the oldest is dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Bounded FIFO of events waiting for the caller's pump
#[derive(Debug)]
pub struct EventQueue<T> {
    pending: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Debug + Send> EventQueue<T> {
    /// Create a new event queue
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a new event queue with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// The maximum number of pending events
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue an event
    ///
    /// Returns the number of pending events. When the queue is full the oldest
    /// pending event is discarded.
    pub fn push(&self, event: T) -> Result<usize> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| Error::io("Failed to lock event queue"))?;

        if pending.len() >= self.capacity {
            if let Some(dropped) = pending.pop_front() {
                warn!("Event queue full, dropping {:?}", dropped);
            }
        }

        trace!("Queued event {:?}", event);
        pending.push_back(event);
        Ok(pending.len())
    }

    /// Take every pending event, oldest first
    pub fn drain(&self) -> Result<Vec<T>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| Error::io("Failed to lock event queue"))?;
        Ok(pending.drain(..).collect())
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Whether no events are pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every pending event
    pub fn clear(&self) -> Result<()> {
        self.pending
            .lock()
            .map_err(|_| Error::io("Failed to lock event queue"))?
            .clear();
        Ok(())
    }
}

impl<T: Debug + Send> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct TestEvent {
        id: u32,
    }

    #[test]
    fn test_push_and_drain_in_order() -> Result<()> {
        let queue = EventQueue::new();
        queue.push(TestEvent { id: 1 })?;
        queue.push(TestEvent { id: 2 })?;
        assert_eq!(queue.len(), 2);

        let events = queue.drain()?;
        assert_eq!(events, vec![TestEvent { id: 1 }, TestEvent { id: 2 }]);
        assert!(queue.is_empty());
        Ok(())
    }

    #[test_log::test]
    fn test_full_queue_drops_oldest() -> Result<()> {
        let queue = EventQueue::with_capacity(2);
        queue.push(TestEvent { id: 1 })?;
        queue.push(TestEvent { id: 2 })?;
        assert_eq!(queue.push(TestEvent { id: 3 })?, 2);

        let ids: Vec<u32> = queue.drain()?.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let queue = EventQueue::with_capacity(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(TestEvent { id: 7 })?;
        queue.clear()?;
        assert!(queue.drain()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_push() -> Result<()> {
        const NUM_PUBLISHERS: usize = 8;
        const EVENTS_PER_PUBLISHER: usize = 10;

        let queue = Arc::new(EventQueue::new());
        let mut handles = Vec::with_capacity(NUM_PUBLISHERS);

        for publisher_id in 0..NUM_PUBLISHERS {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..EVENTS_PER_PUBLISHER {
                    let id = (publisher_id * EVENTS_PER_PUBLISHER + i) as u32;
                    queue.push(TestEvent { id }).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.drain()?.len(), NUM_PUBLISHERS * EVENTS_PER_PUBLISHER);
        Ok(())
    }
}
