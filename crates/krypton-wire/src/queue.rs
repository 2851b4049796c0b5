//! Outbound send queue.
//!
//! Encoded messages are appended by callers and drained in FIFO order by the
//! connection's writer loop. The queue is unbounded.

use crate::error::WireError;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Result of [`SendQueue::dequeue_blocking`].
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued {
    Message(Vec<u8>),
    Closed,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Vec<u8>>,
    closed: bool,
}

/// Thread-safe FIFO of encoded messages.
#[derive(Default)]
pub struct SendQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Fails once the queue has been closed.
    pub fn enqueue(&self, bytes: Vec<u8>) -> Result<(), WireError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return Err(WireError::ConnectionClosed);
            }
            state.entries.push_back(bytes);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Remove the oldest message, waiting while the queue is empty.
    ///
    /// Returns [`Dequeued::Closed`] as soon as the queue is closed, even if
    /// messages are still buffered.
    pub async fn dequeue_blocking(&self) -> Dequeued {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.closed {
                    return Dequeued::Closed;
                }
                if let Some(bytes) = state.entries.pop_front() {
                    return Dequeued::Message(bytes);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue, dropping buffered messages and waking the consumer.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.closed = true;
            state.entries.clear();
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = SendQueue::new();
        queue.enqueue(b"first".to_vec()).unwrap();
        queue.enqueue(b"second".to_vec()).unwrap();
        queue.enqueue(b"third".to_vec()).unwrap();

        assert_eq!(queue.dequeue_blocking().await, Dequeued::Message(b"first".to_vec()));
        assert_eq!(queue.dequeue_blocking().await, Dequeued::Message(b"second".to_vec()));
        assert_eq!(queue.dequeue_blocking().await, Dequeued::Message(b"third".to_vec()));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_consumer_wakes_on_enqueue() {
        let queue = Arc::new(SendQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_blocking().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(b"late".to_vec()).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Dequeued::Message(b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_close_wakes_consumer_and_rejects_enqueue() {
        let queue = Arc::new(SendQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_blocking().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Dequeued::Closed);
        assert!(queue.is_closed());
        assert!(matches!(
            queue.enqueue(b"x".to_vec()),
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_discards_buffered() {
        let queue = SendQueue::new();
        queue.enqueue(b"unsent".to_vec()).unwrap();
        queue.close();
        assert_eq!(queue.dequeue_blocking().await, Dequeued::Closed);
    }
}
