//! Bounded per-client FIFO of outbound request bundles.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::OcppjError;
use crate::message::RequestBundle;

/// Default capacity of each per-client outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Thread-safe bounded FIFO. The head is the bundle currently in flight (or
/// about to be); it is popped only once a matching reply arrived or a
/// terminal error was decided.
#[derive(Debug)]
pub struct RequestQueue {
    inner: Mutex<VecDeque<RequestBundle>>,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a bundle. Fails without mutating the queue when at capacity.
    pub fn push(&self, bundle: RequestBundle) -> Result<(), OcppjError> {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            return Err(OcppjError::QueueFull);
        }
        queue.push_back(bundle);
        Ok(())
    }

    /// Clone of the current head, if any.
    pub fn peek(&self) -> Option<RequestBundle> {
        self.inner.lock().front().cloned()
    }

    /// Remove and return the head.
    pub fn pop(&self) -> Option<RequestBundle> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Call;
    use serde_json::json;

    fn bundle(id: &str) -> RequestBundle {
        let call = Call::new(id, "MockFeature", json!({"mockValue": id}));
        let data = call.to_bytes().unwrap();
        RequestBundle { call, data }
    }

    #[test]
    fn test_fifo_order() {
        let queue = RequestQueue::new(5);
        for id in ["a", "b", "c"] {
            queue.push(bundle(id)).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek().unwrap().call.unique_id, "a");
        assert_eq!(queue.pop().unwrap().call.unique_id, "a");
        assert_eq!(queue.pop().unwrap().call.unique_id, "b");
        assert_eq!(queue.pop().unwrap().call.unique_id, "c");
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_at_capacity_fails_without_mutation() {
        let queue = RequestQueue::new(2);
        queue.push(bundle("a")).unwrap();
        queue.push(bundle("b")).unwrap();

        let err = queue.push(bundle("c")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "request queue is full, cannot push new element"
        );
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek().unwrap().call.unique_id, "a");
    }

    #[test]
    fn test_peek_is_non_destructive() {
        let queue = RequestQueue::new(2);
        assert!(queue.peek().is_none());
        queue.push(bundle("a")).unwrap();
        assert_eq!(queue.peek().unwrap().call.unique_id, "a");
        assert_eq!(queue.len(), 1);
    }
}
