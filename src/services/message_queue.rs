//! Polling FIFO that hands events from the network thread to the controller.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Thread-safe FIFO transferring ownership of messages between threads.
///
/// `try_pop` never blocks; the consumer polls on its own schedule (for
/// example once per event-loop tick). Messages still queued when the queue
/// is dropped are released undelivered.
pub struct MessageQueue<T> {
    messages: Mutex<VecDeque<T>>,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, msg: T) {
        self.messages.lock().push_back(msg);
    }

    /// Oldest message, or `None` when the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        self.messages.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MessageQueue<T> {
    fn drop(&mut self) {
        let pending = self.messages.get_mut().len();
        if pending > 0 {
            log::debug!(
                "[message_queue] Dropping {} undelivered message(s)",
                pending
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_pop_empty_returns_none() {
        let queue: MessageQueue<u32> = MessageQueue::new();
        assert!(queue.try_pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_single_producer() {
        let queue = MessageQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.len(), 5);
        let popped: Vec<i32> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let queue = Arc::new(MessageQueue::new());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        queue.push((producer, seq));
                    }
                })
            })
            .collect();

        let mut next_seq = [0usize; PRODUCERS];
        let mut received = 0;
        while received < PRODUCERS * PER_PRODUCER {
            match queue.try_pop() {
                Some((producer, seq)) => {
                    assert_eq!(seq, next_seq[producer], "producer {} out of order", producer);
                    next_seq[producer] += 1;
                    received += 1;
                }
                None => thread::yield_now(),
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(queue.try_pop().is_none());
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_drop_releases_pending_messages() {
        let dropped = Arc::new(AtomicUsize::new(0));
        {
            let queue = MessageQueue::new();
            queue.push(DropCounter(Arc::clone(&dropped)));
            queue.push(DropCounter(Arc::clone(&dropped)));
        }
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
    }
}
