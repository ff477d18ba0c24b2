//! Bounded-by-watermark delivery queue with threshold callbacks.
//!
//! [`FlowControlQueue`] is the buffer between the transport's inbound thread
//! and the channel's dispatcher. Storage is unbounded; instead of rejecting
//! items, crossing the high watermark on enqueue fires a callback that the
//! channel uses to suspend delivery at the broker, and falling back to the
//! low watermark on dequeue fires the matching resume callback.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// One watermark crossing, stamped with a queue-wide sequence number.
///
/// The sequence is assigned under the queue lock, so it totally orders low
/// and high crossings even though the callbacks themselves run after the
/// lock is released and may be scheduled out of order across threads. A
/// receiver that only cares about the latest crossing can drop any callback
/// whose `seq` is not the highest it has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    /// Queue size immediately after the crossing.
    pub size: usize,
    /// Strictly increasing across all crossings of this queue, starting at 1.
    pub seq: u64,
}

/// Callback invoked after a watermark crossing.
pub type ThresholdCallback = Box<dyn Fn(Crossing) + Send + Sync>;

struct Inner<T> {
    items: VecDeque<T>,
    stopped: bool,
    crossing_seq: u64,
}

/// Thread-safe FIFO queue with low/high watermark callbacks.
///
/// Crossing detection is edge-triggered on each size transition: the high
/// callback fires exactly once when the size goes from below `high` to at
/// least `high`, the low callback exactly once when it goes from above `low`
/// to at most `low`. The decision is made atomically with the size change,
/// under the queue lock; the callback itself runs after the lock is released,
/// on the enqueuing or dequeuing thread. Because invocation is out of lock,
/// callbacks on different threads can be observed out of crossing order; the
/// [`Crossing::seq`] stamp lets a receiver detect and drop the stale one.
/// Callback bodies must not reenter this queue.
pub struct FlowControlQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
    low: usize,
    high: usize,
    on_low: Option<ThresholdCallback>,
    on_high: Option<ThresholdCallback>,
}

impl<T> FlowControlQueue<T> {
    /// Create a queue with the given watermarks and optional callbacks.
    ///
    /// Requires `low <= high`. Passing `None` for both callbacks disables
    /// flow control entirely (the watermarks become inert).
    pub fn new(
        low: usize,
        high: usize,
        on_low: Option<ThresholdCallback>,
        on_high: Option<ThresholdCallback>,
    ) -> Self {
        assert!(low <= high, "low watermark {low} exceeds high {high}");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                stopped: false,
                crossing_seq: 0,
            }),
            available: Condvar::new(),
            low,
            high,
            on_low,
            on_high,
        }
    }

    /// Append an item and wake one blocked dequeuer.
    pub fn enqueue(&self, item: T) {
        let crossed_high = {
            let mut inner = self.inner.lock().unwrap();
            let old = inner.items.len();
            inner.items.push_back(item);
            let new = old + 1;
            self.available.notify_one();
            if old < self.high && new >= self.high {
                inner.crossing_seq += 1;
                Some(Crossing {
                    size: new,
                    seq: inner.crossing_seq,
                })
            } else {
                None
            }
        };

        if let (Some(crossing), Some(on_high)) = (crossed_high, &self.on_high) {
            tracing::trace!(
                size = crossing.size,
                seq = crossing.seq,
                high = self.high,
                "flow queue crossed high watermark"
            );
            on_high(crossing);
        }
    }

    /// Remove and return the head, blocking until an item is available.
    ///
    /// Returns `None` once the queue has been stopped, even if items remain.
    pub fn dequeue(&self) -> Option<T> {
        let (item, crossed_low) = {
            let mut inner = self.inner.lock().unwrap();
            let item = loop {
                if inner.stopped {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    break item;
                }
                inner = self.available.wait(inner).unwrap();
            };
            let new = inner.items.len();
            let old = new + 1;
            let crossing = if old > self.low && new <= self.low {
                inner.crossing_seq += 1;
                Some(Crossing {
                    size: new,
                    seq: inner.crossing_seq,
                })
            } else {
                None
            };
            (item, crossing)
        };

        if let (Some(crossing), Some(on_low)) = (crossed_low, &self.on_low) {
            tracing::trace!(
                size = crossing.size,
                seq = crossing.seq,
                low = self.low,
                "flow queue crossed low watermark"
            );
            on_low(crossing);
        }
        Some(item)
    }

    /// Mark the queue stopped and wake all blocked dequeuers.
    ///
    /// Idempotent; after this every `dequeue` returns `None`.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.stopped = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_queue(low: usize, high: usize) -> (FlowControlQueue<u32>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let lows = Arc::new(AtomicUsize::new(0));
        let highs = Arc::new(AtomicUsize::new(0));
        let l = lows.clone();
        let h = highs.clone();
        let queue = FlowControlQueue::new(
            low,
            high,
            Some(Box::new(move |_| {
                l.fetch_add(1, Ordering::SeqCst);
            })),
            Some(Box::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })),
        );
        (queue, lows, highs)
    }

    #[test]
    fn fifo_order() {
        let queue = FlowControlQueue::new(0, 100, None, None);
        for i in 0..10 {
            queue.enqueue(i);
        }
        for i in 0..10 {
            assert_eq!(queue.dequeue(), Some(i));
        }
    }

    #[test]
    fn high_callback_fires_once_per_crossing() {
        let (queue, _lows, highs) = counting_queue(1, 3);
        queue.enqueue(1);
        queue.enqueue(2);
        assert_eq!(highs.load(Ordering::SeqCst), 0);
        queue.enqueue(3); // size 2 -> 3, crosses high
        assert_eq!(highs.load(Ordering::SeqCst), 1);
        queue.enqueue(4); // already above, no second fire
        assert_eq!(highs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn low_callback_fires_once_per_crossing() {
        let (queue, lows, _highs) = counting_queue(1, 3);
        for i in 0..4 {
            queue.enqueue(i);
        }
        queue.dequeue(); // 4 -> 3
        queue.dequeue(); // 3 -> 2
        assert_eq!(lows.load(Ordering::SeqCst), 0);
        queue.dequeue(); // 2 -> 1, crosses low
        assert_eq!(lows.load(Ordering::SeqCst), 1);
        queue.dequeue(); // 1 -> 0, already at or below
        assert_eq!(lows.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recrossing_fires_again() {
        let (queue, lows, highs) = counting_queue(0, 2);
        queue.enqueue(1);
        queue.enqueue(2); // crosses high
        queue.dequeue();
        queue.dequeue(); // crosses low (size 0)
        queue.enqueue(3);
        queue.enqueue(4); // crosses high again
        assert_eq!(highs.load(Ordering::SeqCst), 2);
        assert_eq!(lows.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn crossing_seqs_totally_order_low_and_high_crossings() {
        let seqs = Arc::new(std::sync::Mutex::new(Vec::new()));
        let low_seqs = seqs.clone();
        let high_seqs = seqs.clone();
        let queue = FlowControlQueue::new(
            0,
            2,
            Some(Box::new(move |c: Crossing| {
                low_seqs.lock().unwrap().push(c.seq);
            })),
            Some(Box::new(move |c: Crossing| {
                high_seqs.lock().unwrap().push(c.seq);
            })),
        );

        queue.enqueue(1);
        queue.enqueue(2); // high crossing
        queue.dequeue();
        queue.dequeue(); // low crossing
        queue.enqueue(3);
        queue.enqueue(4); // high crossing again

        let seqs = seqs.lock().unwrap();
        assert_eq!(*seqs, vec![1, 2, 3]);
    }

    #[test]
    fn equal_watermarks_with_no_callbacks_are_inert() {
        let queue: FlowControlQueue<u32> = FlowControlQueue::new(5, 5, None, None);
        for i in 0..20 {
            queue.enqueue(i);
        }
        for _ in 0..20 {
            queue.dequeue();
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn stop_unblocks_waiting_dequeuer() {
        let queue: Arc<FlowControlQueue<u32>> = Arc::new(FlowControlQueue::new(0, 10, None, None));
        let q = queue.clone();
        let worker = std::thread::spawn(move || q.dequeue());
        std::thread::sleep(std::time::Duration::from_millis(50));
        queue.stop();
        assert_eq!(worker.join().unwrap(), None);
    }

    #[test]
    fn dequeue_after_stop_returns_none_even_with_items() {
        let queue = FlowControlQueue::new(0, 10, None, None);
        queue.enqueue(1);
        queue.stop();
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn stop_is_idempotent() {
        let queue: FlowControlQueue<u32> = FlowControlQueue::new(0, 10, None, None);
        queue.stop();
        queue.stop();
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    #[should_panic(expected = "low watermark")]
    fn inverted_watermarks_panic() {
        let _ = FlowControlQueue::<u32>::new(10, 5, None, None);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        /// Reference model: replay the same operation sequence and count
        /// expected crossings by edge detection on the size.
        fn expected_crossings(ops: &[bool], low: usize, high: usize) -> (usize, usize) {
            let mut size = 0usize;
            let mut lows = 0;
            let mut highs = 0;
            for &enqueue in ops {
                if enqueue {
                    let old = size;
                    size += 1;
                    if old < high && size >= high {
                        highs += 1;
                    }
                } else if size > 0 {
                    let old = size;
                    size -= 1;
                    if old > low && size <= low {
                        lows += 1;
                    }
                }
            }
            (lows, highs)
        }

        proptest! {
            #[test]
            fn crossings_match_reference_model(
                ops in proptest::collection::vec(any::<bool>(), 0..200),
                low in 0usize..5,
                extra in 1usize..10,
            ) {
                let high = low + extra;
                let (queue, lows, highs) = counting_queue(low, high);

                let mut size = 0usize;
                for &enqueue in &ops {
                    if enqueue {
                        queue.enqueue(0);
                        size += 1;
                    } else if size > 0 {
                        queue.dequeue();
                        size -= 1;
                    }
                }

                let (want_lows, want_highs) = expected_crossings(&ops, low, high);
                prop_assert_eq!(lows.load(Ordering::SeqCst), want_lows);
                prop_assert_eq!(highs.load(Ordering::SeqCst), want_highs);
            }
        }
    }
}
