//! Bounded request queue.
//!
//! A fixed power-of-two byte ring holding `{u64 length, path bytes}` records
//! padded to 8 bytes. Producers block on a "space" semaphore when the ring is
//! full; consumers park on a "data" semaphore that receives one permit per
//! enqueued record. Records are written and read under one lock, so order is
//! FIFO across all producers.

use hearth_core::sync::Semaphore;
use parking_lot::Mutex;

use crate::error::{AssetError, AssetResult};

const RECORD_HEADER: usize = size_of::<u64>();
const RECORD_ALIGN: usize = 8;

struct Ring {
    buf: Box<[u8]>,
    /// Monotonic byte cursors; positions in the ring are `cursor & mask`.
    write: u64,
    read: u64,
    pending: usize,
    /// Producers parked on `space`; each dequeue wakes at most one.
    waiting_producers: usize,
    closed: bool,
}

impl Ring {
    fn used(&self) -> usize {
        (self.write - self.read) as usize
    }

    fn copy_in(&mut self, pos: u64, src: &[u8]) {
        let size = self.buf.len();
        let start = (pos as usize) & (size - 1);
        let first = src.len().min(size - start);
        self.buf[start..start + first].copy_from_slice(&src[..first]);
        self.buf[..src.len() - first].copy_from_slice(&src[first..]);
    }

    fn copy_out(&self, pos: u64, dst: &mut [u8]) {
        let size = self.buf.len();
        let start = (pos as usize) & (size - 1);
        let first = dst.len().min(size - start);
        dst[..first].copy_from_slice(&self.buf[start..start + first]);
        let rest = dst.len() - first;
        dst[first..].copy_from_slice(&self.buf[..rest]);
    }
}

fn record_size(path_len: usize) -> usize {
    RECORD_HEADER + path_len.div_ceil(RECORD_ALIGN) * RECORD_ALIGN
}

pub(crate) struct RequestQueue {
    ring: Mutex<Ring>,
    space: Semaphore,
    data: Semaphore,
}

impl RequestQueue {
    pub(crate) fn new(size: usize) -> Self {
        assert!(
            size.is_power_of_two() && size >= 2 * RECORD_HEADER,
            "request queue size must be a power of two of at least 16 bytes, got {}",
            size
        );
        Self {
            ring: Mutex::new(Ring {
                buf: vec![0u8; size].into_boxed_slice(),
                write: 0,
                read: 0,
                pending: 0,
                waiting_producers: 0,
                closed: false,
            }),
            space: Semaphore::new(0),
            data: Semaphore::new(0),
        }
    }

    /// Largest path that fits in one record.
    pub(crate) fn max_path_len(&self) -> usize {
        self.ring.lock().buf.len() - RECORD_HEADER
    }

    /// Append a path, blocking while the ring is full.
    pub(crate) fn enqueue(&self, path: &str) -> AssetResult<()> {
        let record = record_size(path.len());

        loop {
            let mut ring = self.ring.lock();
            if ring.closed {
                return Err(AssetError::QueueClosed);
            }
            if record > ring.buf.len() {
                return Err(AssetError::PathTooLong {
                    path: path.to_string(),
                    max: ring.buf.len() - RECORD_HEADER,
                });
            }

            if ring.buf.len() - ring.used() >= record {
                let pos = ring.write;
                ring.copy_in(pos, &(path.len() as u64).to_le_bytes());
                ring.copy_in(pos + RECORD_HEADER as u64, path.as_bytes());
                ring.write += record as u64;
                ring.pending += 1;
                drop(ring);

                self.data.signal();
                return Ok(());
            }

            ring.waiting_producers += 1;
            drop(ring);
            tracing::trace!("Request queue full, waiting for space");
            self.space.wait();
        }
    }

    /// Pop the oldest path, or `None` if the ring is empty. Never blocks.
    pub(crate) fn dequeue(&self) -> Option<String> {
        let mut ring = self.ring.lock();
        if ring.used() == 0 {
            return None;
        }

        let pos = ring.read;
        let mut header = [0u8; RECORD_HEADER];
        ring.copy_out(pos, &mut header);
        let len = u64::from_le_bytes(header) as usize;

        let mut bytes = vec![0u8; len];
        ring.copy_out(pos + RECORD_HEADER as u64, &mut bytes);
        ring.read += record_size(len) as u64;
        ring.pending -= 1;
        let wake_producer = ring.waiting_producers > 0;
        if wake_producer {
            ring.waiting_producers -= 1;
        }
        drop(ring);

        if wake_producer {
            self.space.signal();
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Block until a record has been enqueued since the last wait.
    pub(crate) fn wait_for_data(&self) {
        self.data.wait();
    }

    /// Number of records waiting.
    pub(crate) fn len(&self) -> usize {
        self.ring.lock().pending
    }

    /// Refuse further enqueues and wake `consumers` parked consumers plus any
    /// blocked producers.
    pub(crate) fn close(&self, consumers: usize) {
        let mut ring = self.ring.lock();
        if ring.closed {
            return;
        }
        ring.closed = true;
        let producers = std::mem::take(&mut ring.waiting_producers);
        drop(ring);

        self.data.release_n(consumers);
        // Every blocked producer re-checks `closed` after waking.
        self.space.release_n(producers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = RequestQueue::new(256);
        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().as_deref(), Some("a"));
        assert_eq!(queue.dequeue().as_deref(), Some("b"));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_records_wrap_around_the_ring() {
        let queue = RequestQueue::new(64);
        for i in 0..50 {
            let path = format!("textures/{:03}.tex", i);
            queue.enqueue(&path).unwrap();
            assert_eq!(queue.dequeue(), Some(path));
        }
    }

    #[test]
    fn test_oversized_path_is_rejected() {
        let queue = RequestQueue::new(32);
        assert_eq!(queue.max_path_len(), 24);
        assert!(queue.enqueue(&"x".repeat(24)).is_ok());
        assert!(matches!(
            queue.enqueue(&"x".repeat(25)),
            Err(AssetError::PathTooLong { max: 24, .. })
        ));
    }

    #[test]
    fn test_full_queue_blocks_until_dequeue() {
        let queue = Arc::new(RequestQueue::new(32));
        // 8 + 8 bytes per record: two records fill the ring.
        queue.enqueue("first").unwrap();
        queue.enqueue("second").unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue("third"))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(queue.dequeue().as_deref(), Some("first"));

        producer.join().unwrap().unwrap();
        assert_eq!(queue.dequeue().as_deref(), Some("second"));
        assert_eq!(queue.dequeue().as_deref(), Some("third"));
    }

    #[test]
    fn test_dequeue_without_waiting_producers_leaves_no_permits() {
        let queue = RequestQueue::new(64);
        for i in 0..1000 {
            queue.enqueue(&format!("{}", i)).unwrap();
            assert!(queue.dequeue().is_some());
        }
        assert_eq!(queue.space.available_permits(), 0);
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(RequestQueue::new(32));
        queue.enqueue("first").unwrap();
        queue.enqueue("second").unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.enqueue("third"))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        queue.close(0);
        assert!(matches!(producer.join().unwrap(), Err(AssetError::QueueClosed)));
        assert_eq!(queue.space.available_permits(), 0);
    }

    #[test]
    fn test_close_rejects_and_wakes() {
        let queue = Arc::new(RequestQueue::new(32));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                queue.wait_for_data();
                queue.dequeue()
            })
        };

        queue.close(1);
        assert_eq!(consumer.join().unwrap(), None);
        assert!(matches!(queue.enqueue("late"), Err(AssetError::QueueClosed)));
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(RequestQueue::new(128));
        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(&format!("{}/{}", t, i)).unwrap();
                    }
                })
            })
            .collect();

        let mut received = Vec::new();
        while received.len() < 400 {
            queue.wait_for_data();
            while let Some(path) = queue.dequeue() {
                received.push(path);
            }
        }
        for p in producers {
            p.join().unwrap();
        }

        // Per-producer order is preserved.
        for t in 0..4 {
            let prefix = format!("{}/", t);
            let seq: Vec<usize> = received
                .iter()
                .filter_map(|p| p.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seq, (0..100).collect::<Vec<_>>());
        }
    }
}
