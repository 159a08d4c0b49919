//! Single-producer / single-consumer async queue with an advisory
//! backpressure signal.
//!
//! The producer side is [`BufferedStream`] (cheap to clone); the consumer
//! side is the one [`StreamReader`] handed out by [`BufferedStream::reader`].
//! Both sides share a single termination path: whether the producer calls
//! [`BufferedStream::close`] or the consumer cancels (explicitly or by
//! dropping the reader), close listeners fire exactly once.

use futures_util::Stream;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

type CloseListener = Box<dyn FnOnce() + Send>;

struct Inner<T> {
    buffer: VecDeque<T>,
    closed: bool,
    listeners: Vec<CloseListener>,
    waker: Option<Waker>,
    reader_taken: bool,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    capacity: Option<usize>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transition to closed. Returns `false` if already closed.
    ///
    /// Listeners and the parked reader are notified outside the lock.
    fn close(&self, discard_buffer: bool) -> bool {
        let (listeners, waker) = {
            let mut inner = self.lock();
            if discard_buffer {
                inner.buffer.clear();
            }
            if inner.closed {
                return false;
            }
            inner.closed = true;
            (std::mem::take(&mut inner.listeners), inner.waker.take())
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        for listener in listeners {
            listener();
        }
        true
    }
}

/// Producer handle of a buffered stream.
pub struct BufferedStream<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BufferedStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for BufferedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("BufferedStream")
            .field("buffered", &inner.buffer.len())
            .field("closed", &inner.closed)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl<T> Default for BufferedStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BufferedStream<T> {
    /// Unbounded stream; [`desired_size`](Self::desired_size) is `None`.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Stream with an advisory capacity.
    ///
    /// Pushing past the capacity is never refused; `desired_size` simply
    /// goes negative.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    buffer: VecDeque::new(),
                    closed: false,
                    listeners: Vec::new(),
                    waker: None,
                    reader_taken: false,
                }),
                capacity,
            }),
        }
    }

    /// Take the consumer side. Only the first call returns a reader.
    pub fn reader(&self) -> Option<StreamReader<T>> {
        let mut inner = self.shared.lock();
        if inner.reader_taken {
            return None;
        }
        inner.reader_taken = true;
        Some(StreamReader {
            shared: self.shared.clone(),
        })
    }

    /// Enqueue a value for the consumer.
    ///
    /// Returns `false` (and drops the value) once the stream is closed.
    pub fn push(&self, value: T) -> bool {
        let waker = {
            let mut inner = self.shared.lock();
            if inner.closed {
                return false;
            }
            inner.buffer.push_back(value);
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Mark the stream terminal. Values already buffered are still
    /// delivered, then the reader sees end-of-stream. Idempotent.
    pub fn close(&self) {
        self.shared.close(false);
    }

    /// Register a listener for the closed transition.
    ///
    /// Fires exactly once, whichever side closes the stream. A listener
    /// registered after the stream closed fires immediately.
    pub fn on_close(&self, listener: impl FnOnce() + Send + 'static) {
        {
            let mut inner = self.shared.lock();
            if !inner.closed {
                inner.listeners.push(Box::new(listener));
                return;
            }
        }
        listener();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Number of buffered, not yet consumed values.
    pub fn len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining advisory capacity: `capacity - buffered`. Negative when the
    /// producer has overrun the capacity. `None` for unbounded streams.
    pub fn desired_size(&self) -> Option<isize> {
        let capacity = self.shared.capacity?;
        let buffered = self.shared.lock().buffer.len();
        Some(capacity as isize - buffered as isize)
    }
}

/// Consumer side of a [`BufferedStream`].
///
/// Yields values in push order and ends after the stream closes. Dropping
/// the reader cancels the stream.
pub struct StreamReader<T> {
    shared: Arc<Shared<T>>,
}

impl<T> StreamReader<T> {
    /// Consumer-initiated close: discard anything buffered and notify close
    /// listeners exactly as a producer `close()` would.
    pub fn cancel(&mut self) {
        if self.shared.close(true) {
            log::debug!("[relay-link] Buffered stream cancelled by consumer");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl<T> fmt::Debug for StreamReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Stream for StreamReader<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let mut inner = self.shared.lock();
        if let Some(value) = inner.buffer.pop_front() {
            return Poll::Ready(Some(value));
        }
        if inner.closed {
            return Poll::Ready(None);
        }
        inner.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> Drop for StreamReader<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_fifo_then_single_end() {
        let stream = BufferedStream::new();
        let mut reader = stream.reader().unwrap();
        for i in 0..5 {
            assert!(stream.push(i));
        }
        stream.close();

        let mut seen = Vec::new();
        while let Some(v) = reader.next().await {
            seen.push(v);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(reader.next().await.is_none(), "end-of-stream must be sticky");
    }

    #[tokio::test]
    async fn test_pending_read_is_woken_by_push_and_close() {
        let stream = BufferedStream::new();
        let mut reader = stream.reader().unwrap();

        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(v) = reader.next().await {
                seen.push(v);
            }
            seen
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.push("a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.push("b");
        stream.close();

        let seen = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should finish after close")
            .unwrap();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_close_listeners_fire_once() {
        let stream = BufferedStream::<u8>::new();
        let (count, listener) = counter();
        stream.on_close(listener);
        stream.close();
        stream.close();
        stream.close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_consumer_cancel_fires_same_listeners() {
        let stream = BufferedStream::<u8>::new();
        let (count, listener) = counter();
        stream.on_close(listener);

        let mut reader = stream.reader().unwrap();
        stream.push(1);
        reader.cancel();
        assert!(stream.is_closed());
        assert_eq!(stream.len(), 0, "cancel discards the buffer");

        stream.close();
        drop(reader);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_reader_closes_stream() {
        let stream = BufferedStream::<u8>::new();
        let (count, listener) = counter();
        stream.on_close(listener);
        drop(stream.reader());
        assert!(stream.is_closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_close_after_close_fires_immediately() {
        let stream = BufferedStream::<u8>::new();
        stream.close();
        let (count, listener) = counter();
        stream.on_close(listener);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_after_close_is_ignored() {
        let stream = BufferedStream::new();
        let mut reader = stream.reader().unwrap();
        stream.push(1);
        stream.close();
        assert!(!stream.push(2));
        assert_eq!(reader.next().await, Some(1));
        assert_eq!(reader.next().await, None);
    }

    #[test]
    fn test_desired_size_tracks_backlog() {
        let stream = BufferedStream::bounded(3);
        assert_eq!(stream.desired_size(), Some(3));
        stream.push('a');
        stream.push('b');
        assert_eq!(stream.desired_size(), Some(1));
        stream.push('c');
        stream.push('d');
        stream.push('e');
        assert_eq!(stream.desired_size(), Some(-2), "overflow is reported, not refused");
        assert_eq!(stream.len(), 5);
    }

    #[tokio::test]
    async fn test_desired_size_recovers_on_consume() {
        let stream = BufferedStream::bounded(2);
        let mut reader = stream.reader().unwrap();
        stream.push(1);
        stream.push(2);
        stream.push(3);
        assert_eq!(stream.desired_size(), Some(-1));
        reader.next().await;
        reader.next().await;
        assert_eq!(stream.desired_size(), Some(1));
    }

    #[test]
    fn test_unbounded_has_no_desired_size() {
        assert_eq!(BufferedStream::<u8>::new().desired_size(), None);
    }

    #[test]
    fn test_single_reader() {
        let stream = BufferedStream::<u8>::new();
        let _reader = stream.reader().unwrap();
        assert!(stream.reader().is_none());
    }
}
