//! Async adapter over the blocking consume path
//!
//! The consumer moves onto a blocking-pool thread that owns it exclusively
//! and loops on `consume`, forwarding records over a bounded channel. The
//! thread is the consumer's single polling thread, so rebalance handlers
//! still run there.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::consumer::Consumer;
use crate::context::{ConsumerContext, DefaultContext};
use crate::error::{ClientError, Result};
use crate::record::ConsumedRecord;

/// Stream configuration
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Records buffered between the polling thread and the receiver
    pub channel_capacity: usize,
    /// Upper bound on each `consume` call, which bounds stop latency
    pub poll_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Records from a consumer polled on a dedicated thread
pub struct ConsumerStream<C: ConsumerContext + 'static = DefaultContext> {
    rx: mpsc::Receiver<Result<ConsumedRecord>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Consumer<C>>>,
}

impl<C: ConsumerContext + 'static> ConsumerStream<C> {
    /// Start polling `consumer`. Must be called within a tokio runtime.
    pub fn spawn(consumer: Consumer<C>, config: StreamConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let running_worker = running.clone();

        let worker = tokio::task::spawn_blocking(move || {
            let mut consumer = consumer;
            tracing::debug!(consumer = consumer.name(), "stream polling started");
            while running_worker.load(Ordering::Acquire) && !tx.is_closed() {
                match consumer.consume(config.poll_interval) {
                    Ok(Some(record)) => {
                        if tx.blocking_send(Ok(record)).is_err() {
                            break;
                        }
                    },
                    Ok(None) => {},
                    Err(e) => {
                        let fatal = matches!(e, ClientError::AlreadyClosed | ClientError::Core(_));
                        if tx.blocking_send(Err(e)).is_err() || fatal {
                            break;
                        }
                    },
                }
            }
            tracing::debug!(consumer = consumer.name(), "stream polling stopped");
            consumer
        });

        Self {
            rx,
            running,
            worker: Some(worker),
        }
    }

    /// Next record, or `None` once polling has stopped.
    pub async fn recv(&mut self) -> Option<Result<ConsumedRecord>> {
        self.rx.recv().await
    }

    /// Stop polling and hand the consumer back. Records still buffered are
    /// discarded.
    ///
    /// # Errors
    /// `IoError` if the polling thread panicked.
    pub async fn stop(mut self) -> Result<Consumer<C>> {
        self.halt();
        let Some(worker) = self.worker.take() else {
            return Err(ClientError::AlreadyClosed);
        };
        worker
            .await
            .map_err(|e| ClientError::IoError(std::io::Error::other(format!("polling thread failed: {e}"))))
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::Release);
        // Unblocks a sender waiting on a full channel
        self.rx.close();
    }
}

impl<C: ConsumerContext + 'static> Drop for ConsumerStream<C> {
    /// The polling thread exits within one poll interval and drops the
    /// consumer, which releases its engine handle.
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.halt();
            tracing::debug!("stream dropped without stop");
        }
    }
}

impl<C: ConsumerContext + 'static> std::fmt::Debug for ConsumerStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerStream")
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
