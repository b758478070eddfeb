//! # Forwarding Loop
//!
//! Pulls bounded batches from a [`BatchConsumer`], stages every payload in
//! the [`StagingCache`], submits a [`PreprocessTask`] per event and commits
//! the batch only after all of that succeeded. One batch is in flight at a
//! time, so a committed offset always implies its side effects were applied
//! at least once.
//!
//! Any failure before the commit ends the run with the batch uncommitted;
//! the broker redelivers it to the next consumer in the group.

use crate::cache::StagingCache;
use crate::config::{DecodeFailurePolicy, ForwarderOptions};
use crate::consumer::BatchConsumer;
use crate::error::{ForwarderError, ForwarderResult};
use crate::retry::with_retry;
use crate::scheduler::TaskScheduler;
use crate::stats::{ForwarderStats, LoopState};
use forwarder_core::{DecodeError, DecodedEnvelope, PreprocessTask, RawMessage};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Polled once per loop iteration; `true` ends the run
pub trait ShutdownPredicate: Send + Sync {
    fn is_shutdown_requested(&self) -> bool;
}

impl<F> ShutdownPredicate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_shutdown_requested(&self) -> bool {
        self()
    }
}

/// Predicate that never requests shutdown
pub fn never() -> impl ShutdownPredicate {
    || false
}

/// Shutdown flag that can be flipped from a signal handler
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}

impl ShutdownPredicate for ShutdownFlag {
    fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Totals of one completed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub batches_committed: u64,
    pub messages_forwarded: u64,
    pub messages_skipped: u64,
}

enum Outcome {
    Forwarded,
    Skipped,
}

/// Forwarding consumer bound to one broker client
pub struct ForwardingLoop<C: BatchConsumer> {
    consumer: C,
    cache: Arc<dyn StagingCache>,
    scheduler: Arc<dyn TaskScheduler>,
    options: ForwarderOptions,
    shutdown: Box<dyn ShutdownPredicate>,
    stats: Arc<ForwarderStats>,
    summary: RunSummary,
}

impl<C: BatchConsumer> ForwardingLoop<C> {
    /// Loop that runs until an error occurs; see [`ForwardingLoop::with_shutdown`]
    pub fn new(
        consumer: C,
        cache: Arc<dyn StagingCache>,
        scheduler: Arc<dyn TaskScheduler>,
        options: ForwarderOptions,
    ) -> Self {
        Self {
            consumer,
            cache,
            scheduler,
            options,
            shutdown: Box::new(never()),
            stats: Arc::new(ForwarderStats::new()),
            summary: RunSummary::default(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: impl ShutdownPredicate + 'static) -> Self {
        self.shutdown = Box::new(shutdown);
        self
    }

    /// Publish progress into externally owned statistics
    pub fn with_stats(mut self, stats: Arc<ForwarderStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<ForwarderStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown is requested or a fatal error occurs.
    ///
    /// The consumer is closed on every exit path. When closing fails after a
    /// fatal error, the fatal error is the one returned.
    pub async fn run(mut self) -> ForwarderResult<RunSummary> {
        info!(
            consumer = self.consumer.name(),
            cache = self.cache.name(),
            scheduler = self.scheduler.name(),
            batch_size = self.options.commit_batch_size,
            "Starting forwarder"
        );
        self.stats.set_state(LoopState::Running);

        let outcome = match self.options.validate() {
            Ok(()) => self.forward().await,
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.stats.record_fatal_error();
        }

        info!(consumer = self.consumer.name(), "Closing consumer");
        let closed = self.consumer.close().await;
        self.stats.set_state(LoopState::Stopped);

        match (outcome, closed) {
            (Ok(()), Ok(())) => {
                info!(
                    batches = self.summary.batches_committed,
                    forwarded = self.summary.messages_forwarded,
                    skipped = self.summary.messages_skipped,
                    "Forwarder stopped"
                );
                Ok(self.summary)
            }
            (Ok(()), Err(close_error)) => Err(close_error),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_error)) => {
                warn!("Failed to close consumer after fatal error: {}", close_error);
                Err(e)
            }
        }
    }

    async fn forward(&mut self) -> ForwarderResult<()> {
        while !self.shutdown.is_shutdown_requested() {
            self.forward_batch().await?;
        }

        self.stats.set_state(LoopState::Draining);
        info!("Shutdown requested, draining");
        Ok(())
    }

    /// Poll one batch, forward each message in delivery order, then commit
    async fn forward_batch(&mut self) -> ForwarderResult<()> {
        let batch = self
            .consumer
            .poll_batch(self.options.commit_batch_size, self.options.max_batch_time)
            .await?;
        self.stats.record_poll();

        if batch.is_empty() {
            return Ok(());
        }
        debug!("Forwarding batch of {} messages", batch.len());

        for message in batch {
            match self.forward_message(message).await? {
                Outcome::Forwarded => {
                    self.summary.messages_forwarded += 1;
                    self.stats.record_forwarded();
                }
                Outcome::Skipped => {
                    self.summary.messages_skipped += 1;
                    self.stats.record_skipped();
                }
            }
        }

        self.consumer.commit().await?;
        self.summary.batches_committed += 1;
        self.stats.record_commit();
        Ok(())
    }

    async fn forward_message(&self, message: RawMessage) -> ForwarderResult<Outcome> {
        let positioned = message.has_position();
        let RawMessage {
            topic,
            partition,
            offset,
            payload,
            error: fault,
        } = message;

        if let Some(fault) = fault {
            if !positioned {
                error!(%topic, "Consumer error: {}", fault);
                return Err(ForwarderError::Consumer {
                    topic,
                    reason: fault.reason,
                });
            }
            error!(%topic, partition, offset, "Received message with error: {}", fault);
            return Err(ForwarderError::Delivery {
                topic,
                partition,
                offset,
                reason: fault.reason,
            });
        }

        let decoded = match payload.as_deref() {
            Some(bytes) => DecodedEnvelope::decode(bytes),
            None => Err(DecodeError::Empty),
        };
        let envelope = match (decoded, self.options.decode_policy) {
            (Ok(envelope), _) => envelope,
            (Err(source), DecodeFailurePolicy::Fail) => {
                error!(%topic, partition, offset, "Undecodable message: {}", source);
                return Err(ForwarderError::Decode {
                    topic,
                    partition,
                    offset,
                    source,
                });
            }
            (Err(source), DecodeFailurePolicy::SkipAndLog) => {
                warn!(%topic, partition, offset, "Skipping undecodable message: {}", source);
                return Ok(Outcome::Skipped);
            }
        };

        let cache_key = envelope.cache_key();
        let cache = &self.cache;
        let ttl = self.options.cache_ttl;
        with_retry(&self.options.retry, "cache set", || {
            cache.set(&cache_key, &envelope.payload, ttl)
        })
        .await?;

        let task = PreprocessTask {
            cache_key,
            event_id: envelope.event_id,
            start_time: envelope.start_time,
        };
        let scheduler = &self.scheduler;
        with_retry(&self.options.retry, "schedule preprocess", || {
            scheduler.schedule(&task)
        })
        .await?;

        Ok(Outcome::Forwarded)
    }
}
