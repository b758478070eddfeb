//! # In-Memory Backends
//!
//! Broker, cache and scheduler kept in process memory. The broker tracks
//! committed offsets per consumer group, so dropping a consumer without
//! committing and opening a new one in the same group redelivers the
//! uncommitted records, as a restarted process would see them.

use crate::cache::StagingCache;
use crate::consumer::BatchConsumer;
use crate::error::{ForwarderError, ForwarderResult};
use crate::scheduler::TaskScheduler;
use async_trait::async_trait;
use forwarder_core::{
    CacheKey, CollaboratorError, DecodedEnvelope, DeliveryFault, PreprocessTask, RawMessage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Side effect observed by the in-memory backends, in the order it happened
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Staged(CacheKey),
    Scheduled(String),
    /// Next offset per partition after the commit
    Committed(Vec<i64>),
}

/// Ordered record of side effects shared between in-memory backends
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, entry: JournalEntry) {
        self.entries.lock().await.push(entry);
    }

    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().await.clone()
    }
}

/// A commit as seen by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub group_id: String,
    pub offsets: Vec<i64>,
}

#[derive(Debug)]
struct BrokerState {
    topic: String,
    partitions: Vec<Vec<Vec<u8>>>,
    faults: HashMap<(i32, i64), String>,
    committed: HashMap<String, Vec<i64>>,
    commits: Vec<CommitRecord>,
    closed: HashMap<String, usize>,
}

/// Partitioned topic with consumer-group offset tracking
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    journal: Option<Journal>,
}

impl MemoryBroker {
    pub fn new(topic: impl Into<String>, partitions: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                topic: topic.into(),
                partitions: vec![Vec::new(); partitions.max(1)],
                faults: HashMap::new(),
                committed: HashMap::new(),
                commits: Vec::new(),
                closed: HashMap::new(),
            })),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Append a record, returning its offset
    pub async fn produce(&self, partition: i32, payload: Vec<u8>) -> ForwarderResult<i64> {
        let mut state = self.state.lock().await;
        let log = usize::try_from(partition)
            .ok()
            .and_then(|index| state.partitions.get_mut(index))
            .ok_or_else(|| ForwarderError::Broker(format!("unknown partition {}", partition)))?;
        log.push(payload);
        Ok(log.len() as i64 - 1)
    }

    pub async fn produce_envelope(
        &self,
        partition: i32,
        envelope: &DecodedEnvelope,
    ) -> ForwarderResult<i64> {
        let payload = envelope
            .encode()
            .map_err(|e| ForwarderError::Broker(e.to_string()))?;
        self.produce(partition, payload).await
    }

    /// Report `reason` once, to the first poll that reaches `offset` of `partition`
    pub async fn inject_fault(&self, partition: i32, offset: i64, reason: impl Into<String>) {
        self.state
            .lock()
            .await
            .faults
            .insert((partition, offset), reason.into());
    }

    /// New consumer in `group_id`, starting at the group's committed offsets
    pub fn consumer(&self, group_id: impl Into<String>) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            group_id: group_id.into(),
            positions: None,
            closed: false,
        }
    }

    /// Next offset per partition the group resumes from
    pub async fn committed_offsets(&self, group_id: &str) -> Vec<i64> {
        let state = self.state.lock().await;
        state
            .committed
            .get(group_id)
            .cloned()
            .unwrap_or_else(|| vec![0; state.partitions.len()])
    }

    pub async fn commits(&self) -> Vec<CommitRecord> {
        self.state.lock().await.commits.clone()
    }

    /// Number of consumers of `group_id` that were closed
    pub async fn close_count(&self, group_id: &str) -> usize {
        self.state
            .lock()
            .await
            .closed
            .get(group_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Consumer handed out by [`MemoryBroker::consumer`]
#[derive(Debug)]
pub struct MemoryConsumer {
    broker: MemoryBroker,
    group_id: String,
    positions: Option<Vec<i64>>,
    closed: bool,
}

#[async_trait]
impl BatchConsumer for MemoryConsumer {
    async fn poll_batch(
        &mut self,
        max_messages: usize,
        timeout: Duration,
    ) -> ForwarderResult<Vec<RawMessage>> {
        if self.closed {
            return Err(ForwarderError::ConsumerClosed);
        }

        let mut batch = Vec::new();
        {
            let mut state = self.broker.state.lock().await;
            let state = &mut *state;
            let positions = self.positions.get_or_insert_with(|| {
                state
                    .committed
                    .get(&self.group_id)
                    .cloned()
                    .unwrap_or_else(|| vec![0; state.partitions.len()])
            });

            'partitions: for (index, log) in state.partitions.iter().enumerate() {
                let partition = index as i32;
                loop {
                    if batch.len() >= max_messages {
                        break 'partitions;
                    }
                    let offset = positions[index];
                    if let Some(reason) = state.faults.remove(&(partition, offset)) {
                        batch.push(RawMessage::failed(
                            state.topic.clone(),
                            partition,
                            offset,
                            DeliveryFault::new(reason),
                        ));
                        return Ok(batch);
                    }
                    match log.get(offset as usize) {
                        Some(payload) => {
                            batch.push(RawMessage::new(
                                state.topic.clone(),
                                partition,
                                offset,
                                payload.clone(),
                            ));
                            positions[index] += 1;
                        }
                        None => break,
                    }
                }
            }
        }

        if batch.is_empty() {
            tokio::time::sleep(timeout).await;
        }
        Ok(batch)
    }

    async fn commit(&mut self) -> ForwarderResult<()> {
        if self.closed {
            return Err(ForwarderError::ConsumerClosed);
        }
        let Some(positions) = self.positions.clone() else {
            return Ok(());
        };

        {
            let mut state = self.broker.state.lock().await;
            state.committed.insert(self.group_id.clone(), positions.clone());
            state.commits.push(CommitRecord {
                group_id: self.group_id.clone(),
                offsets: positions.clone(),
            });
        }
        if let Some(journal) = &self.broker.journal {
            journal.record(JournalEntry::Committed(positions)).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> ForwarderResult<()> {
        if !self.closed {
            self.closed = true;
            let mut state = self.broker.state.lock().await;
            *state.closed.entry(self.group_id.clone()).or_insert(0) += 1;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory_consumer"
    }
}

/// Staged payload with the expiry it was written with
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Vec<u8>,
    pub ttl: Duration,
}

/// In-memory staging cache
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<CacheKey, CachedValue>>>,
    writes: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    journal: Option<Journal>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Fail the next `count` writes
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn entries(&self) -> HashMap<CacheKey, CachedValue> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Successful writes so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn take_failure(failures: &AtomicUsize) -> bool {
    failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl StagingCache for MemoryCache {
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<(), CollaboratorError> {
        if take_failure(&self.failures) {
            return Err(CollaboratorError::Cache("injected failure".to_string()));
        }

        self.entries.lock().await.insert(
            key.clone(),
            CachedValue {
                value: value.to_vec(),
                ttl,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            journal.record(JournalEntry::Staged(key.clone())).await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory_cache"
    }
}

/// In-memory task scheduler recording every submission
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskScheduler {
    tasks: Arc<Mutex<Vec<PreprocessTask>>>,
    failures: Arc<AtomicUsize>,
    journal: Option<Journal>,
}

impl MemoryTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Fail the next `count` submissions
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub async fn tasks(&self) -> Vec<PreprocessTask> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl TaskScheduler for MemoryTaskScheduler {
    async fn schedule(&self, task: &PreprocessTask) -> Result<(), CollaboratorError> {
        if take_failure(&self.failures) {
            return Err(CollaboratorError::Scheduler("injected failure".to_string()));
        }

        self.tasks.lock().await.push(task.clone());
        if let Some(journal) = &self.journal {
            journal
                .record(JournalEntry::Scheduled(task.event_id.clone()))
                .await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory_scheduler"
    }
}
