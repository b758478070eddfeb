//! End-to-end tests for the forwarding pipeline on the in-memory backends

use forwarder_core::{
    CacheKey, DecodedEnvelope, ForwarderSettings, StreamCategory, StreamRegistry,
};
use forwarder_streaming::{
    ForwarderError, ForwarderOptions, ForwarderStats, ForwardingLoop, Journal, JournalEntry,
    LoopState, MemoryBroker, MemoryCache, MemoryTaskScheduler, RunSummary,
};
use std::sync::Arc;
use std::time::Duration;

const GROUP: &str = "ingest-consumer";

fn envelope(event_id: &str, project_id: u64) -> DecodedEnvelope {
    DecodedEnvelope {
        event_id: event_id.to_string(),
        project_id,
        start_time: 1_700_000_000.5,
        payload: format!("{{\"event_id\":\"{}\",\"project\":{}}}", event_id, project_id).into_bytes(),
    }
}

fn events_topic() -> String {
    StreamRegistry::new(ForwarderSettings::default().kafka)
        .resolve(StreamCategory::Events)
        .unwrap()
        .topic
}

fn options(batch_size: usize) -> ForwarderOptions {
    ForwarderOptions::from_settings(&ForwarderSettings::default())
        .with_commit_batch_size(batch_size)
        .with_max_batch_time(Duration::from_millis(1))
}

struct Pipeline {
    broker: MemoryBroker,
    cache: MemoryCache,
    scheduler: MemoryTaskScheduler,
    journal: Journal,
}

impl Pipeline {
    fn new(partitions: usize) -> Self {
        let journal = Journal::new();
        Self {
            broker: MemoryBroker::new(events_topic(), partitions).with_journal(journal.clone()),
            cache: MemoryCache::new().with_journal(journal.clone()),
            scheduler: MemoryTaskScheduler::new().with_journal(journal.clone()),
            journal,
        }
    }

    /// Run a fresh consumer of the group until `expected` messages were forwarded
    async fn drain(&self, batch_size: usize, expected: u64) -> Result<RunSummary, ForwarderError> {
        let stats = Arc::new(ForwarderStats::new());
        let progress = Arc::clone(&stats);

        ForwardingLoop::new(
            self.broker.consumer(GROUP),
            Arc::new(self.cache.clone()),
            Arc::new(self.scheduler.clone()),
            options(batch_size),
        )
        .with_stats(stats)
        .with_shutdown(move || progress.snapshot().messages_forwarded >= expected)
        .run()
        .await
    }
}

#[tokio::test]
async fn test_batch_is_staged_scheduled_then_committed() {
    let pipeline = Pipeline::new(1);
    pipeline.broker.produce_envelope(0, &envelope("a1", 1)).await.unwrap();
    pipeline.broker.produce_envelope(0, &envelope("a2", 1)).await.unwrap();

    let summary = pipeline.drain(100, 2).await.unwrap();

    assert_eq!(summary.messages_forwarded, 2);
    assert_eq!(summary.batches_committed, 1);
    assert_eq!(
        pipeline.journal.entries().await,
        vec![
            JournalEntry::Staged(CacheKey::new(1, "a1")),
            JournalEntry::Scheduled("a1".to_string()),
            JournalEntry::Staged(CacheKey::new(1, "a2")),
            JournalEntry::Scheduled("a2".to_string()),
            JournalEntry::Committed(vec![2]),
        ]
    );

    let tasks = pipeline.scheduler.tasks().await;
    assert_eq!(tasks[0].cache_key.as_str(), "e:a1:1");
    assert_eq!(tasks[0].start_time, 1_700_000_000.5);
    assert_eq!(
        pipeline.cache.get(&CacheKey::new(1, "a2")).await.unwrap().value,
        envelope("a2", 1).payload
    );
}

#[tokio::test]
async fn test_delivery_error_leaves_batch_for_redelivery() {
    let pipeline = Pipeline::new(1);
    for id in ["a1", "a2", "a3"] {
        pipeline.broker.produce_envelope(0, &envelope(id, 7)).await.unwrap();
    }
    pipeline.broker.inject_fault(0, 2, "Local: Broker transport failure").await;

    let err = pipeline.drain(100, 3).await.unwrap_err();
    assert!(matches!(err, ForwarderError::Delivery { partition: 0, offset: 2, .. }));
    assert!(pipeline.broker.commits().await.is_empty());
    assert_eq!(pipeline.broker.close_count(GROUP).await, 1);
    assert_eq!(pipeline.scheduler.tasks().await.len(), 2);

    // the restarted consumer sees the uncommitted records again
    let summary = pipeline.drain(100, 3).await.unwrap();
    assert_eq!(summary.messages_forwarded, 3);
    assert_eq!(pipeline.broker.committed_offsets(GROUP).await, vec![3]);
    assert_eq!(pipeline.cache.len().await, 3);

    let scheduled: Vec<String> = pipeline
        .scheduler
        .tasks()
        .await
        .into_iter()
        .map(|task| task.event_id)
        .collect();
    assert_eq!(scheduled, vec!["a1", "a2", "a1", "a2", "a3"]);
}

#[tokio::test]
async fn test_restaging_after_crash_is_idempotent() {
    let pipeline = Pipeline::new(1);
    pipeline.broker.produce_envelope(0, &envelope("a1", 3)).await.unwrap();
    pipeline.broker.produce_envelope(0, &envelope("a2", 3)).await.unwrap();
    pipeline.scheduler.fail_next(1);

    assert!(pipeline.drain(100, 2).await.is_err());
    let before = pipeline.cache.entries().await;
    assert_eq!(before.len(), 1);

    pipeline.drain(100, 2).await.unwrap();
    let after = pipeline.cache.entries().await;
    assert_eq!(after.len(), 2);
    assert_eq!(after.get(&CacheKey::new(3, "a1")), before.get(&CacheKey::new(3, "a1")));
}

#[tokio::test]
async fn test_batches_respect_commit_batch_size() {
    let pipeline = Pipeline::new(1);
    for i in 0..7 {
        pipeline
            .broker
            .produce_envelope(0, &envelope(&format!("e{}", i), 2))
            .await
            .unwrap();
    }

    let summary = pipeline.drain(3, 7).await.unwrap();

    assert_eq!(summary.batches_committed, 3);
    let commits: Vec<Vec<i64>> = pipeline
        .broker
        .commits()
        .await
        .into_iter()
        .map(|commit| commit.offsets)
        .collect();
    assert_eq!(commits, vec![vec![3], vec![6], vec![7]]);
}

#[tokio::test]
async fn test_shutdown_stops_polling_and_closes_consumer() {
    let pipeline = Pipeline::new(1);
    for i in 0..5 {
        pipeline
            .broker
            .produce_envelope(0, &envelope(&format!("e{}", i), 2))
            .await
            .unwrap();
    }

    let stats = Arc::new(ForwarderStats::new());
    let progress = Arc::clone(&stats);
    let summary = ForwardingLoop::new(
        pipeline.broker.consumer(GROUP),
        Arc::new(pipeline.cache.clone()),
        Arc::new(pipeline.scheduler.clone()),
        options(2),
    )
    .with_stats(Arc::clone(&stats))
    .with_shutdown(move || progress.snapshot().batches_committed >= 1)
    .run()
    .await
    .unwrap();

    assert_eq!(summary.batches_committed, 1);
    assert_eq!(stats.snapshot().batches_polled, 1);
    assert_eq!(stats.state(), LoopState::Stopped);
    assert_eq!(pipeline.broker.committed_offsets(GROUP).await, vec![2]);
    assert_eq!(pipeline.broker.close_count(GROUP).await, 1);
    assert_eq!(pipeline.cache.len().await, 2);
}

#[tokio::test]
async fn test_partition_order_is_preserved() {
    let pipeline = Pipeline::new(3);
    for i in 0..12 {
        let partition = i % 3;
        pipeline
            .broker
            .produce_envelope(partition, &envelope(&format!("p{}-{}", partition, i / 3), 9))
            .await
            .unwrap();
    }

    pipeline.drain(4, 12).await.unwrap();

    let scheduled: Vec<String> = pipeline
        .scheduler
        .tasks()
        .await
        .into_iter()
        .map(|task| task.event_id)
        .collect();
    for partition in 0..3 {
        let prefix = format!("p{}-", partition);
        let order: Vec<&String> = scheduled.iter().filter(|id| id.starts_with(&prefix)).collect();
        let expected: Vec<String> = (0..4).map(|i| format!("p{}-{}", partition, i)).collect();
        assert_eq!(order, expected.iter().collect::<Vec<_>>());
    }
    assert_eq!(pipeline.broker.committed_offsets(GROUP).await, vec![4, 4, 4]);
}

#[tokio::test]
async fn test_empty_topic_commits_nothing() {
    let pipeline = Pipeline::new(2);

    let stats = Arc::new(ForwarderStats::new());
    let progress = Arc::clone(&stats);
    let summary = ForwardingLoop::new(
        pipeline.broker.consumer(GROUP),
        Arc::new(pipeline.cache.clone()),
        Arc::new(pipeline.scheduler.clone()),
        options(10),
    )
    .with_stats(stats)
    .with_shutdown(move || progress.snapshot().batches_polled >= 3)
    .run()
    .await
    .unwrap();

    assert_eq!(summary, RunSummary::default());
    assert!(pipeline.journal.entries().await.is_empty());
    assert!(pipeline.broker.commits().await.is_empty());
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};

    const PARTITIONS: usize = 3;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn committed_offsets_imply_side_effects(
            placement in prop::collection::vec(0..PARTITIONS as i32, 0..24),
            batch_size in 1usize..6,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (produced, entries) = runtime.block_on(async {
                let pipeline = Pipeline::new(PARTITIONS);
                let mut produced = HashMap::new();
                for (i, partition) in placement.iter().enumerate() {
                    let id = format!("ev{}", i);
                    let offset = pipeline
                        .broker
                        .produce_envelope(*partition, &envelope(&id, 5))
                        .await
                        .unwrap();
                    produced.insert((*partition, offset), id);
                }
                pipeline.drain(batch_size, placement.len() as u64).await.unwrap();
                (produced, pipeline.journal.entries().await)
            });

            let mut staged = HashSet::new();
            let mut scheduled = HashSet::new();
            let mut since_commit = 0;
            let mut last_commit = vec![0i64; PARTITIONS];
            for entry in entries {
                match entry {
                    JournalEntry::Staged(key) => {
                        since_commit += 1;
                        staged.insert(key.parts().unwrap().0.to_string());
                    }
                    JournalEntry::Scheduled(id) => {
                        prop_assert!(staged.contains(&id));
                        scheduled.insert(id);
                    }
                    JournalEntry::Committed(offsets) => {
                        prop_assert!(since_commit <= batch_size);
                        since_commit = 0;
                        for (partition, next) in offsets.iter().enumerate() {
                            prop_assert!(*next >= last_commit[partition]);
                            for offset in 0..*next {
                                let id = &produced[&(partition as i32, offset)];
                                prop_assert!(staged.contains(id) && scheduled.contains(id));
                            }
                        }
                        last_commit = offsets;
                    }
                }
            }

            prop_assert_eq!(scheduled.len(), produced.len());
        }
    }
}
