//! Integration tests for repository command execution.

#![cfg(feature = "test-util")]

use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use chrono::{DateTime, Utc};
use ledgerline::{
    Aggregate, Commit, CommitAttempt, Handle, Headers, Repository, StreamKey,
    repository::CommandError,
    snapshot::{SnapshotCache, SnapshotPolicy, inmemory as snapshots},
    store::{CommitError, CommitStore, Commits, MAX_REVISION, RevisionRange, inmemory},
    test::CommitStoreTestExt,
};
use nonempty::NonEmpty;
use thiserror::Error;

// ============================================================================
// Test Domain: Inventory
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
enum InventoryEvent {
    Received(u32),
    Reserved(u32),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Inventory {
    on_hand: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum InventoryError {
    #[error("only {available} units on hand")]
    Insufficient { available: u32 },
}

struct Receive(u32);

struct Reserve(u32);

impl Aggregate for Inventory {
    type Error = InventoryError;
    type Event = InventoryEvent;

    fn apply(&mut self, event: &InventoryEvent) {
        match event {
            InventoryEvent::Received(n) => self.on_hand += n,
            InventoryEvent::Reserved(n) => self.on_hand -= n,
        }
    }
}

impl Handle<Receive> for Inventory {
    fn handle(&self, command: &Receive) -> Result<Vec<InventoryEvent>, InventoryError> {
        Ok(vec![InventoryEvent::Received(command.0)])
    }
}

impl Handle<Reserve> for Inventory {
    fn handle(&self, command: &Reserve) -> Result<Vec<InventoryEvent>, InventoryError> {
        if command.0 > self.on_hand {
            return Err(InventoryError::Insufficient {
                available: self.on_hand,
            });
        }
        Ok(vec![InventoryEvent::Reserved(command.0)])
    }
}

fn sku() -> StreamKey {
    StreamKey::new("warehouse", "sku-42")
}

// ============================================================================
// Commit log that loses races on purpose
// ============================================================================

/// Wraps the in-memory log and lets a competing writer in ahead of the next
/// `interferences` commits.
#[derive(Debug)]
struct ContendedLog {
    inner: inmemory::Store<InventoryEvent>,
    interferences: AtomicUsize,
}

impl ContendedLog {
    fn new(interferences: usize) -> Self {
        Self {
            inner: inmemory::Store::new(),
            interferences: AtomicUsize::new(interferences),
        }
    }
}

impl CommitStore for ContendedLog {
    type Error = Infallible;
    type Event = InventoryEvent;

    fn get<'a>(
        &'a self,
        key: &'a StreamKey,
        range: RevisionRange,
    ) -> impl Future<Output = Result<Commits<InventoryEvent>, Infallible>> + Send + 'a {
        self.inner.get(key, range)
    }

    fn get_to<'a>(
        &'a self,
        key: &'a StreamKey,
        max_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<Commits<InventoryEvent>, Infallible>> + Send + 'a {
        self.inner.get_to(key, max_time)
    }

    fn commit(
        &self,
        attempt: CommitAttempt<InventoryEvent>,
    ) -> impl Future<Output = Result<Commit<InventoryEvent>, CommitError<Infallible>>> + Send + '_
    {
        async move {
            let interfere = self
                .interferences
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if interfere {
                let key = attempt.key.clone();
                self.inner
                    .inject_concurrent_commit(&key, NonEmpty::new(InventoryEvent::Received(1)))
                    .await?;
            }
            self.inner.commit(attempt).await
        }
    }

    fn stream_revision<'a>(
        &'a self,
        key: &'a StreamKey,
    ) -> impl Future<Output = Result<u64, Infallible>> + Send + 'a {
        self.inner.stream_revision(key)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn commands_build_on_previous_state() {
    let repository = Repository::<Inventory, _>::new(inmemory::Store::new());

    repository
        .execute(&sku(), &Receive(10), &Headers::new())
        .await
        .unwrap();
    repository
        .execute(&sku(), &Reserve(4), &Headers::new())
        .await
        .unwrap();

    let err = repository
        .execute(&sku(), &Reserve(7), &Headers::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Aggregate(InventoryError::Insufficient { available: 6 })
    ));

    let loaded = repository.load(&sku()).await.unwrap();
    assert_eq!(loaded.aggregate.on_hand, 6);
    assert_eq!(loaded.revision, 2);
}

#[tokio::test]
async fn lost_race_surfaces_as_conflict() {
    let repository = Repository::<Inventory, _>::new(ContendedLog::new(1));

    let err = repository
        .execute(&sku(), &Receive(5), &Headers::new())
        .await
        .unwrap_err();

    let CommandError::Conflict(conflict) = err else {
        panic!("expected conflict, got {err:?}");
    };
    assert_eq!(conflict.stream_key(), sku());
    assert!(conflict.to_string().contains("reload and retry"));
    assert_eq!(repository.load(&sku()).await.unwrap().aggregate.on_hand, 1);
}

#[tokio::test]
async fn retry_reloads_until_commit_lands() {
    let repository = Repository::<Inventory, _>::new(ContendedLog::new(2));

    let attempts = repository
        .execute_with_retry(&sku(), &Receive(5), &Headers::new(), 3)
        .await
        .unwrap();

    assert_eq!(attempts, 3);
    let loaded = repository.load(&sku()).await.unwrap();
    assert_eq!(loaded.aggregate.on_hand, 7);
    assert_eq!(loaded.revision, 3);
}

#[tokio::test]
async fn retry_gives_up_after_max_retries() {
    let repository = Repository::<Inventory, _>::new(ContendedLog::new(5));

    let result = repository
        .execute_with_retry(&sku(), &Receive(5), &Headers::new(), 2)
        .await;

    assert!(matches!(result, Err(CommandError::Conflict(_))));
    assert_eq!(
        repository.commits().stream_revision(&sku()).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn snapshots_shorten_replay() {
    let repository = Repository::<Inventory, _>::new(inmemory::Store::new())
        .with_snapshots(snapshots::Store::new(), SnapshotPolicy::EveryNEvents(3));

    for _ in 0..7 {
        repository
            .execute(&sku(), &Receive(1), &Headers::new())
            .await
            .unwrap();
    }

    let snapshot = repository
        .snapshots()
        .get(&sku(), MAX_REVISION)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.stream_revision, 6);
    assert_eq!(snapshot.payload.on_hand, 6);
    assert_eq!(repository.snapshots().snapshot_count(&sku()), 2);

    let loaded = repository.load(&sku()).await.unwrap();
    assert_eq!(loaded.aggregate.on_hand, 7);
    assert_eq!(loaded.revision, 7);
    assert_eq!(loaded.events_since_snapshot, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retrying_commands_all_apply() {
    const WRITERS: u32 = 8;

    let log = inmemory::Store::new();
    let repository = Arc::new(Repository::<Inventory, _>::new(log.clone()));
    let barrier = Arc::new(tokio::sync::Barrier::new(WRITERS as usize));

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let repository = Arc::clone(&repository);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                repository
                    .execute_with_retry(&sku(), &Receive(1), &Headers::new(), WRITERS as usize)
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let commits = log.get(&sku(), RevisionRange::all()).await.unwrap();
    let revisions: Vec<u64> = commits.iter().map(|commit| commit.stream_revision).collect();
    assert_eq!(revisions, (1..=u64::from(WRITERS)).collect::<Vec<_>>());
    assert_eq!(
        repository.load(&sku()).await.unwrap().aggregate.on_hand,
        WRITERS
    );
}
