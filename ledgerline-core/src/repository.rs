//! Aggregate persistence on top of a commit log and a snapshot cache.
//!
//! `Repository` rebuilds an aggregate from its latest snapshot plus the commits
//! after it, runs a command, and commits the resulting events with the
//! revision it loaded as the expected version. Another writer committing in
//! between surfaces as [`CommandError::Conflict`].
//!
//! Snapshots are opt-in via [`Repository::with_snapshots`]. Without them the
//! repository replays the full stream on every load.

use std::marker::PhantomData;

use nonempty::NonEmpty;
use thiserror::Error;

use crate::{
    aggregate::{Aggregate, Handle},
    commit::{Commit, CommitAttempt, Headers},
    concurrency::ConflictError,
    key::StreamKey,
    snapshot::{AddSnapshotError, NoSnapshots, Snapshot, SnapshotCache, SnapshotPolicy},
    store::{CommitError, CommitStore, MAX_REVISION, RevisionRange},
};

/// Error type for command execution.
#[derive(Debug, Error)]
pub enum CommandError<AggregateError, StoreError, SnapshotError>
where
    StoreError: std::error::Error + 'static,
    SnapshotError: std::error::Error + 'static,
{
    #[error("aggregate rejected command: {0}")]
    Aggregate(AggregateError),
    #[error(transparent)]
    Conflict(ConflictError),
    #[error("failed to rebuild aggregate state: {0}")]
    Load(#[source] StoreError),
    #[error("failed to persist commit: {0}")]
    Store(#[source] StoreError),
    #[error("snapshot operation failed: {0}")]
    Snapshot(#[source] SnapshotError),
}

/// Result type alias for [`Repository::execute`].
pub type CommandResult<T, A, L, S> = Result<
    T,
    CommandError<<A as Aggregate>::Error, <L as CommitStore>::Error, <S as SnapshotCache>::Error>,
>;

/// Aggregate state together with the stream position it reflects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Loaded<A> {
    pub aggregate: A,
    /// Revision of the last event folded into `aggregate`; 0 for a new stream.
    pub revision: u64,
    /// Events replayed on top of the snapshot (or from the start).
    pub events_since_snapshot: u64,
}

/// Command execution and aggregate loading for one aggregate type.
///
/// `L` is the commit log and `S` the snapshot cache, which defaults to
/// [`NoSnapshots`].
///
/// # Example
///
/// ```ignore
/// let repository = Repository::<Account, _>::new(inmemory::Store::new())
///     .with_snapshots(snapshot::inmemory::Store::new(), SnapshotPolicy::EveryNEvents(50));
///
/// repository.execute(&key, &Deposit { amount: 10 }, &Headers::new()).await?;
/// ```
pub struct Repository<A, L, S = NoSnapshots<A>> {
    commits: L,
    snapshots: S,
    policy: SnapshotPolicy,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, L: std::fmt::Debug, S: std::fmt::Debug> std::fmt::Debug for Repository<A, L, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("commits", &self.commits)
            .field("snapshots", &self.snapshots)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<A, L> Repository<A, L, NoSnapshots<A>> {
    #[must_use]
    pub const fn new(commits: L) -> Self {
        Self {
            commits,
            snapshots: NoSnapshots::new(),
            policy: SnapshotPolicy::Never,
            _aggregate: PhantomData,
        }
    }
}

impl<A, L, S> Repository<A, L, S> {
    /// Enable snapshot support.
    ///
    /// Loads start from the latest snapshot in `snapshots`. After each commit
    /// the repository stores a new snapshot once `policy` says so.
    #[must_use]
    pub fn with_snapshots<SS>(self, snapshots: SS, policy: SnapshotPolicy) -> Repository<A, L, SS> {
        Repository {
            commits: self.commits,
            snapshots,
            policy,
            _aggregate: PhantomData,
        }
    }

    #[must_use]
    pub const fn commits(&self) -> &L {
        &self.commits
    }

    #[must_use]
    pub const fn snapshots(&self) -> &S {
        &self.snapshots
    }

    #[must_use]
    pub const fn snapshot_policy(&self) -> SnapshotPolicy {
        self.policy
    }
}

impl<A, L, S> Repository<A, L, S>
where
    A: Aggregate,
    L: CommitStore<Event = A::Event>,
    S: SnapshotCache<Payload = A>,
{
    /// Rebuild the aggregate stored under `key`.
    ///
    /// A snapshot that fails to load is logged and the stream is replayed from
    /// the beginning instead.
    ///
    /// # Errors
    ///
    /// Returns the commit log's error if reading commits fails.
    #[tracing::instrument(skip(self, key), fields(stream = %key))]
    pub async fn load(&self, key: &StreamKey) -> Result<Loaded<A>, L::Error> {
        let snapshot = self
            .snapshots
            .get(key, MAX_REVISION)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    error = %e,
                    "failed to load snapshot, falling back to full replay"
                );
            })
            .ok()
            .flatten();

        let (mut aggregate, base) = snapshot.map_or_else(
            || (A::default(), 0),
            |snapshot| (snapshot.payload, snapshot.stream_revision),
        );

        let commits = self
            .commits
            .get(key, RevisionRange::starting_at(base.saturating_add(1)))
            .await?;

        let mut revision = base;
        let mut events_since_snapshot = 0;
        for commit in &commits {
            for event in commit.events.iter() {
                aggregate.apply(event);
                events_since_snapshot += 1;
            }
            revision = commit.stream_revision;
        }

        tracing::debug!(
            snapshot_revision = base,
            revision,
            events_since_snapshot,
            "aggregate loaded"
        );
        Ok(Loaded {
            aggregate,
            revision,
            events_since_snapshot,
        })
    }

    /// Execute a command against the aggregate stored under `key`.
    ///
    /// Returns the new commit, or `None` if the command produced no events.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Conflict`] if the stream moved on between
    /// loading and committing. Other variants cover aggregate validation,
    /// loading, persistence, and snapshot storage failures.
    #[tracing::instrument(skip(self, key, command, headers), fields(stream = %key))]
    pub async fn execute<C>(
        &self,
        key: &StreamKey,
        command: &C,
        headers: &Headers,
    ) -> CommandResult<Option<Commit<A::Event>>, A, L, S>
    where
        A: Handle<C>,
        C: Sync,
    {
        let Loaded {
            aggregate,
            revision,
            events_since_snapshot,
        } = self.load(key).await.map_err(CommandError::Load)?;

        let events = Handle::<C>::handle(&aggregate, command).map_err(CommandError::Aggregate)?;
        let Some(events) = NonEmpty::from_vec(events) else {
            tracing::trace!("command produced no events");
            return Ok(None);
        };

        let attempt = CommitAttempt::after(key.clone(), revision, events).with_headers(headers.clone());
        let commit = match self.commits.commit(attempt).await {
            Ok(commit) => commit,
            Err(CommitError::Conflict(conflict)) => return Err(CommandError::Conflict(conflict)),
            Err(CommitError::Store(e)) => return Err(CommandError::Store(e)),
        };

        self.offer_snapshot(aggregate, &commit, events_since_snapshot)
            .await
            .map_err(CommandError::Snapshot)?;

        Ok(Some(commit))
    }

    /// Execute a command, reloading and retrying on concurrency conflicts.
    ///
    /// Returns the number of attempts it took.
    ///
    /// # Errors
    ///
    /// Returns the last error if all retries are exhausted, or a
    /// non-conflict error immediately.
    pub async fn execute_with_retry<C>(
        &self,
        key: &StreamKey,
        command: &C,
        headers: &Headers,
        max_retries: usize,
    ) -> CommandResult<usize, A, L, S>
    where
        A: Handle<C>,
        C: Sync,
    {
        for attempt in 1..=max_retries {
            match self.execute(key, command, headers).await {
                Ok(_) => return Ok(attempt),
                Err(CommandError::Conflict(conflict)) => {
                    tracing::debug!(attempt, %conflict, "retrying after conflict");
                }
                Err(e) => return Err(e),
            }
        }

        self.execute(key, command, headers)
            .await
            .map(|_| max_retries + 1)
    }

    /// Store a snapshot of the post-commit state if the policy asks for one.
    ///
    /// Losing the race to another snapshot writer is not an error.
    async fn offer_snapshot(
        &self,
        mut aggregate: A,
        commit: &Commit<A::Event>,
        events_since_snapshot: u64,
    ) -> Result<(), S::Error> {
        let pending = events_since_snapshot + commit.events.len() as u64;
        if !self.policy.should_snapshot(pending) {
            return Ok(());
        }

        for event in commit.events.iter() {
            aggregate.apply(event);
        }
        let snapshot = Snapshot::new(&commit.stream_key(), commit.stream_revision, aggregate);

        match self.snapshots.add(snapshot, Headers::new()).await {
            Ok(()) => {
                tracing::debug!(revision = commit.stream_revision, "snapshot stored");
                Ok(())
            }
            Err(AddSnapshotError::Conflict(conflict)) => {
                tracing::debug!(%conflict, "snapshot already superseded");
                Ok(())
            }
            Err(AddSnapshotError::Store(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{convert::Infallible, io};

    use super::*;
    use crate::{snapshot::inmemory as snapshot_inmemory, store::inmemory, test::CommitStoreTestExt};

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    struct Counter {
        value: i64,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum CounterEvent {
        Added(i64),
    }

    #[derive(Debug, PartialEq, Eq, Error)]
    enum CounterError {
        #[error("amount must be positive")]
        NotPositive,
    }

    struct Add(i64);

    struct Noop;

    impl Aggregate for Counter {
        type Error = CounterError;
        type Event = CounterEvent;

        fn apply(&mut self, event: &CounterEvent) {
            match event {
                CounterEvent::Added(amount) => self.value += amount,
            }
        }
    }

    impl Handle<Add> for Counter {
        fn handle(&self, command: &Add) -> Result<Vec<CounterEvent>, CounterError> {
            if command.0 <= 0 {
                return Err(CounterError::NotPositive);
            }
            Ok(vec![CounterEvent::Added(command.0)])
        }
    }

    impl Handle<Noop> for Counter {
        fn handle(&self, _command: &Noop) -> Result<Vec<CounterEvent>, CounterError> {
            Ok(Vec::new())
        }
    }

    fn key() -> StreamKey {
        StreamKey::new("counters", "c-1")
    }

    #[tokio::test]
    async fn load_of_new_stream_is_default() {
        let repository = Repository::<Counter, _>::new(inmemory::Store::new());
        let loaded = repository.load(&key()).await.unwrap();
        assert_eq!(loaded.aggregate, Counter::default());
        assert_eq!(loaded.revision, 0);
        assert_eq!(loaded.events_since_snapshot, 0);
    }

    #[tokio::test]
    async fn execute_commits_and_load_replays() {
        let repository = Repository::<Counter, _>::new(inmemory::Store::new());
        let headers = Headers::from([("user".to_string(), "ada".to_string())]);

        let first = repository
            .execute(&key(), &Add(2), &headers)
            .await
            .unwrap()
            .unwrap();
        repository
            .execute(&key(), &Add(3), &Headers::new())
            .await
            .unwrap();

        assert_eq!(first.stream_revision, 1);
        assert_eq!(first.headers, headers);
        let loaded = repository.load(&key()).await.unwrap();
        assert_eq!(loaded.aggregate.value, 5);
        assert_eq!(loaded.revision, 2);
    }

    #[tokio::test]
    async fn rejected_command_commits_nothing() {
        let repository = Repository::<Counter, _>::new(inmemory::Store::new());
        let err = repository
            .execute(&key(), &Add(0), &Headers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Aggregate(CounterError::NotPositive)));
        assert_eq!(repository.commits().stream_count(), 0);
    }

    #[tokio::test]
    async fn command_without_events_is_noop() {
        let repository = Repository::<Counter, _>::new(inmemory::Store::new());
        let result = repository
            .execute(&key(), &Noop, &Headers::new())
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(repository.commits().stream_revision(&key()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshot_taken_per_policy_and_used_on_load() {
        let repository = Repository::<Counter, _>::new(inmemory::Store::new())
            .with_snapshots(snapshot_inmemory::Store::new(), SnapshotPolicy::EveryNEvents(2));

        repository.execute(&key(), &Add(1), &Headers::new()).await.unwrap();
        assert_eq!(repository.snapshots().snapshot_count(&key()), 0);

        repository.execute(&key(), &Add(2), &Headers::new()).await.unwrap();
        let snapshot = repository
            .snapshots()
            .get(&key(), MAX_REVISION)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.stream_revision, 2);
        assert_eq!(snapshot.payload.value, 3);

        repository.execute(&key(), &Add(4), &Headers::new()).await.unwrap();
        let loaded = repository.load(&key()).await.unwrap();
        assert_eq!(loaded.aggregate.value, 7);
        assert_eq!(loaded.revision, 3);
        assert_eq!(loaded.events_since_snapshot, 1);
    }

    /// Snapshot cache where another writer always stores a newer snapshot
    /// just before ours arrives.
    #[derive(Debug, Default)]
    struct OvertakenSnapshots {
        inner: snapshot_inmemory::Store<Counter>,
    }

    impl SnapshotCache for OvertakenSnapshots {
        type Error = Infallible;
        type Payload = Counter;

        fn get<'a>(
            &'a self,
            key: &'a StreamKey,
            max_revision: u64,
        ) -> impl Future<Output = Result<Option<Snapshot<Counter>>, Infallible>> + Send + 'a {
            self.inner.get(key, max_revision)
        }

        fn add(
            &self,
            snapshot: Snapshot<Counter>,
            headers: Headers,
        ) -> impl Future<Output = Result<(), AddSnapshotError<Infallible>>> + Send + '_ {
            async move {
                let newer = Snapshot::new(
                    &snapshot.stream_key(),
                    snapshot.stream_revision + 5,
                    Counter { value: 100 },
                );
                self.inner.add(newer, Headers::new()).await?;
                self.inner.add(snapshot, headers).await
            }
        }
    }

    #[tokio::test]
    async fn superseded_snapshot_is_not_an_error() {
        let repository = Repository::<Counter, _>::new(inmemory::Store::new())
            .with_snapshots(OvertakenSnapshots::default(), SnapshotPolicy::Always);

        let commit = repository
            .execute(&key(), &Add(1), &Headers::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(commit.stream_revision, 1);

        let stored = repository
            .snapshots()
            .inner
            .get(&key(), MAX_REVISION)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.stream_revision, 6);
        assert_eq!(stored.payload, Counter { value: 100 });
        assert_eq!(repository.snapshots().inner.snapshot_count(&key()), 1);
    }

    #[tokio::test]
    async fn conflict_surfaces_when_stream_moves_underneath() {
        let log = inmemory::Store::new();
        let repository = Repository::<Counter, _>::new(log.clone());
        repository.execute(&key(), &Add(1), &Headers::new()).await.unwrap();

        let loaded = repository.load(&key()).await.unwrap();
        log.inject_concurrent_commit(&key(), NonEmpty::new(CounterEvent::Added(5)))
            .await
            .unwrap();

        let attempt = CommitAttempt::after(key(), loaded.revision, NonEmpty::new(CounterEvent::Added(1)));
        let conflict = log.commit(attempt).await.unwrap_err().into_conflict();
        assert_eq!(conflict, ConflictError::commit(&key(), 2, 2));

        // A fresh execute reloads and succeeds.
        repository.execute(&key(), &Add(1), &Headers::new()).await.unwrap();
        assert_eq!(repository.load(&key()).await.unwrap().aggregate.value, 7);
    }

    #[tokio::test]
    async fn retry_succeeds_first_time_without_contention() {
        let repository = Repository::<Counter, _>::new(inmemory::Store::new());
        let attempts = repository
            .execute_with_retry(&key(), &Add(1), &Headers::new(), 3)
            .await
            .unwrap();
        assert_eq!(attempts, 1);
    }

    #[test]
    fn command_error_messages() {
        type E = CommandError<CounterError, io::Error, Infallible>;

        let err: E = CommandError::Aggregate(CounterError::NotPositive);
        assert_eq!(err.to_string(), "aggregate rejected command: amount must be positive");

        let err: E = CommandError::Store(io::Error::other("disk full"));
        assert!(err.to_string().contains("failed to persist commit"));

        let err: E = CommandError::Conflict(ConflictError::commit(&key(), 1, 3));
        assert!(err.to_string().contains("reload and retry"));
    }
}
