//! In-memory commit log.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation
//! of [`CommitStore`](super::CommitStore). It defines the reference semantics
//! durable stores are expected to reproduce.
//!
//! # Example
//!
//! ```
//! use ledgerline_core::store::inmemory;
//!
//! let log: inmemory::Store<String> = inmemory::Store::new();
//! ```

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};

use crate::{
    clock::{Clock, SystemClock},
    commit::{Commit, CommitAttempt},
    concurrency::ConflictError,
    key::StreamKey,
    store::{CheckpointScope, CommitError, CommitStore, Commits, RevisionRange},
};

/// Commit history of one stream, ordered by revision.
type SharedStream<E> = Arc<Mutex<Vec<Commit<E>>>>;
type StreamMap<E> = HashMap<StreamKey, SharedStream<E>>;

/// Checkpoint assignment, fixed when the store is created.
#[derive(Debug)]
struct Checkpoints {
    scope: CheckpointScope,
    next: AtomicU64,
}

/// In-memory commit log keyed by `(bucket, stream)`.
///
/// The stream map sits behind a `RwLock` and every stream has its own mutex,
/// so appends only contend with appends to the same stream. The
/// check-then-append in [`commit`](CommitStore::commit) runs entirely under
/// the stream's mutex.
///
/// Clones share the same underlying data, including the checkpoint scope and
/// counter. The clock belongs to each handle.
#[derive(Clone, Debug)]
pub struct Store<E> {
    streams: Arc<RwLock<StreamMap<E>>>,
    checkpoints: Arc<Checkpoints>,
    clock: Arc<dyn Clock>,
}

impl<E> Store<E> {
    /// Commit log stamped by the system clock, with per-stream checkpoint
    /// tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::with_checkpoint_scope(CheckpointScope::Stream)
    }

    /// Empty commit log assigning checkpoint tokens per `scope`.
    #[must_use]
    pub fn with_checkpoint_scope(scope: CheckpointScope) -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            checkpoints: Arc::new(Checkpoints {
                scope,
                next: AtomicU64::new(0),
            }),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for commit stamps.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn checkpoint_scope(&self) -> CheckpointScope {
        self.checkpoints.scope
    }

    /// Number of streams that hold at least one commit.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams
            .read()
            .expect("commit log lock poisoned")
            .len()
    }

    fn stream(&self, key: &StreamKey) -> Option<SharedStream<E>> {
        self.streams
            .read()
            .expect("commit log lock poisoned")
            .get(key)
            .cloned()
    }

    fn read(
        &self,
        key: &StreamKey,
        select: impl FnOnce(&[Commit<E>]) -> Vec<Commit<E>>,
    ) -> Commits<E> {
        let Some(stream) = self.stream(key) else {
            return Commits::empty();
        };
        let commits = stream.lock().expect("commit stream lock poisoned");
        Commits::new(select(commits.as_slice()))
    }
}

impl<E: Clone> Store<E> {
    fn append(&self, attempt: CommitAttempt<E>) -> Result<Commit<E>, ConflictError> {
        let stream = if let Some(stream) = self.stream(&attempt.key) {
            stream
        } else {
            let mut streams = self.streams.write().expect("commit log lock poisoned");
            if let Some(stream) = streams.get(&attempt.key) {
                Arc::clone(stream)
            } else {
                // Nobody can append to a stream that is not in the map yet, so
                // holding the map's write lock is enough to create it.
                let key = attempt.key.clone();
                let commit = self.seal(attempt, &[])?;
                streams.insert(key, Arc::new(Mutex::new(vec![commit.clone()])));
                return Ok(commit);
            }
        };

        let mut commits = stream.lock().expect("commit stream lock poisoned");
        let commit = self.seal(attempt, commits.as_slice())?;
        commits.push(commit.clone());
        Ok(commit)
    }

    /// Check `attempt` against the stream's current history and build the
    /// commit that would follow it.
    fn seal(
        &self,
        attempt: CommitAttempt<E>,
        existing: &[Commit<E>],
    ) -> Result<Commit<E>, ConflictError> {
        let current = existing.last().map_or(0, |commit| commit.stream_revision);
        if current >= attempt.expected_version {
            tracing::debug!(
                current,
                expected_version = attempt.expected_version,
                "stream already advanced, rejecting commit"
            );
            return Err(ConflictError::commit(
                &attempt.key,
                attempt.expected_version,
                current,
            ));
        }

        let prior_commits = existing.len() as u64;
        let checkpoint_token = match self.checkpoints.scope {
            CheckpointScope::Stream => prior_commits,
            CheckpointScope::Store => self.checkpoints.next.fetch_add(1, Ordering::SeqCst),
        };

        let CommitAttempt {
            key,
            expected_version,
            commit_id,
            headers,
            events,
        } = attempt;

        Ok(Commit {
            bucket_id: key.bucket_id().to_string(),
            stream_id: key.stream_id().to_string(),
            stream_revision: expected_version,
            commit_id,
            commit_sequence: prior_commits + 1,
            commit_stamp: self.clock.now(),
            headers,
            events,
            checkpoint_token,
        })
    }
}

impl<E> Default for Store<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Commits whose revision lies in `range`, located by binary search.
fn select_range<E: Clone>(commits: &[Commit<E>], range: RevisionRange) -> Vec<Commit<E>> {
    if range.is_empty() {
        return Vec::new();
    }
    let start = commits.partition_point(|commit| commit.stream_revision < range.min);
    let end = commits.partition_point(|commit| commit.stream_revision <= range.max);
    commits[start..end].to_vec()
}

/// Commits stamped at or before `max_time`.
///
/// Every commit is tested: stamps follow the clock, which is not guaranteed to
/// be monotonic.
fn select_until<E: Clone>(commits: &[Commit<E>], max_time: DateTime<Utc>) -> Vec<Commit<E>> {
    commits
        .iter()
        .filter(|commit| commit.commit_stamp <= max_time)
        .cloned()
        .collect()
}

impl<E> CommitStore for Store<E>
where
    E: Clone + Send + Sync + 'static,
{
    type Error = Infallible;
    type Event = E;

    #[tracing::instrument(skip(self, key), fields(stream = %key))]
    fn get<'a>(
        &'a self,
        key: &'a StreamKey,
        range: RevisionRange,
    ) -> impl Future<Output = Result<Commits<E>, Self::Error>> + Send + 'a {
        let commits = self.read(key, |commits| select_range(commits, range));
        tracing::trace!(commits_loaded = commits.len(), "loaded commits by revision");
        std::future::ready(Ok(commits))
    }

    #[tracing::instrument(skip(self, key), fields(stream = %key))]
    fn get_to<'a>(
        &'a self,
        key: &'a StreamKey,
        max_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<Commits<E>, Self::Error>> + Send + 'a {
        let commits = self.read(key, |commits| select_until(commits, max_time));
        tracing::trace!(commits_loaded = commits.len(), "loaded commits by stamp");
        std::future::ready(Ok(commits))
    }

    #[tracing::instrument(
        skip(self, attempt),
        fields(
            stream = %attempt.key,
            expected_version = attempt.expected_version,
            event_count = attempt.events.len(),
        )
    )]
    fn commit(
        &self,
        attempt: CommitAttempt<E>,
    ) -> impl Future<Output = Result<Commit<E>, CommitError<Self::Error>>> + Send + '_ {
        let result = self.append(attempt).map_err(CommitError::from);
        if let Ok(commit) = &result {
            tracing::debug!(
                stream_revision = commit.stream_revision,
                commit_sequence = commit.commit_sequence,
                "commit appended to stream"
            );
        }
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, key), fields(stream = %key))]
    fn stream_revision<'a>(
        &'a self,
        key: &'a StreamKey,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a {
        let revision = self.stream(key).map_or(0, |stream| {
            stream
                .lock()
                .expect("commit stream lock poisoned")
                .last()
                .map_or(0, |commit| commit.stream_revision)
        });
        tracing::trace!(revision, "retrieved stream revision");
        std::future::ready(Ok(revision))
    }
}
