//! Commit log abstraction.
//!
//! This module describes the storage contract for per-stream commit histories
//! ([`CommitStore`]), the revision filter used by range reads
//! ([`RevisionRange`]), the read result ([`Commits`]) and a reference
//! in-memory implementation.
use std::{
    convert::Infallible,
    future::Future,
    ops::{Bound, RangeBounds},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    commit::{Commit, CommitAttempt},
    concurrency::ConflictError,
    key::StreamKey,
};

pub mod inmemory;

/// Largest revision a range can name; used as the unbounded upper end.
pub const MAX_REVISION: u64 = u64::MAX;

/// Inclusive revision window for [`CommitStore::get`].
///
/// `min > max` is allowed and selects nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevisionRange {
    pub min: u64,
    pub max: u64,
}

impl RevisionRange {
    /// Every revision of the stream.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            min: 0,
            max: MAX_REVISION,
        }
    }

    #[must_use]
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Revisions from `min` onwards.
    #[must_use]
    pub const fn starting_at(min: u64) -> Self {
        Self {
            min,
            max: MAX_REVISION,
        }
    }

    /// Revisions up to and including `max`.
    #[must_use]
    pub const fn up_to(max: u64) -> Self {
        Self { min: 0, max }
    }

    /// Normalize any standard range (`..`, `2..=2`, `3..7`) to an inclusive
    /// window.
    ///
    /// Excluded bounds are shifted inwards. An excluded upper bound of zero
    /// produces an empty window.
    pub fn from_bounds(bounds: impl RangeBounds<u64>) -> Self {
        let min = match bounds.start_bound() {
            Bound::Included(&min) => min,
            Bound::Excluded(&min) => min.saturating_add(1),
            Bound::Unbounded => 0,
        };
        match bounds.end_bound() {
            Bound::Included(&max) => Self { min, max },
            Bound::Excluded(&0) => Self { min: 1, max: 0 },
            Bound::Excluded(&end) => Self { min, max: end - 1 },
            Bound::Unbounded => Self {
                min,
                max: MAX_REVISION,
            },
        }
    }

    #[must_use]
    pub const fn contains(&self, revision: u64) -> bool {
        self.min <= revision && revision <= self.max
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

impl Default for RevisionRange {
    fn default() -> Self {
        Self::all()
    }
}

/// Commits read from a stream, captured when the read ran.
///
/// The sequence is finite and restartable: [`iter`](Self::iter) can be called
/// any number of times and always yields the same commits in ascending
/// revision order. No store lock is held while iterating.
#[derive(Debug)]
pub struct Commits<E> {
    commits: Arc<[Commit<E>]>,
}

impl<E> Commits<E> {
    /// Wrap commits that are already in ascending revision order.
    #[must_use]
    pub fn new(commits: Vec<Commit<E>>) -> Self {
        Self {
            commits: commits.into(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Commit<E>> {
        self.commits.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Commit<E>> {
        self.commits.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Commit<E>> {
        self.commits.last()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Commit<E>] {
        &self.commits
    }

    /// Events of every commit, in stream order.
    pub fn events(&self) -> impl Iterator<Item = &E> {
        self.commits.iter().flat_map(|commit| commit.events.iter())
    }
}

impl<E: Clone> Commits<E> {
    #[must_use]
    pub fn to_vec(&self) -> Vec<Commit<E>> {
        self.commits.to_vec()
    }
}

impl<E> Clone for Commits<E> {
    fn clone(&self) -> Self {
        Self {
            commits: Arc::clone(&self.commits),
        }
    }
}

impl<E> Default for Commits<E> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, E> IntoIterator for &'a Commits<E> {
    type IntoIter = std::slice::Iter<'a, Commit<E>>;
    type Item = &'a Commit<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// How [`Commit::checkpoint_token`] values are assigned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckpointScope {
    /// Number of commits already in the stream. Not comparable across
    /// streams.
    #[default]
    Stream,
    /// A store-wide counter that strictly increases with every successful
    /// commit, usable as a resume cursor for global scans.
    Store,
}

/// Error from [`CommitStore::commit`].
#[derive(Debug, Error)]
pub enum CommitError<StoreError>
where
    StoreError: std::error::Error,
{
    /// Another writer already advanced the stream.
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError: std::error::Error> CommitError<StoreError> {
    /// Create a store error variant.
    pub const fn store(err: StoreError) -> Self {
        Self::Store(err)
    }

    #[must_use]
    pub const fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            Self::Store(_) => None,
        }
    }
}

impl CommitError<Infallible> {
    /// Unwrap the conflict of a store that cannot fail otherwise.
    #[must_use]
    pub fn into_conflict(self) -> ConflictError {
        match self {
            Self::Conflict(conflict) => conflict,
            Self::Store(never) => match never {},
        }
    }
}

/// Persistence contract for per-stream commit histories.
///
/// Implementations must preserve the in-memory reference semantics:
///
/// - per stream, stored revisions strictly increase;
/// - [`commit`](Self::commit) is rejected with a [`ConflictError`] when the
///   stream's highest revision is already at or past the expected version,
///   and a rejected commit leaves the stream unchanged;
/// - the check and the append happen atomically per stream;
/// - reading an unknown stream yields an empty result, never an error.
// ANCHOR: commit_store_trait
pub trait CommitStore: Send + Sync {
    /// Event payload type, opaque to the store.
    type Event: Clone + Send + Sync + 'static;

    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the commits whose revision falls within `range`, in ascending
    /// revision order.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the read fails.
    fn get<'a>(
        &'a self,
        key: &'a StreamKey,
        range: RevisionRange,
    ) -> impl Future<Output = Result<Commits<Self::Event>, Self::Error>> + Send + 'a;

    /// Load the commits stamped at or before `max_time`, in ascending revision
    /// order.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the read fails.
    fn get_to<'a>(
        &'a self,
        key: &'a StreamKey,
        max_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<Commits<Self::Event>, Self::Error>> + Send + 'a;

    /// Append a commit if the stream has not yet reached
    /// `attempt.expected_version`.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] if the stream is already at or past
    /// the expected version, or [`CommitError::Store`] if persistence fails.
    fn commit(
        &self,
        attempt: CommitAttempt<Self::Event>,
    ) -> impl Future<Output = Result<Commit<Self::Event>, CommitError<Self::Error>>> + Send + '_;

    /// Highest stored revision of a stream, `0` when it has no commits.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the read fails.
    fn stream_revision<'a>(
        &'a self,
        key: &'a StreamKey,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}
// ANCHOR_END: commit_store_trait
