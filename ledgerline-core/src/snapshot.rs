//! Snapshot support for faster stream rehydration.
//!
//! Snapshots persist aggregate state as of a stream revision, so readers only
//! replay the commits that came after it. This module provides:
//!
//! - [`Snapshot`] - state of one stream at a revision
//! - [`SnapshotCache`] - trait for snapshot persistence
//! - [`NoSnapshots`] - no-op cache; this is the default when
//!   [`Repository::with_snapshots`](crate::repository::Repository::with_snapshots)
//!   is not called
//! - [`SnapshotPolicy`] - when the repository offers new snapshots
//! - [`inmemory`] - in-memory reference implementation

use std::{convert::Infallible, future::Future, marker::PhantomData};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{commit::Headers, concurrency::ConflictError, key::StreamKey};

pub mod inmemory;

/// State of one stream as of `stream_revision`.
///
/// The snapshot reflects every commit up to and including that revision.
/// `payload` is opaque to the cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<P> {
    pub bucket_id: String,
    pub stream_id: String,
    pub stream_revision: u64,
    pub payload: P,
    /// Headers supplied to [`SnapshotCache::add`].
    #[serde(default)]
    pub headers: Headers,
}

impl<P> Snapshot<P> {
    #[must_use]
    pub fn new(key: &StreamKey, stream_revision: u64, payload: P) -> Self {
        Self {
            bucket_id: key.bucket_id().to_string(),
            stream_id: key.stream_id().to_string(),
            stream_revision,
            payload,
            headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.bucket_id.as_str(), self.stream_id.as_str())
    }
}

/// Error from [`SnapshotCache::add`].
#[derive(Debug, Error)]
pub enum AddSnapshotError<StoreError>
where
    StoreError: std::error::Error,
{
    /// A snapshot at the same or a later revision is already stored.
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    /// Snapshot persistence failed.
    #[error("snapshot store error: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError: std::error::Error> AddSnapshotError<StoreError> {
    #[must_use]
    pub const fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            Self::Store(_) => None,
        }
    }
}

impl AddSnapshotError<Infallible> {
    /// Unwrap the conflict of a cache that cannot fail otherwise.
    #[must_use]
    pub fn into_conflict(self) -> ConflictError {
        match self {
            Self::Conflict(conflict) => conflict,
            Self::Store(never) => match never {},
        }
    }
}

/// Persistence contract for per-stream snapshots.
///
/// Snapshot revisions only move forward: adding a snapshot whose revision is
/// not strictly greater than the latest stored one is a conflict and leaves
/// the cache unchanged.
// ANCHOR: snapshot_cache_trait
pub trait SnapshotCache: Send + Sync {
    /// Snapshot payload type, opaque to the cache.
    type Payload: Clone + Send + Sync + 'static;

    /// Error type for snapshot operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the snapshot with the highest revision not above `max_revision`.
    ///
    /// Returns `Ok(None)` if the stream has no qualifying snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn get<'a>(
        &'a self,
        key: &'a StreamKey,
        max_revision: u64,
    ) -> impl Future<Output = Result<Option<Snapshot<Self::Payload>>, Self::Error>> + Send + 'a;

    /// Store `snapshot` with `headers` attached.
    ///
    /// # Errors
    ///
    /// Returns [`AddSnapshotError::Conflict`] if the stream already has a
    /// snapshot at or beyond `snapshot.stream_revision`, or
    /// [`AddSnapshotError::Store`] if persistence fails.
    fn add(
        &self,
        snapshot: Snapshot<Self::Payload>,
        headers: Headers,
    ) -> impl Future<Output = Result<(), AddSnapshotError<Self::Error>>> + Send + '_;
}
// ANCHOR_END: snapshot_cache_trait

/// Snapshot policy used by the repository to decide when to offer snapshots.
///
/// - [`SnapshotPolicy::Always`]: snapshot after every commit (high storage
///   cost, minimal replay)
/// - [`SnapshotPolicy::EveryNEvents`]: snapshot once N events have been
///   committed since the last snapshot
/// - [`SnapshotPolicy::Never`]: only read snapshots created elsewhere
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Create a snapshot after every commit.
    Always,
    /// Create a snapshot every N events.
    EveryNEvents(u64),
    /// Never create snapshots (load-only mode).
    Never,
}

impl SnapshotPolicy {
    /// Check if a snapshot should be created based on events since the last
    /// snapshot.
    #[must_use]
    pub const fn should_snapshot(&self, events_since: u64) -> bool {
        match self {
            Self::Always => true,
            Self::EveryNEvents(threshold) => events_since >= *threshold,
            Self::Never => false,
        }
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::EveryNEvents(100)
    }
}

/// No-op snapshot cache.
///
/// This implementation:
/// - Always returns `None` from `get()`
/// - Silently discards every added snapshot
///
/// Generic over `P` to match the repository's aggregate type.
#[derive(Debug)]
pub struct NoSnapshots<P>(PhantomData<fn() -> P>);

impl<P> NoSnapshots<P> {
    /// Create a new no-op snapshot cache.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<P> Clone for NoSnapshots<P> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<P> Default for NoSnapshots<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> SnapshotCache for NoSnapshots<P>
where
    P: Clone + Send + Sync + 'static,
{
    type Error = Infallible;
    type Payload = P;

    fn get<'a>(
        &'a self,
        _key: &'a StreamKey,
        _max_revision: u64,
    ) -> impl Future<Output = Result<Option<Snapshot<P>>, Self::Error>> + Send + 'a {
        std::future::ready(Ok(None))
    }

    fn add(
        &self,
        _snapshot: Snapshot<P>,
        _headers: Headers,
    ) -> impl Future<Output = Result<(), AddSnapshotError<Self::Error>>> + Send + '_ {
        std::future::ready(Ok(()))
    }
}
