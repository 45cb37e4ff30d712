//! Commit records and append requests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::StreamKey;

/// Caller-supplied metadata, opaque to the stores.
pub type Headers = HashMap<String, String>;

/// One successful, atomic append of one or more events to a stream.
///
/// `stream_revision` counts events, `commit_sequence` counts commits. A commit
/// carrying three events on a fresh stream has revision 3 and sequence 1.
///
/// Commits are created by the store when an append succeeds and are never
/// mutated afterwards. Readers always receive clones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit<E> {
    pub bucket_id: String,
    pub stream_id: String,
    /// Revision of the stream once this commit is applied.
    pub stream_revision: u64,
    pub commit_id: Uuid,
    /// 1-based position of this commit in its stream.
    pub commit_sequence: u64,
    pub commit_stamp: DateTime<Utc>,
    pub headers: Headers,
    pub events: NonEmpty<E>,
    /// Resume cursor; see [`CheckpointScope`](crate::store::CheckpointScope).
    pub checkpoint_token: u64,
}

impl<E> Commit<E> {
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(self.bucket_id.as_str(), self.stream_id.as_str())
    }
}

/// Everything a writer supplies for one append.
///
/// `expected_version` is the revision the caller expects the stream to have
/// *after* this commit, normally the revision it loaded plus the number of
/// new events.
#[derive(Clone, Debug)]
pub struct CommitAttempt<E> {
    pub key: StreamKey,
    pub expected_version: u64,
    pub commit_id: Uuid,
    pub headers: Headers,
    pub events: NonEmpty<E>,
}

impl<E> CommitAttempt<E> {
    /// Start an attempt with a fresh random commit id and no headers.
    #[must_use]
    pub fn new(key: StreamKey, expected_version: u64, events: NonEmpty<E>) -> Self {
        Self {
            key,
            expected_version,
            commit_id: Uuid::new_v4(),
            headers: Headers::new(),
            events,
        }
    }

    /// Attempt that lands exactly `events.len()` revisions past `loaded`.
    #[must_use]
    pub fn after(key: StreamKey, loaded: u64, events: NonEmpty<E>) -> Self {
        let expected_version = loaded + events.len() as u64;
        Self::new(key, expected_version, events)
    }

    #[must_use]
    pub fn with_commit_id(mut self, commit_id: Uuid) -> Self {
        self.commit_id = commit_id;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
