//! Optimistic concurrency conflicts.
//!
//! Both stores detect stale writers and report them with [`ConflictError`].
//! Neither store resolves or retries a conflict: the caller reloads the
//! stream and repeats its whole read-mutate-append cycle.

use thiserror::Error;

use crate::key::StreamKey;

/// The caller's view of a stream was stale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// A commit expected to land on `expected`, but the stream already
    /// reached `actual`.
    #[error(
        "concurrency conflict on {bucket_id}/{stream_id}: expected to commit revision \
         {expected}, stream is already at {actual} (hint: stream was modified; reload and retry)"
    )]
    Commit {
        bucket_id: String,
        stream_id: String,
        expected: u64,
        actual: u64,
    },
    /// A snapshot at `attempted` is not newer than the stored `latest`.
    #[error(
        "snapshot conflict on {bucket_id}/{stream_id}: snapshot at revision {attempted} does \
         not advance past stored revision {latest} (hint: a newer snapshot exists; reload and \
         retry)"
    )]
    Snapshot {
        bucket_id: String,
        stream_id: String,
        attempted: u64,
        latest: u64,
    },
}

impl ConflictError {
    pub(crate) fn commit(key: &StreamKey, expected: u64, actual: u64) -> Self {
        Self::Commit {
            bucket_id: key.bucket_id().to_string(),
            stream_id: key.stream_id().to_string(),
            expected,
            actual,
        }
    }

    pub(crate) fn snapshot(key: &StreamKey, attempted: u64, latest: u64) -> Self {
        Self::Snapshot {
            bucket_id: key.bucket_id().to_string(),
            stream_id: key.stream_id().to_string(),
            attempted,
            latest,
        }
    }

    /// Stream the conflict was detected on.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        match self {
            Self::Commit {
                bucket_id,
                stream_id,
                ..
            }
            | Self::Snapshot {
                bucket_id,
                stream_id,
                ..
            } => StreamKey::new(bucket_id.as_str(), stream_id.as_str()),
        }
    }
}
