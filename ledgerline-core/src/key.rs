//! Partition key shared by the commit log and the snapshot cache.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bucket used when a caller supplies an empty bucket id.
pub const DEFAULT_BUCKET: &str = "default";

/// Identifies one stream (one aggregate's history) inside a bucket.
///
/// Buckets are logical namespaces, typically a tenant or partition. A bucket
/// id is never empty: constructing a key with an empty bucket places the
/// stream in [`DEFAULT_BUCKET`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawStreamKey")]
pub struct StreamKey {
    bucket_id: String,
    stream_id: String,
}

/// Wire form of [`StreamKey`]; deserialized keys go through
/// [`StreamKey::new`].
#[derive(Deserialize)]
struct RawStreamKey {
    bucket_id: String,
    stream_id: String,
}

impl From<RawStreamKey> for StreamKey {
    fn from(raw: RawStreamKey) -> Self {
        Self::new(raw.bucket_id, raw.stream_id)
    }
}

impl StreamKey {
    #[must_use]
    pub fn new(bucket_id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let bucket_id = bucket_id.into();
        let bucket_id = if bucket_id.is_empty() {
            DEFAULT_BUCKET.to_string()
        } else {
            bucket_id
        };
        Self {
            bucket_id,
            stream_id: stream_id.into(),
        }
    }

    /// Key for a stream in [`DEFAULT_BUCKET`].
    #[must_use]
    pub fn in_default_bucket(stream_id: impl Into<String>) -> Self {
        Self::new(DEFAULT_BUCKET, stream_id)
    }

    #[must_use]
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket_id, self.stream_id)
    }
}
