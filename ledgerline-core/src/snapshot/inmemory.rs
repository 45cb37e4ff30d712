//! In-memory snapshot cache implementation.

use std::{
    collections::{BTreeMap, HashMap},
    convert::Infallible,
    sync::{Arc, RwLock},
};

use crate::{
    commit::Headers,
    concurrency::ConflictError,
    key::StreamKey,
    snapshot::{AddSnapshotError, Snapshot, SnapshotCache},
};

/// Snapshots of one stream, ordered by revision.
type StreamSnapshots<P> = BTreeMap<u64, Snapshot<P>>;
type SharedSnapshots<P> = Arc<RwLock<HashMap<StreamKey, StreamSnapshots<P>>>>;

/// In-memory snapshot cache keyed by `(bucket, stream)`.
///
/// This is the reference implementation. Every stream keeps its snapshots in
/// an ordered map so "highest revision not above N" is a range lookup rather
/// than a scan. A single lock guards the whole cache; snapshot writes are rare
/// compared to commits.
///
/// Clones share the same underlying data.
///
/// # Example
///
/// ```
/// use ledgerline_core::snapshot::inmemory;
///
/// let cache: inmemory::Store<Vec<u8>> = inmemory::Store::new();
/// ```
#[derive(Clone, Debug)]
pub struct Store<P> {
    snapshots: SharedSnapshots<P>,
}

impl<P> Store<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of snapshots stored for `key`.
    #[must_use]
    pub fn snapshot_count(&self, key: &StreamKey) -> usize {
        self.snapshots
            .read()
            .expect("snapshot cache lock poisoned")
            .get(key)
            .map_or(0, BTreeMap::len)
    }
}

impl<P: Clone> Store<P> {
    fn select(&self, key: &StreamKey, max_revision: u64) -> Option<Snapshot<P>> {
        let snapshots = self.snapshots.read().expect("snapshot cache lock poisoned");
        snapshots
            .get(key)?
            .range(..=max_revision)
            .next_back()
            .map(|(_, snapshot)| snapshot.clone())
    }

    fn insert(&self, mut snapshot: Snapshot<P>, headers: Headers) -> Result<(), ConflictError> {
        let key = snapshot.stream_key();
        // Stored records always carry the normalized bucket.
        snapshot.bucket_id = key.bucket_id().to_string();
        let mut snapshots = self
            .snapshots
            .write()
            .expect("snapshot cache lock poisoned");
        let stream = snapshots.entry(key).or_default();

        if let Some((&latest, _)) = stream.last_key_value()
            && latest >= snapshot.stream_revision
        {
            tracing::debug!(
                latest,
                attempted = snapshot.stream_revision,
                "snapshot does not advance stream, rejecting"
            );
            return Err(ConflictError::snapshot(
                &snapshot.stream_key(),
                snapshot.stream_revision,
                latest,
            ));
        }

        snapshot.headers = headers;
        stream.insert(snapshot.stream_revision, snapshot);
        Ok(())
    }
}

impl<P> Default for Store<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> SnapshotCache for Store<P>
where
    P: Clone + Send + Sync + 'static,
{
    type Error = Infallible;
    type Payload = P;

    #[tracing::instrument(skip(self, key), fields(stream = %key))]
    fn get<'a>(
        &'a self,
        key: &'a StreamKey,
        max_revision: u64,
    ) -> impl Future<Output = Result<Option<Snapshot<P>>, Self::Error>> + Send + 'a {
        let snapshot = self.select(key, max_revision);
        tracing::trace!(
            found = snapshot.is_some(),
            revision = snapshot.as_ref().map(|s| s.stream_revision),
            "snapshot lookup"
        );
        std::future::ready(Ok(snapshot))
    }

    #[tracing::instrument(
        skip(self, snapshot, headers),
        fields(
            bucket = %snapshot.bucket_id,
            stream = %snapshot.stream_id,
            revision = snapshot.stream_revision,
        )
    )]
    fn add(
        &self,
        snapshot: Snapshot<P>,
        headers: Headers,
    ) -> impl Future<Output = Result<(), AddSnapshotError<Self::Error>>> + Send + '_ {
        let result = self.insert(snapshot, headers).map_err(AddSnapshotError::from);
        if result.is_ok() {
            tracing::debug!("snapshot stored");
        }
        std::future::ready(result)
    }
}
