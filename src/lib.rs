#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use ledgerline_core::test;
pub use ledgerline_core::{
    aggregate,
    aggregate::{Aggregate, Handle},
    clock,
    clock::{Clock, SystemClock},
    commit::{Commit, CommitAttempt, Headers},
    concurrency::ConflictError,
    key::{DEFAULT_BUCKET, StreamKey},
    repository,
    repository::{CommandError, Loaded, Repository},
};

pub mod store {

    pub use ledgerline_core::store::{
        CheckpointScope, CommitError, CommitStore, Commits, MAX_REVISION, RevisionRange,
    };

    pub use ledgerline_core::store::inmemory;
}

pub mod snapshot {

    pub use ledgerline_core::snapshot::{
        AddSnapshotError, NoSnapshots, Snapshot, SnapshotCache, SnapshotPolicy,
    };

    pub use ledgerline_core::snapshot::inmemory;
}
