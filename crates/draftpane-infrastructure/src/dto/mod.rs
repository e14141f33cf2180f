//! Data Transfer Objects (DTOs) for persistence.
//!
//! These DTOs represent the versioned schema for persisted data. They are
//! private to the infrastructure layer; the rest of the workspace only sees
//! domain models.
//!
//! ### TaskPaneSnapshot Version History
//! - **1**: Initial envelope `{version, snapshot}` with camelCase fields

mod snapshot;

pub use snapshot::{
    CitationV1, DraftResponseV1, PersistedSnapshot, SNAPSHOT_VERSION, SnapshotDecodeError,
    TaskPaneSnapshotV1, decode_snapshot, encode_snapshot,
};
