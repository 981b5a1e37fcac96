// Durable session state and its persistence backends

pub mod persist;
pub mod store;

pub use persist::{
    FileSnapshotStore, KeyringSnapshotStore, PersistedSnapshot, SnapshotStore, SNAPSHOT_VERSION,
};
pub use store::SessionStore;
