//! Object synchronization and change broadcasting

mod dispatcher;
mod registry;
mod synchronizer;

pub use dispatcher::{BroadcastDispatcher, DispatchStats};
pub use registry::{ObjectRecord, ObjectRegistry, RecordGuard};
pub use synchronizer::{ObjectSynchronizer, SideEffect, SyncReport};
