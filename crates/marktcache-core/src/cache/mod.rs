//! Cache partitions.
//!
//! A partition is a named, durable key→response store. The engine keeps three
//! logical partitions (shell, api, runtime) whose physical names carry the
//! deployed version, so a version bump orphans the old generation.
//!
//! Backends:
//! - `MemoryStorage`: process-local, used by tests and embedders
//! - `DiskStorage`: one directory per partition, one JSON file per entry

pub mod disk;
pub mod memory;
pub mod partitions;
pub mod storage;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;
pub use partitions::{PartitionKind, PartitionSet};
pub use storage::{CacheStorage, Partition, StoreError, StoredResponse};
