//! Generic document repositories
//!
//! [`ReadRepository`] holds the read-through cache logic; [`Repository`]
//! adds mutations with validators, observers and cache invalidation, and
//! dereferences to its reader.

pub mod hooks;
pub mod options;
pub mod read;
pub mod write;

pub use hooks::{ChangeKind, ChangeObserver, ChangeSet, ChangeValidator, SecondaryCacheKeys};
pub use options::{FindOptions, FindResults, GetOptions, SaveOptions};
pub use read::ReadRepository;
pub use write::Repository;
