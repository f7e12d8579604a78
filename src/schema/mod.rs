//! Stack and event documents and their repositories

pub mod event;
pub mod stack;
pub mod types;

pub use event::EventRepository;
pub use stack::{
    signature_cache_key, OccurrenceIncrement, SignatureCacheKey, StackReferenceGuard,
    StackRepository,
};
pub use types::{event_fields, stack_fields, PersistentEvent, Stack};
