pub mod store;

pub use store::{BackfillStore, EnqueueOutcome, JobTrigger, MemoryStore, MAX_BATCH_WRITES};
