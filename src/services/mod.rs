pub mod dedup;
pub mod generator;
pub mod normalizer;
pub mod persister;
pub mod planner;

pub use generator::{build_prompts, GenerateOptions, GeneratedBatch, Generator, LlmGenerator};
pub use persister::{BatchPersister, PersistOutcome};
pub use planner::{BatchSample, Planner, RequestPlan, YieldPlanner, YieldStats};
