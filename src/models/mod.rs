pub mod decision;
pub mod job;
pub mod loaders;
pub mod question;
pub mod section;
pub mod snapshot;

pub use decision::StepDecision;
pub use job::{BackfillJob, JobStatus, JobUpdate, NewJob};
pub use loaders::{load_all_seed_files, load_seed_file, CourseSeed, SectionSeed};
pub use question::{Difficulty, Question, QuestionDefaults, SourceRef};
pub use section::{GenerationBlueprint, QuestionsStatus, Section, SectionUpdate};
pub use snapshot::ExistingSnapshot;
