pub mod job;
pub mod language;
pub mod mcq;
pub mod question;

pub use job::{
    Job, JobStatus, JobSummary, JobType, JobView, LogEntry, LogLevel, Stage, MAX_LOG_ENTRIES,
};
pub use language::{language_code, labels_for, LANGUAGES};
pub use mcq::GeneratedMcq;
pub use question::{
    AnswerKey, QuestionBlock, QuestionOption, SolveMethod, SolvedQuestion, TranslatedQuestion,
};
