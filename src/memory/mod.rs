//! 记忆层：对话消息、回忆缓存（Brain）、短期记忆、任务队列

pub mod conversation;
pub mod jobs;
pub mod recall;
pub mod short_term;

pub use conversation::{truncate_chars, ConversationMemory, Message, Role};
pub use jobs::{Job, JobStatus, JobStore};
pub(crate) use recall::write_atomic;
pub use recall::{query_key, Recall, RecallCache, RecallError, RecallStats};
pub use short_term::{InMemoryShortTerm, ShortTermMemory, SqliteShortTerm};
