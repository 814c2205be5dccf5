// Memoria - Local-first spaced repetition core
//
// Prompts and action logs are content-addressed; a task's scheduling state is
// a fold over its action logs, so replicas that hold the same logs agree on
// the same state regardless of the order the logs arrived in.

pub mod actionlog;
pub mod addressing;
pub mod config;
pub mod event;
pub mod prompt;
pub mod reconcile;
pub mod review;
pub mod schedule;
pub mod state;
pub mod store;

pub use actionlog::{ActionLog, ActionLogId, ActionLogType};
pub use addressing::{ContentAddressable, ContentId};
pub use config::{ConfigError, CoreConfig};
pub use prompt::{Prompt, PromptId, PromptTask, PromptType, TaskId};
pub use review::ReviewConfig;
pub use schedule::{RepetitionOutcome, SchedulerConfig, SpacedRepetitionScheduler};
pub use state::{merge_action_logs, PromptState, PromptStateReducer};
pub use store::{MemoryBackend, PromptStore, SqliteBackend, StoreConfig, StoreError};
