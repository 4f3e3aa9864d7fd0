//! 上下文层：条目、会话日志、压缩归档、快照与预算计量

pub mod archive;
pub mod conversation;
pub mod entry;
pub mod log;
pub mod snapshot;
pub mod token_budget;

pub use archive::{ArchiveBatch, ArchiveSink, ErrorRecord, InMemoryArchive, JsonlArchive, SessionState};
pub use conversation::{Message, Role};
pub use entry::{
    Entry, EntryBuilder, EntryContent, EntryKind, META_ERROR_CODE, META_STEP, META_TOOL_NAME,
};
pub use log::{CompressionReport, ContextLog, LogSettings, LogStats};
pub use snapshot::Snapshot;
pub use token_budget::{BudgetUnit, TokenEstimator};
