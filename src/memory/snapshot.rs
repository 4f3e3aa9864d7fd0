//! 上下文快照
//!
//! 委派子执行时交给子执行器的不可变副本。所有字段都是深拷贝，
//! 子执行器对其私有日志的任何修改都不会回流到父日志。

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::memory::Entry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub(crate) system_prefix: Entry,
    pub(crate) goals: Vec<String>,
    pub(crate) shared_memory: BTreeMap<String, Value>,
    pub(crate) recent_entries: Vec<Entry>,
    pub(crate) originating_request: Option<String>,
}

impl Snapshot {
    pub fn system_prefix(&self) -> &Entry {
        &self.system_prefix
    }

    pub fn goals(&self) -> &[String] {
        &self.goals
    }

    pub fn shared_memory(&self) -> &BTreeMap<String, Value> {
        &self.shared_memory
    }

    pub fn recent_entries(&self) -> &[Entry] {
        &self.recent_entries
    }

    pub fn originating_request(&self) -> Option<&str> {
        self.originating_request.as_deref()
    }
}
