//! Per-run task bookkeeping and the progress text persisted in the shoot status.

use super::task::TaskId;
use std::collections::BTreeSet;

/// Text persisted once every task has succeeded
pub const EXECUTION_FINISHED: &str = "Execution finished";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub flow_name: String,
    pub all: BTreeSet<TaskId>,
    pub succeeded: BTreeSet<TaskId>,
    pub failed: BTreeSet<TaskId>,
    pub running: BTreeSet<TaskId>,
    pub pending: BTreeSet<TaskId>,
    pub skipped: BTreeSet<TaskId>,
}

impl Stats {
    pub fn new(flow_name: impl Into<String>, all: impl IntoIterator<Item = TaskId>) -> Self {
        let all: BTreeSet<TaskId> = all.into_iter().collect();
        Self {
            flow_name: flow_name.into(),
            pending: all.clone(),
            all,
            ..Default::default()
        }
    }

    /// Percentage of succeeded tasks, rounded down; an empty flow is complete
    pub fn progress_percent(&self) -> i32 {
        if self.all.is_empty() {
            return 100;
        }
        let percent = self.succeeded.len() * 100 / self.all.len();
        i32::try_from(percent).unwrap_or(100)
    }

    /// `Execution finished` at 100 %, otherwise the running task names
    pub fn description(&self) -> String {
        if self.progress_percent() == 100 {
            return EXECUTION_FINISHED.to_string();
        }
        self.running
            .iter()
            .map(TaskId::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn start(&mut self, id: &TaskId) {
        self.pending.remove(id);
        self.running.insert(id.clone());
    }

    pub(crate) fn succeed(&mut self, id: &TaskId) {
        self.pending.remove(id);
        self.running.remove(id);
        self.succeeded.insert(id.clone());
    }

    pub(crate) fn skip(&mut self, id: &TaskId) {
        self.skipped.insert(id.clone());
        self.succeed(id);
    }

    pub(crate) fn fail(&mut self, id: &TaskId) {
        self.running.remove(id);
        self.failed.insert(id.clone());
    }
}
