//! Agent Task Tracker
//!
//! Mirrors tool calls as user-visible tasks and enforces the per-session
//! tool-call budget. One tracker is shared by every turn of a session; each
//! status change broadcasts a full snapshot of the task list.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskStatus {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    pub id: String,
    pub call_id: String,
    pub title: String,
    pub description: String,
    pub status: AgentTaskStatus,
    /// The assistant message whose round requested the call
    pub related_message_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TrackerState {
    tasks: Vec<AgentTask>,
    calls_used: u32,
}

pub struct AgentTaskTracker {
    state: Mutex<TrackerState>,
    max_calls: u32,
    snapshots: broadcast::Sender<Vec<AgentTask>>,
}

impl AgentTaskTracker {
    pub fn new(max_calls_per_session: u32) -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(TrackerState::default()),
            max_calls: max_calls_per_session,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<AgentTask>> {
        self.snapshots.subscribe()
    }

    pub fn tasks(&self) -> Vec<AgentTask> {
        self.lock().tasks.clone()
    }

    /// Take one unit of the session budget. `false` once it is spent.
    pub fn try_reserve(&self) -> bool {
        let mut state = self.lock();
        if state.calls_used >= self.max_calls {
            return false;
        }
        state.calls_used += 1;
        true
    }

    pub fn calls_used(&self) -> u32 {
        self.lock().calls_used
    }

    pub fn remaining_budget(&self) -> u32 {
        self.max_calls.saturating_sub(self.lock().calls_used)
    }

    pub fn reset_budget(&self) {
        self.lock().calls_used = 0;
        tracing::debug!(max_calls = self.max_calls, "tool call budget reset");
    }

    /// Record a requested call as a pending task; returns the task id.
    pub fn create_task(
        &self,
        call_id: &str,
        title: &str,
        description: &str,
        related_message_id: &str,
    ) -> String {
        let now = Utc::now();
        let task = AgentTask {
            id: Uuid::new_v4().to_string(),
            call_id: call_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: AgentTaskStatus::Pending,
            related_message_id: related_message_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        let id = task.id.clone();
        let snapshot = {
            let mut state = self.lock();
            state.tasks.push(task);
            state.tasks.clone()
        };
        self.broadcast(snapshot);
        id
    }

    pub fn mark_running(&self, task_id: &str) {
        self.update(task_id, AgentTaskStatus::Running);
    }

    pub fn mark_resolved(&self, task_id: &str, success: bool) {
        let status = if success {
            AgentTaskStatus::Completed
        } else {
            AgentTaskStatus::Error
        };
        self.update(task_id, status);
    }

    /// Drop every task. Loops still running keep going; their later updates
    /// simply find no task to change.
    pub fn clear_tasks(&self) {
        let snapshot = {
            let mut state = self.lock();
            state.tasks.clear();
            state.tasks.clone()
        };
        self.broadcast(snapshot);
    }

    fn update(&self, task_id: &str, status: AgentTaskStatus) {
        let snapshot = {
            let mut state = self.lock();
            let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) else {
                return;
            };
            task.status = status;
            task.updated_at = Utc::now();
            state.tasks.clone()
        };
        self.broadcast(snapshot);
    }

    fn broadcast(&self, snapshot: Vec<AgentTask>) {
        // No subscribers is fine.
        let _ = self.snapshots.send(snapshot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
