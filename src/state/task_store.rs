use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Task model
// ---------------------------------------------------------------------------

/// Lifecycle: `pending → running → {completed | error | stopped}`.
/// A pending task may also be stopped or fail before it starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error | TaskStatus::Stopped)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Stopped) | (Pending, Error)
                | (Running, Completed) | (Running, Error) | (Running, Stopped)
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "error" => Some(TaskStatus::Error),
            "stopped" => Some(TaskStatus::Stopped),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AppScrape,
    TrendCollection,
}

impl TaskKind {
    fn id_prefix(self) -> &'static str {
        match self {
            TaskKind::AppScrape => "task",
            TaskKind::TrendCollection => "trend",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "app_scrape" => Some(TaskKind::AppScrape),
            "trend_collection" => Some(TaskKind::TrendCollection),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::AppScrape => write!(f, "app_scrape"),
            TaskKind::TrendCollection => write!(f, "trend_collection"),
        }
    }
}

/// What the task was asked to collect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParams {
    pub keywords: Vec<String>,
    pub platforms: Vec<String>,
    pub timeframe: Option<String>,
    pub limit_per_keyword: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskProgress {
    pub total: usize,
    pub completed: usize,
    pub current_keyword: String,
    pub current_platform: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub params: TaskParams,
    pub progress: TaskProgress,
    pub results: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

/// Process-wide registry of background collection tasks.
///
/// Status changes go through [`TaskStore::transition`], which validates and
/// applies them while holding the entry's shard lock, so a stop request and a
/// worker finishing can never both win.
pub struct TaskStore {
    tasks: DashMap<String, TaskRecord>,
}

impl TaskStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new pending task and return its snapshot.
    pub fn create(&self, kind: TaskKind, params: TaskParams) -> TaskRecord {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let task_id = format!(
            "{}_{}_{}",
            kind.id_prefix(),
            now.format("%Y%m%d%H%M%S"),
            &suffix[..8]
        );
        let record = TaskRecord {
            task_id: task_id.clone(),
            kind,
            status: TaskStatus::Pending,
            params,
            progress: TaskProgress::default(),
            results: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert(task_id, record.clone());
        record
    }

    /// Re-register a task loaded from persistence. Existing entries win.
    pub fn restore(&self, record: TaskRecord) -> TaskRecord {
        self.tasks
            .entry(record.task_id.clone())
            .or_insert(record)
            .clone()
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Atomically move a task to `next`, failing if the lifecycle forbids it.
    pub fn transition(&self, task_id: &str, next: TaskStatus) -> Result<TaskRecord> {
        self.modify(task_id, |t| {
            if !t.status.can_transition_to(next) {
                return Err(AppError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: t.status,
                    to: next,
                });
            }
            t.status = next;
            Ok(())
        })
    }

    /// Mark a running task completed with its results.
    pub fn complete(&self, task_id: &str, results: serde_json::Value) -> Result<TaskRecord> {
        self.modify(task_id, |t| {
            if !t.status.can_transition_to(TaskStatus::Completed) {
                return Err(AppError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: t.status,
                    to: TaskStatus::Completed,
                });
            }
            t.status = TaskStatus::Completed;
            t.results = Some(results);
            Ok(())
        })
    }

    /// Mark a task failed. Already-terminal tasks are left untouched.
    pub fn fail(&self, task_id: &str, message: String) -> Result<TaskRecord> {
        self.modify(task_id, |t| {
            if !t.status.can_transition_to(TaskStatus::Error) {
                return Err(AppError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: t.status,
                    to: TaskStatus::Error,
                });
            }
            t.status = TaskStatus::Error;
            t.error = Some(message);
            Ok(())
        })
    }

    /// Cooperative cancellation: the worker observes the flag between iterations.
    pub fn request_stop(&self, task_id: &str) -> Result<TaskRecord> {
        self.transition(task_id, TaskStatus::Stopped)
    }

    pub fn is_stopped(&self, task_id: &str) -> bool {
        self.tasks
            .get(task_id)
            .map_or(false, |t| t.status == TaskStatus::Stopped)
    }

    pub fn update_progress(&self, task_id: &str, f: impl FnOnce(&mut TaskProgress)) -> Result<TaskRecord> {
        self.modify(task_id, |t| {
            f(&mut t.progress);
            Ok(())
        })
    }

    /// All tasks, newest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut all: Vec<TaskRecord> = self.tasks.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|e| !e.value().status.is_terminal())
            .count()
    }

    fn modify(&self, task_id: &str, f: impl FnOnce(&mut TaskRecord) -> Result<()>) -> Result<TaskRecord> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
        let task = entry.value_mut();
        f(task)?;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self { tasks: DashMap::new() }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TaskParams {
        TaskParams {
            keywords: vec!["todo".to_string()],
            platforms: vec!["google_trends".to_string()],
            timeframe: Some("today 3-m".to_string()),
            limit_per_keyword: None,
        }
    }

    #[test]
    fn create_registers_pending_task_with_prefixed_id() {
        let store = TaskStore::new();
        let t = store.create(TaskKind::TrendCollection, params());
        assert!(t.task_id.starts_with("trend_"));
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(store.get(&t.task_id), Some(t.clone()));

        let s = store.create(TaskKind::AppScrape, params());
        assert!(s.task_id.starts_with("task_"));
        assert_ne!(s.task_id, t.task_id);
    }

    #[test]
    fn happy_path_lifecycle() {
        let store = TaskStore::new();
        let t = store.create(TaskKind::TrendCollection, params());
        store.transition(&t.task_id, TaskStatus::Running).unwrap();
        let done = store
            .complete(&t.task_id, serde_json::json!({"trends_saved": 3}))
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.results.unwrap()["trends_saved"], 3);
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn terminal_states_are_final() {
        let store = TaskStore::new();
        let t = store.create(TaskKind::TrendCollection, params());
        store.transition(&t.task_id, TaskStatus::Running).unwrap();
        store.request_stop(&t.task_id).unwrap();
        assert!(store.is_stopped(&t.task_id));

        let err = store.complete(&t.task_id, serde_json::json!({})).unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition { from: TaskStatus::Stopped, to: TaskStatus::Completed, .. }
        ));
        assert!(store.request_stop(&t.task_id).is_err());
        assert!(store.fail(&t.task_id, "late".to_string()).is_err());
        assert_eq!(store.get(&t.task_id).unwrap().status, TaskStatus::Stopped);
    }

    #[test]
    fn pending_task_can_be_stopped() {
        let store = TaskStore::new();
        let t = store.create(TaskKind::AppScrape, params());
        store.request_stop(&t.task_id).unwrap();
        assert!(store.transition(&t.task_id, TaskStatus::Running).is_err());
    }

    #[test]
    fn unknown_task_is_reported() {
        let store = TaskStore::new();
        assert!(matches!(
            store.request_stop("nope").unwrap_err(),
            AppError::TaskNotFound(_)
        ));
        assert!(!store.is_stopped("nope"));
    }

    #[test]
    fn progress_updates_in_place() {
        let store = TaskStore::new();
        let t = store.create(TaskKind::TrendCollection, params());
        store
            .update_progress(&t.task_id, |p| {
                p.total = 4;
                p.completed = 1;
                p.current_keyword = "todo".to_string();
            })
            .unwrap();
        let p = store.get(&t.task_id).unwrap().progress;
        assert_eq!((p.total, p.completed), (4, 1));
    }

    #[test]
    fn restore_does_not_clobber_live_entry() {
        let store = TaskStore::new();
        let live = store.create(TaskKind::TrendCollection, params());
        store.transition(&live.task_id, TaskStatus::Running).unwrap();
        let restored = store.restore(live.clone());
        assert_eq!(restored.status, TaskStatus::Running);
    }

    #[test]
    fn concurrent_stop_and_complete_have_one_winner() {
        let store = TaskStore::new();
        for _ in 0..50 {
            let t = store.create(TaskKind::TrendCollection, params());
            store.transition(&t.task_id, TaskStatus::Running).unwrap();
            let a = Arc::clone(&store);
            let b = Arc::clone(&store);
            let id_a = t.task_id.clone();
            let id_b = t.task_id.clone();
            let stop = std::thread::spawn(move || a.request_stop(&id_a).is_ok());
            let done = std::thread::spawn(move || b.complete(&id_b, serde_json::json!({})).is_ok());
            let (stopped, completed) = (stop.join().unwrap(), done.join().unwrap());
            assert!(stopped ^ completed);
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Error,
            TaskStatus::Stopped,
        ] {
            assert_eq!(TaskStatus::parse(&s.to_string()), Some(s));
        }
        assert_eq!(TaskKind::parse("trend_collection"), Some(TaskKind::TrendCollection));
    }
}
