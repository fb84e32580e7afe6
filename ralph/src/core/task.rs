//! Task graph model and the selection protocol agents must honour.
//!
//! The controller never talks to the task store. The agent does, guided by the
//! instruction payload. These types make that protocol explicit so it can be
//! exercised directly:
//!
//! - only a `pending` task whose `blockedBy` entries are all `completed` is
//!   selectable, and the lowest ordering key wins;
//! - at most one task is `in_progress` at a time;
//! - status moves `pending -> in_progress -> completed` and never backwards.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(rename = "blockedBy", default)]
    pub blocked_by: Vec<String>,
}

/// Fields an agent may change on an existing task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub description: Option<String>,
    pub add_blocked_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub subject: String,
    pub description: String,
    pub blocked_by: Vec<String>,
}

/// Capability interface over the external task graph.
///
/// Implementations live on the agent side of the loop; the controller is never
/// handed one.
pub trait TaskStore {
    fn list(&self) -> Result<Vec<Task>>;
    fn get(&self, id: &str) -> Result<Option<Task>>;
    fn update(&mut self, id: &str, update: TaskUpdate) -> Result<Task>;
    fn create(&mut self, task: NewTask) -> Result<Task>;
}

/// Compare task ids by their stable ordering key.
///
/// Numeric ids compare numerically and sort before non-numeric ids, which
/// compare lexicographically.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Returns true if every blocker of `task` exists and is completed.
pub fn blockers_resolved(task: &Task, tasks: &[Task]) -> bool {
    task.blocked_by.iter().all(|blocker| {
        tasks
            .iter()
            .any(|t| &t.id == blocker && t.status == TaskStatus::Completed)
    })
}

/// Pick the task the next iteration must work on.
///
/// Returns `None` when nothing is selectable (all done, or everything pending
/// is blocked).
pub fn select_next(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending && blockers_resolved(task, tasks))
        .min_by(|a, b| compare_ids(&a.id, &b.id))
}

pub fn all_completed(tasks: &[Task]) -> bool {
    tasks.iter().all(|task| task.status == TaskStatus::Completed)
}

pub fn in_progress_count(tasks: &[Task]) -> usize {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::InProgress)
        .count()
}

/// Validate a status change. Re-asserting the current status is allowed.
pub fn check_transition(from: TaskStatus, to: TaskStatus) -> Result<(), String> {
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (TaskStatus::Pending, TaskStatus::InProgress)
        | (TaskStatus::InProgress, TaskStatus::Completed) => Ok(()),
        (a, b) => Err(format!(
            "invalid status transition {} -> {}",
            a.as_str(),
            b.as_str()
        )),
    }
}

/// Task store held in memory that rejects protocol violations.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: BTreeMap<String, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Result<Self> {
        let mut store = Self::new();
        for task in tasks {
            if store.tasks.contains_key(&task.id) {
                bail!("duplicate task id '{}'", task.id);
            }
            store.tasks.insert(task.id.clone(), task);
        }
        Ok(store)
    }

    fn sorted(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| compare_ids(&a.id, &b.id));
        tasks
    }

    fn next_id(&self) -> String {
        let max = self
            .tasks
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (max + 1).to_string()
    }
}

impl TaskStore for InMemoryTaskStore {
    fn list(&self) -> Result<Vec<Task>> {
        Ok(self.sorted())
    }

    fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).cloned())
    }

    fn update(&mut self, id: &str, update: TaskUpdate) -> Result<Task> {
        let snapshot = self.sorted();
        let current = self
            .tasks
            .get(id)
            .ok_or_else(|| anyhow!("unknown task '{id}'"))?
            .clone();

        if let Some(status) = update.status {
            check_transition(current.status, status).map_err(|err| anyhow!("task '{id}': {err}"))?;
            if status == TaskStatus::InProgress && current.status == TaskStatus::Pending {
                if in_progress_count(&snapshot) > 0 {
                    bail!("task '{id}': another task is already in_progress");
                }
                let expected = select_next(&snapshot).map(|task| task.id.as_str());
                if expected != Some(id) {
                    bail!(
                        "task '{id}': not the next selectable task (expected {})",
                        expected.unwrap_or("none")
                    );
                }
            }
        }
        for blocker in &update.add_blocked_by {
            if !self.tasks.contains_key(blocker) {
                bail!("task '{id}': unknown blocker '{blocker}'");
            }
        }

        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown task '{id}'"))?;
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        for blocker in update.add_blocked_by {
            if !task.blocked_by.contains(&blocker) {
                task.blocked_by.push(blocker);
            }
        }
        Ok(task.clone())
    }

    fn create(&mut self, task: NewTask) -> Result<Task> {
        for blocker in &task.blocked_by {
            if !self.tasks.contains_key(blocker) {
                bail!("unknown blocker '{blocker}'");
            }
        }
        let created = Task {
            id: self.next_id(),
            subject: task.subject,
            description: task.description,
            status: TaskStatus::Pending,
            blocked_by: task.blocked_by,
        };
        self.tasks.insert(created.id.clone(), created.clone());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: TaskStatus, blocked_by: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            subject: format!("{id} subject"),
            description: String::new(),
            status,
            blocked_by: blocked_by.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn selects_lowest_unblocked_pending_task() {
        let tasks = vec![
            task("10", TaskStatus::Pending, &[]),
            task("2", TaskStatus::Pending, &["1"]),
            task("1", TaskStatus::Pending, &[]),
        ];
        assert_eq!(select_next(&tasks).map(|t| t.id.as_str()), Some("1"));
    }

    #[test]
    fn blocked_task_is_never_selected() {
        let tasks = vec![
            task("1", TaskStatus::InProgress, &[]),
            task("2", TaskStatus::Pending, &["1"]),
        ];
        assert_eq!(select_next(&tasks), None);
    }

    #[test]
    fn unknown_blocker_counts_as_unresolved() {
        let tasks = vec![task("1", TaskStatus::Pending, &["missing"])];
        assert_eq!(select_next(&tasks), None);
    }

    #[test]
    fn completed_blockers_unblock() {
        let tasks = vec![
            task("1", TaskStatus::Completed, &[]),
            task("2", TaskStatus::Pending, &["1"]),
        ];
        assert_eq!(select_next(&tasks).map(|t| t.id.as_str()), Some("2"));
    }

    #[test]
    fn numeric_ids_sort_before_names() {
        assert_eq!(compare_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_ids("10", "alpha"), Ordering::Less);
        assert_eq!(compare_ids("alpha", "beta"), Ordering::Less);
    }

    #[test]
    fn transitions_only_move_forward() {
        assert!(check_transition(TaskStatus::Pending, TaskStatus::InProgress).is_ok());
        assert!(check_transition(TaskStatus::InProgress, TaskStatus::Completed).is_ok());
        assert!(check_transition(TaskStatus::Pending, TaskStatus::Completed).is_err());
        assert!(check_transition(TaskStatus::Completed, TaskStatus::Pending).is_err());
        assert!(check_transition(TaskStatus::InProgress, TaskStatus::Pending).is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&task("1", TaskStatus::InProgress, &["0"])).expect("json");
        assert!(json.contains("\"in_progress\""));
        assert!(json.contains("\"blockedBy\":[\"0\"]"));
    }

    #[test]
    fn store_rejects_second_in_progress() {
        let mut store = InMemoryTaskStore::with_tasks(vec![
            task("1", TaskStatus::InProgress, &[]),
            task("2", TaskStatus::Pending, &[]),
        ])
        .expect("store");
        let err = store
            .update(
                "2",
                TaskUpdate {
                    status: Some(TaskStatus::InProgress),
                    ..TaskUpdate::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("already in_progress"));
    }

    #[test]
    fn store_rejects_starting_out_of_order() {
        let mut store = InMemoryTaskStore::with_tasks(vec![
            task("1", TaskStatus::Pending, &[]),
            task("2", TaskStatus::Pending, &[]),
        ])
        .expect("store");
        let err = store
            .update(
                "2",
                TaskUpdate {
                    status: Some(TaskStatus::InProgress),
                    ..TaskUpdate::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("expected 1"));
    }

    #[test]
    fn store_rejects_skipping_in_progress() {
        let mut store =
            InMemoryTaskStore::with_tasks(vec![task("1", TaskStatus::Pending, &[])]).expect("store");
        let err = store
            .update(
                "1",
                TaskUpdate {
                    status: Some(TaskStatus::Completed),
                    ..TaskUpdate::default()
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("pending -> completed"));
    }

    #[test]
    fn create_assigns_next_numeric_id() {
        let mut store =
            InMemoryTaskStore::with_tasks(vec![task("3", TaskStatus::Pending, &[])]).expect("store");
        let created = store
            .create(NewTask {
                subject: "follow-up".to_string(),
                description: "more work".to_string(),
                blocked_by: vec!["3".to_string()],
            })
            .expect("create");
        assert_eq!(created.id, "4");
        assert_eq!(created.status, TaskStatus::Pending);
        assert_eq!(store.list().expect("list").len(), 2);
        assert!(store.create(NewTask {
            blocked_by: vec!["nope".to_string()],
            ..NewTask::default()
        })
        .is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = InMemoryTaskStore::with_tasks(vec![
            task("1", TaskStatus::Pending, &[]),
            task("1", TaskStatus::Pending, &[]),
        ]);
        assert!(result.is_err());
    }
}
