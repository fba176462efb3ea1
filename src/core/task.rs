//! 任务与任务记录
//!
//! Task 在入队时创建且不可变；TaskRecord 在任务开始执行时以 Started 写入，
//! 结束时恰好一次转为 Completed / Failed。记录键只追加、不复用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务 ID
pub type TaskId = String;

/// 任务记录在存储中的键前缀
pub const TASK_RECORD_PREFIX: &str = "task/";

/// 用户提交的一条自然语言指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub instruction: String,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            instruction: instruction.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// 任务记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Started,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// 持久化的任务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    /// 实际执行的步数
    pub steps: Option<usize>,
}

impl TaskRecord {
    pub fn started(task: Task) -> Self {
        Self {
            task,
            status: TaskStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            success: None,
            error_message: None,
            steps: None,
        }
    }

    /// 消耗 Started 记录，生成终态记录；Completed 当且仅当 success
    pub fn finish(self, success: bool, steps: usize, error_message: Option<String>) -> Self {
        Self {
            status: if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            },
            completed_at: Some(Utc::now()),
            success: Some(success),
            error_message: if success { None } else { error_message },
            steps: Some(steps),
            ..self
        }
    }

    /// 存储键：task/<id>/started 与 task/<id>/finished，互不覆盖
    pub fn key(&self) -> String {
        let suffix = if self.status.is_terminal() {
            "finished"
        } else {
            "started"
        };
        format!("{}{}/{}", TASK_RECORD_PREFIX, self.task.id, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = Task::new("open settings");
        let b = Task::new("open settings");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("task_"));
    }

    #[test]
    fn test_record_keys_do_not_collide() {
        let started = TaskRecord::started(Task::new("call mom"));
        let started_key = started.key();
        let finished = started.finish(false, 3, Some("step limit (3) reached".to_string()));

        assert!(started_key.ends_with("/started"));
        assert!(finished.key().ends_with("/finished"));
        assert_ne!(started_key, finished.key());
        assert_eq!(finished.status, TaskStatus::Failed);
        assert_eq!(finished.success, Some(false));
        assert!(finished.completed_at.unwrap() >= finished.started_at);
    }

    #[test]
    fn test_successful_finish_drops_error() {
        let rec = TaskRecord::started(Task::new("x")).finish(true, 2, Some("ignored".into()));
        assert_eq!(rec.status, TaskStatus::Completed);
        assert_eq!(rec.error_message, None);
        assert_eq!(rec.steps, Some(2));
    }
}
