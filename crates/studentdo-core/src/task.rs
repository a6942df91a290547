use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            _ => None,
        }
    }

    pub fn level(self) -> i64 {
        self as i64
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

/// An active to-do item. Rows are replaced as a whole; there is no
/// partial-field update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    #[serde(default)]
    pub id: Option<u64>,

    pub title: String,

    pub description: String,

    #[serde(rename = "due_date", with = "chrono::serde::ts_milliseconds")]
    pub due: DateTime<Utc>,

    /// 1 = Low, 2 = Medium, 3 = High. Other values are kept as-is and
    /// render as "None".
    pub priority: i64,

    #[serde(rename = "is_completed", default)]
    pub completed: bool,
}

impl Task {
    pub fn new(title: String, description: String, due: DateTime<Utc>, priority: i64) -> Self {
        Self {
            id: None,
            title,
            description,
            due,
            priority,
            completed: false,
        }
    }

    pub fn priority_level(&self) -> Option<Priority> {
        Priority::from_level(self.priority)
    }

    pub fn priority_label(&self) -> &'static str {
        self.priority_level().map(Priority::label).unwrap_or("None")
    }

    /// Same task with the completion flag flipped.
    pub fn toggled(&self) -> Self {
        Self {
            completed: !self.completed,
            ..self.clone()
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.due < now
    }
}

/// Recycle bin entry. Shares its id with the task it was created from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedTask {
    pub id: u64,

    pub title: String,

    pub description: String,

    #[serde(rename = "due_date", with = "chrono::serde::ts_milliseconds")]
    pub due: DateTime<Utc>,

    pub priority: i64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub deleted_at: DateTime<Utc>,
}

impl DeletedTask {
    pub fn from_task(task: &Task, id: u64, deleted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: task.title.clone(),
            description: task.description.clone(),
            due: task.due,
            priority: task.priority,
            deleted_at,
        }
    }

    /// Rebuilds the active task. The completion flag is not kept in the bin,
    /// so restored tasks come back incomplete.
    pub fn restored(&self) -> Task {
        Task {
            id: Some(self.id),
            title: self.title.clone(),
            description: self.description.clone(),
            due: self.due,
            priority: self.priority,
            completed: false,
        }
    }

    pub fn priority_label(&self) -> &'static str {
        Priority::from_level(self.priority)
            .map(Priority::label)
            .unwrap_or("None")
    }
}
