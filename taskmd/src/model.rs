// Task model shared by the parser, serializer, store and CLI
//
// A Task is derived from one line of the task file. Its id is position- and
// content-derived, so it is only meaningful against the snapshot it came from.

use serde::{Deserialize, Serialize};

/// Deepest nesting level a task line may have (12 leading spaces)
pub const MAX_LEVEL: u8 = 3;

/// Spaces per nesting level
pub const INDENT_WIDTH: usize = 4;

/// Lifecycle stage of a task, one per checkbox marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// `[ ]`
    Pending,
    /// `[/]`
    InProgress,
    /// `[x]`
    Completed,
    /// `[-]`
    Cancelled,
    /// `[>]`
    Deferred,
    /// `[?]`
    Blocked,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
        TaskStatus::Deferred,
        TaskStatus::Blocked,
    ];

    /// Checkbox character written between the brackets
    pub fn checkbox(self) -> char {
        match self {
            TaskStatus::Pending => ' ',
            TaskStatus::InProgress => '/',
            TaskStatus::Completed => 'x',
            TaskStatus::Cancelled => '-',
            TaskStatus::Deferred => '>',
            TaskStatus::Blocked => '?',
        }
    }

    /// Status for a checkbox character, `None` for anything outside the six markers
    pub fn from_checkbox(c: char) -> Option<Self> {
        match c {
            ' ' => Some(TaskStatus::Pending),
            '/' => Some(TaskStatus::InProgress),
            'x' => Some(TaskStatus::Completed),
            '-' => Some(TaskStatus::Cancelled),
            '>' => Some(TaskStatus::Deferred),
            '?' => Some(TaskStatus::Blocked),
            _ => None,
        }
    }

    /// Completed or cancelled: nothing left to do
    pub fn is_closed(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Deferred => write!(f, "deferred"),
            TaskStatus::Blocked => write!(f, "blocked"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "pending" | "todo" => Ok(TaskStatus::Pending),
            "in_progress" | "wip" => Ok(TaskStatus::InProgress),
            "completed" | "done" => Ok(TaskStatus::Completed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            "deferred" => Ok(TaskStatus::Deferred),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(format!("Unknown task status: {}", other)),
        }
    }
}

/// A `+name` or `+name:value` token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modifier {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Modifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            value: Some(value.into()),
        }
    }
}

impl std::fmt::Display for Modifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "+{}:{}", self.name, value),
            None => write!(f, "+{}", self.name),
        }
    }
}

impl std::str::FromStr for Modifier {
    type Err = String;

    /// Accepts `name`, `name:value`, with or without the leading `+`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('+');
        let (name, value) = match s.split_once(':') {
            Some((name, value)) => (name, Some(value)),
            None => (s, None),
        };
        if name.is_empty() || name.chars().any(|c| !(c.is_alphanumeric() || c == '_' || c == '-')) {
            return Err(format!("Invalid modifier: {}", s));
        }
        Ok(match value {
            Some(v) if !v.is_empty() => Modifier::with_value(name, v),
            _ => Modifier::new(name),
        })
    }
}

/// Dated fields. Values are kept as written (`YYYY-MM-DD` or a full UTC timestamp)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Last time the task left in-progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wip: Option<String>,
}

impl TaskDates {
    pub fn is_empty(&self) -> bool {
        self.due.is_none() && self.done.is_none() && self.created.is_none() && self.wip.is_none()
    }
}

/// One task line of the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// `L{line}_{hash}`, valid only against the snapshot it was read from
    pub id: String,
    /// 1-based line number
    pub line_number: usize,
    pub raw_line: String,
    pub description: String,
    pub checkbox: char,
    pub status: TaskStatus,
    pub level: u8,
    pub parent_id: Option<String>,
    pub children: Vec<String>,
    pub tags: Vec<String>,
    pub mentions: Vec<String>,
    pub modifiers: Vec<Modifier>,
    pub dates: TaskDates,
    /// Minutes
    pub time_spent: Option<u32>,
    pub is_urgent: bool,
    pub is_important: bool,
    pub section: Option<String>,
}

impl Task {
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.trim_start_matches('#').to_lowercase();
        self.tags.iter().any(|t| *t == tag)
    }

    pub fn has_mention(&self, mention: &str) -> bool {
        let mention = mention.trim_start_matches('@').to_lowercase();
        self.mentions.iter().any(|m| *m == mention)
    }

    pub fn modifier(&self, name: &str) -> Option<&Modifier> {
        let name = name.trim_start_matches('+').to_lowercase();
        self.modifiers.iter().find(|m| m.name == name)
    }
}

/// Whole-file model produced by one read. Never patched in place.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    /// Tasks in file order
    pub tasks: Vec<Task>,
    /// Level-2/3 heading names in file order
    pub sections: Vec<String>,
    pub raw_content: String,
    /// `raw_content` split on `\n`; joining with `\n` reproduces it exactly
    pub lines: Vec<String>,
}

impl TaskSnapshot {
    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn find_at_line(&self, line_number: usize) -> Option<&Task> {
        self.tasks.iter().find(|t| t.line_number == line_number)
    }

    /// Direct children of `id`, in file order
    pub fn children_of(&self, id: &str) -> Vec<&Task> {
        match self.find(id) {
            Some(task) => task
                .children
                .iter()
                .filter_map(|child| self.find(child))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every task nested below `id`, depth-first in file order
    pub fn descendants_of(&self, id: &str) -> Vec<&Task> {
        let mut out = Vec::new();
        let mut stack: Vec<&Task> = self.children_of(id).into_iter().rev().collect();
        while let Some(task) = stack.pop() {
            out.push(task);
            for child in self.children_of(&task.id).into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }
}

/// Input for inserting a new task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewTask {
    pub description: String,
    pub status: Option<TaskStatus>,
    pub section: Option<String>,
    pub parent_id: Option<String>,
    pub tags: Vec<String>,
    pub mentions: Vec<String>,
    pub modifiers: Vec<Modifier>,
    pub due: Option<String>,
    pub created: Option<String>,
    pub time_spent: Option<u32>,
}

impl NewTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }
}

/// Partial update. `None` keeps the current value; an empty date string clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPatch {
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub tags: Option<Vec<String>>,
    pub mentions: Option<Vec<String>>,
    pub modifiers: Option<Vec<Modifier>>,
    pub due: Option<String>,
    pub done: Option<String>,
    pub created: Option<String>,
    pub time_spent: Option<u32>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}
