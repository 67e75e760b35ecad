//! Read-side helpers: task filters, grace-period visibility and Eisenhower quadrants.

use crate::clock::parse_date_value;
use crate::error::{Result, TaskError};
use crate::model::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Criteria for `TaskStore::list_tasks`. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Option<Vec<TaskStatus>>,
    pub section: Option<String>,
    pub tag: Option<String>,
    pub mention: Option<String>,
    pub modifier: Option<String>,
    /// Case-insensitive substring of the description
    pub text: Option<String>,
    pub max_level: Option<u8>,
    /// Keep only tasks that are active, or were within this window
    pub active_within: Option<Duration>,
}

impl TaskFilter {
    /// Parse a comma separated status list such as `pending,in_progress`
    pub fn parse_statuses(input: &str) -> Result<Vec<TaskStatus>> {
        let statuses = input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<TaskStatus>().map_err(TaskError::Validation))
            .collect::<Result<Vec<_>>>()?;
        if statuses.is_empty() {
            return Err(TaskError::validation("Empty status filter"));
        }
        Ok(statuses)
    }

    pub fn with_statuses(mut self, statuses: Vec<TaskStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Reject inputs that can never match a parsed task
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self.max_level {
            if level > crate::model::MAX_LEVEL {
                return Err(TaskError::validation(format!(
                    "max_level {} exceeds the deepest nesting level {}",
                    level,
                    crate::model::MAX_LEVEL
                )));
            }
        }
        if matches!(&self.statuses, Some(s) if s.is_empty()) {
            return Err(TaskError::validation("Empty status filter"));
        }
        Ok(())
    }

    pub fn matches(&self, task: &Task, now: DateTime<Utc>) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if let Some(section) = &self.section {
            match &task.section {
                Some(s) if s.eq_ignore_ascii_case(section) => {}
                _ => return false,
            }
        }
        if let Some(tag) = &self.tag {
            if !task.has_tag(tag) {
                return false;
            }
        }
        if let Some(mention) = &self.mention {
            if !task.has_mention(mention) {
                return false;
            }
        }
        if let Some(modifier) = &self.modifier {
            if task.modifier(modifier).is_none() {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !task
                .description
                .to_lowercase()
                .contains(&text.to_lowercase())
            {
                return false;
            }
        }
        if let Some(max_level) = self.max_level {
            if task.level > max_level {
                return false;
            }
        }
        if let Some(window) = self.active_within {
            if !is_active_within(task, now, window) {
                return false;
            }
        }
        true
    }
}

/// Pending / in-progress tasks are active. Completed tasks stay visible for
/// `grace` after their done stamp, and tasks that left in-progress stay visible
/// for `grace` after their wip stamp.
pub fn is_active_within(task: &Task, now: DateTime<Utc>, grace: Duration) -> bool {
    if matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress) {
        return true;
    }

    let grace =
        chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    let within = |stamp: &Option<String>| {
        stamp
            .as_deref()
            .and_then(parse_date_value)
            .map(|at| at <= now && now - at <= grace)
            .unwrap_or(false)
    };

    if task.status == TaskStatus::Completed && within(&task.dates.done) {
        return true;
    }
    within(&task.dates.wip)
}

/// Eisenhower quadrant of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quadrant {
    /// Urgent and important: do now
    Q1,
    /// Important, not urgent: schedule
    Q2,
    /// Urgent, not important: delegate
    Q3,
    /// Neither
    Q4,
}

pub fn quadrant_of(task: &Task) -> Quadrant {
    match (task.is_urgent, task.is_important) {
        (true, true) => Quadrant::Q1,
        (false, true) => Quadrant::Q2,
        (true, false) => Quadrant::Q3,
        (false, false) => Quadrant::Q4,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuadrantGroups {
    pub q1: Vec<Task>,
    pub q2: Vec<Task>,
    pub q3: Vec<Task>,
    pub q4: Vec<Task>,
}

/// Split tasks by urgency/importance, keeping their relative order
pub fn group_by_quadrant(tasks: &[Task]) -> QuadrantGroups {
    let mut groups = QuadrantGroups::default();
    for task in tasks {
        let bucket = match quadrant_of(task) {
            Quadrant::Q1 => &mut groups.q1,
            Quadrant::Q2 => &mut groups.q2,
            Quadrant::Q3 => &mut groups.q3,
            Quadrant::Q4 => &mut groups.q4,
        };
        bucket.push(task.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::parse_content;

    fn now() -> DateTime<Utc> {
        parse_date_value("2026-02-01T12:00:00Z").unwrap()
    }

    fn tasks(content: &str) -> Vec<Task> {
        parse_content(content).tasks
    }

    #[test]
    fn test_parse_statuses() {
        let statuses = TaskFilter::parse_statuses("pending, in_progress").unwrap();
        assert_eq!(statuses, vec![TaskStatus::Pending, TaskStatus::InProgress]);

        let err = TaskFilter::parse_statuses("pending,sleeping").unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(TaskFilter::parse_statuses(" , ").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_level() {
        let filter = TaskFilter {
            max_level: Some(7),
            ..Default::default()
        };
        assert!(matches!(filter.validate(), Err(TaskError::Validation(_))));
    }

    #[test]
    fn test_filter_combinations() {
        let all = tasks(
            "## Work\n- [ ] Report #work @ann +urgent\n- [x] Invoice #work\n## Home\n- [ ] Dishes #chores\n    - [/] Soap #chores\n",
        );

        let work = TaskFilter::default().with_section("work");
        let got: Vec<_> = all.iter().filter(|t| work.matches(t, now())).collect();
        assert_eq!(got.len(), 2);

        let open_work = TaskFilter::default()
            .with_tag("#work")
            .with_statuses(vec![TaskStatus::Pending]);
        let got: Vec<_> = all.iter().filter(|t| open_work.matches(t, now())).collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].description, "Report");

        let top = TaskFilter {
            max_level: Some(0),
            text: Some("SOAP".into()),
            ..Default::default()
        };
        assert_eq!(all.iter().filter(|t| top.matches(t, now())).count(), 0);

        let mention = TaskFilter {
            mention: Some("@Ann".into()),
            modifier: Some("urgent".into()),
            ..Default::default()
        };
        assert_eq!(all.iter().filter(|t| mention.matches(t, now())).count(), 1);
    }

    #[test]
    fn test_grace_period_visibility() {
        let all = tasks(
            "- [x] just done _done:2026-02-01T11:55:00.000Z\n- [x] long done _done:2026-01-30\n- [ ] paused _wip:2026-02-01T11:50:00.000Z\n- [>] deferred long ago _wip:2026-01-01\n- [-] cancelled\n",
        );
        let grace = Duration::from_secs(15 * 60);

        let visible: Vec<&str> = all
            .iter()
            .filter(|t| is_active_within(t, now(), grace))
            .map(|t| t.description.as_str())
            .collect();
        assert_eq!(visible, vec!["just done", "paused"]);
    }

    #[test]
    fn test_group_by_quadrant() {
        let all = tasks(
            "- [ ] a +urgent +important\n- [ ] b +important\n- [ ] c +urgent\n- [ ] d\n- [ ] e +important +urgent\n",
        );
        let groups = group_by_quadrant(&all);

        let names = |ts: &[Task]| ts.iter().map(|t| t.description.clone()).collect::<Vec<_>>();
        assert_eq!(names(&groups.q1), vec!["a", "e"]);
        assert_eq!(names(&groups.q2), vec!["b"]);
        assert_eq!(names(&groups.q3), vec!["c"]);
        assert_eq!(names(&groups.q4), vec!["d"]);
    }
}
