// Mutation engine for the task file
//
// Every mutation is a whole-file read-modify-write under the sentinel lock:
//   lock -> read + parse -> edit line array -> backup old content -> atomic write -> prune -> unlock
// Nothing is cached between calls; ids are only valid against the snapshot they came from.

use super::backup::BackupManager;
use super::file::{atomic_write, read_content, read_snapshot};
use super::lock::with_lock;
use super::query::TaskFilter;
use crate::clock::{format_date, format_timestamp, Clock, SystemClock};
use crate::config::{InProgressPolicy, StoreConfig};
use crate::error::{IoContext, Result, TaskError};
use crate::markdown::extract::{extract, is_date_value, is_token_name};
use crate::markdown::{parse_content, render_task};
use crate::model::{
    Modifier, NewTask, Task, TaskDates, TaskPatch, TaskSnapshot, TaskStatus, MAX_LEVEL,
};
use crate::sync::{GitRunner, SyncController};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Result of a delete: the task and every descendant that went with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedTask {
    pub id: String,
    pub removed_ids: Vec<String>,
    /// 1-based line numbers in the pre-delete file, ascending
    pub removed_lines: Vec<usize>,
}

/// Entry point for reading and mutating one task file
pub struct TaskStore {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store with a custom clock (for testing)
    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(self.config.backup_dir(), self.config.backup_retention)
    }

    /// Sync controller for the directory holding this task file
    pub fn sync_controller(&self) -> SyncController {
        let runner = GitRunner::new(self.config.data_dir(), self.config.command_timeout);
        SyncController::with_clock(self.config.clone(), Arc::new(runner), self.clock.clone())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fresh parse of the file
    pub fn snapshot(&self) -> Result<TaskSnapshot> {
        read_snapshot(&self.config.task_file)
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        filter.validate()?;
        let now = self.clock.now_utc();
        Ok(self
            .snapshot()?
            .tasks
            .into_iter()
            .filter(|t| filter.matches(t, now))
            .collect())
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.snapshot()?
            .find(id)
            .cloned()
            .ok_or_else(|| TaskError::not_found(id))
    }

    pub fn list_sections(&self) -> Result<Vec<String>> {
        Ok(self.snapshot()?.sections)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a new task and return it as parsed from its new position.
    ///
    /// Position: after the parent's last descendant; else after the last task of
    /// the section; else right after the section heading; else at end of file
    /// (with a new `## section` heading when a section was named).
    pub fn insert_task(&self, input: NewTask) -> Result<Task> {
        let now = self.clock.now_utc();
        let policy = self.config.in_progress_policy;

        let (snapshot, line_number) = self.mutate("insert", |snap| {
            let mut task = new_task_fields(&input, now)?;
            let mut lines = snap.lines.clone();
            let eol = line_ending(&lines);

            if task.status == TaskStatus::InProgress {
                check_single_in_progress(snap, None, policy)?;
            }

            if let Some(parent_id) = &input.parent_id {
                let parent = snap
                    .find(parent_id)
                    .ok_or_else(|| TaskError::not_found(parent_id))?;
                if parent.level >= MAX_LEVEL {
                    return Err(TaskError::validation(format!(
                        "Cannot nest under {}: it is already at the deepest level ({})",
                        parent_id, MAX_LEVEL
                    )));
                }
                task.level = parent.level + 1;
                let after = snap
                    .descendants_of(parent_id)
                    .iter()
                    .map(|t| t.line_number)
                    .max()
                    .unwrap_or(parent.line_number);
                lines.insert(after, render_task(&task) + eol);
                return Ok((lines, after + 1));
            }

            if let Some(section) = input.section.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                let last_in_section = snap
                    .tasks
                    .iter()
                    .filter(|t| matches!(&t.section, Some(s) if s.eq_ignore_ascii_case(section)))
                    .map(|t| t.line_number)
                    .max();
                if let Some(after) = last_in_section.or_else(|| heading_line(snap, section)) {
                    lines.insert(after, render_task(&task) + eol);
                    return Ok((lines, after + 1));
                }

                let mut at = eof_index(&lines);
                if at > 0 && !lines[at - 1].trim().is_empty() {
                    lines.insert(at, eol.to_string());
                    at += 1;
                }
                lines.insert(at, format!("## {}{}", section, eol));
                lines.insert(at + 1, render_task(&task) + eol);
                return Ok((lines, at + 2));
            }

            let at = eof_index(&lines);
            lines.insert(at, render_task(&task) + eol);
            Ok((lines, at + 1))
        })?;

        let task = snapshot
            .find_at_line(line_number)
            .cloned()
            .ok_or_else(|| TaskError::not_found(format!("L{}", line_number)))?;
        log::info!("Inserted task {} ({})", task.id, task.description);
        Ok(task)
    }

    /// Merge `patch` into the task and rewrite only its line
    pub fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let now = self.clock.now_utc();
        let policy = self.config.in_progress_policy;

        let (snapshot, line_number) = self.mutate("update", |snap| {
            let current = snap.find(id).ok_or_else(|| TaskError::not_found(id))?;
            let mut task = current.clone();
            apply_patch(&mut task, &patch)?;

            let old = current.status;
            let new = task.status;

            if new == TaskStatus::Completed && old != TaskStatus::Completed {
                let open: Vec<String> = snap
                    .children_of(id)
                    .into_iter()
                    .filter(|c| !c.status.is_closed())
                    .map(|c| format!("{} ({})", c.id, c.description))
                    .collect();
                if !open.is_empty() {
                    return Err(TaskError::validation(format!(
                        "Cannot complete {}: {} child task(s) still open: {}",
                        id,
                        open.len(),
                        open.join(", ")
                    )));
                }
                if patch.done.is_none() {
                    task.dates.done = Some(format_timestamp(now));
                }
            }

            if old == TaskStatus::Completed && new != TaskStatus::Completed && patch.done.is_none() {
                task.dates.done = None;
            }

            if old == TaskStatus::InProgress && new != TaskStatus::InProgress {
                task.dates.wip = Some(format_timestamp(now));
            }

            if new == TaskStatus::InProgress && old != TaskStatus::InProgress {
                check_single_in_progress(snap, Some(id), policy)?;
            }

            let mut lines = snap.lines.clone();
            let eol = if current.raw_line.ends_with('\r') { "\r" } else { "" };
            lines[current.line_number - 1] = render_task(&task) + eol;
            Ok((lines, current.line_number))
        })?;

        let task = snapshot
            .find_at_line(line_number)
            .cloned()
            .ok_or_else(|| TaskError::not_found(id))?;
        log::info!("Updated task {} -> {} ({})", id, task.id, task.status);
        Ok(task)
    }

    /// Remove the task and all of its descendants, and nothing else
    pub fn delete_task(&self, id: &str) -> Result<DeletedTask> {
        let (_, deleted) = self.mutate("delete", |snap| {
            let task = snap.find(id).ok_or_else(|| TaskError::not_found(id))?;

            let mut removed: Vec<&Task> = vec![task];
            removed.extend(snap.descendants_of(id));
            removed.sort_by_key(|t| t.line_number);

            let mut lines = snap.lines.clone();
            // Descending so earlier indices stay valid
            for t in removed.iter().rev() {
                lines.remove(t.line_number - 1);
            }

            Ok((
                lines,
                DeletedTask {
                    id: id.to_string(),
                    removed_ids: removed.iter().map(|t| t.id.clone()).collect(),
                    removed_lines: removed.iter().map(|t| t.line_number).collect(),
                },
            ))
        })?;

        log::info!(
            "Deleted task {} and {} descendant(s)",
            id,
            deleted.removed_ids.len() - 1
        );
        Ok(deleted)
    }

    /// Replace the task file with a backup's content. The current content is
    /// itself backed up first, so a restore can be undone the same way.
    pub fn restore_backup(&self, backup: &Path) -> Result<TaskSnapshot> {
        let content = std::fs::read_to_string(backup).at_path(backup)?;
        let (snapshot, ()) = self.mutate("restore", |_| {
            Ok((content.split('\n').map(str::to_string).collect(), ()))
        })?;
        log::info!("Restored {} from {}", self.config.task_file.display(), backup.display());
        Ok(snapshot)
    }

    /// Lock, read, apply `edit`, back up, write, prune, unlock.
    /// Returns the snapshot of the written content.
    fn mutate<T>(
        &self,
        action: &str,
        edit: impl FnOnce(&TaskSnapshot) -> Result<(Vec<String>, T)>,
    ) -> Result<(TaskSnapshot, T)> {
        let path = &self.config.task_file;

        with_lock(&self.config.lock_file(), &self.config.lock, || {
            let before = parse_content(&read_content(path)?);
            let (lines, value) = edit(&before)?;
            let content = lines.join("\n");

            if content == before.raw_content {
                log::debug!("{}: no change to {}", action, path.display());
                return Ok((before, value));
            }

            let backups = self.backups();
            if !before.raw_content.is_empty() {
                backups.write(&before.raw_content, self.clock.now_utc())?;
            }
            atomic_write(path, &content)?;
            if let Err(e) = backups.prune() {
                log::warn!("Backup pruning failed after {}: {}", action, e);
            }

            Ok((parse_content(&content), value))
        })
    }
}

/// Index at which to insert so the new line lands before a trailing newline
/// `"\r"` for a CRLF file, so new and edited lines keep its convention
fn line_ending(lines: &[String]) -> &'static str {
    if lines.iter().any(|line| line.ends_with('\r')) {
        "\r"
    } else {
        ""
    }
}

fn eof_index(lines: &[String]) -> usize {
    match lines.last() {
        Some(last) if last.is_empty() => lines.len() - 1,
        _ => lines.len(),
    }
}

/// 1-based line of the first `##`/`###` heading named `section`
fn heading_line(snap: &TaskSnapshot, section: &str) -> Option<usize> {
    snap.lines
        .iter()
        .position(|line| {
            crate::markdown::parse::section_heading(line)
                .map(|name| name.eq_ignore_ascii_case(section))
                .unwrap_or(false)
        })
        .map(|idx| idx + 1)
}

fn check_single_in_progress(
    snap: &TaskSnapshot,
    except: Option<&str>,
    policy: InProgressPolicy,
) -> Result<()> {
    if policy != InProgressPolicy::Single {
        return Ok(());
    }
    if let Some(other) = snap
        .tasks
        .iter()
        .find(|t| t.status == TaskStatus::InProgress && Some(t.id.as_str()) != except)
    {
        return Err(TaskError::validation(format!(
            "Another task is already in progress: {} ({})",
            other.id, other.description
        )));
    }
    Ok(())
}

/// Task fields for an insert; position-dependent fields are filled in by the caller
fn new_task_fields(input: &NewTask, now: DateTime<Utc>) -> Result<Task> {
    let mut task = Task {
        id: String::new(),
        line_number: 0,
        raw_line: String::new(),
        description: String::new(),
        checkbox: ' ',
        status: input.status.unwrap_or(TaskStatus::Pending),
        level: 0,
        parent_id: None,
        children: Vec::new(),
        tags: Vec::new(),
        mentions: Vec::new(),
        modifiers: Vec::new(),
        dates: TaskDates::default(),
        time_spent: None,
        is_urgent: false,
        is_important: false,
        section: None,
    };

    let patch = TaskPatch {
        description: Some(input.description.clone()),
        status: None,
        tags: Some(input.tags.clone()),
        mentions: Some(input.mentions.clone()),
        modifiers: Some(input.modifiers.clone()),
        due: input.due.clone(),
        done: None,
        created: input.created.clone(),
        time_spent: input.time_spent,
    };
    apply_patch(&mut task, &patch)?;

    if task.description.is_empty() {
        return Err(TaskError::validation("Task description must not be empty"));
    }
    if task.dates.created.is_none() {
        task.dates.created = Some(format_date(now));
    }
    if task.status == TaskStatus::Completed && task.dates.done.is_none() {
        task.dates.done = Some(format_timestamp(now));
    }
    Ok(task)
}

/// Merge patch fields into `task`. Tokens typed inside a new description are
/// lifted into the metadata fields.
fn apply_patch(task: &mut Task, patch: &TaskPatch) -> Result<()> {
    if let Some(status) = patch.status {
        task.status = status;
        task.checkbox = status.checkbox();
    }
    if let Some(tags) = &patch.tags {
        task.tags = normalize_names(tags, '#', "tag")?;
    }
    if let Some(mentions) = &patch.mentions {
        task.mentions = normalize_names(mentions, '@', "mention")?;
    }
    if let Some(modifiers) = &patch.modifiers {
        task.modifiers = normalize_modifiers(modifiers)?;
    }

    if let Some(description) = &patch.description {
        if description.contains('\n') || description.contains('\r') {
            return Err(TaskError::validation("Task description must be a single line"));
        }
        let ex = extract(description);
        task.description = ex.description;
        for tag in ex.tags {
            if !task.tags.contains(&tag) {
                task.tags.push(tag);
            }
        }
        for mention in ex.mentions {
            if !task.mentions.contains(&mention) {
                task.mentions.push(mention);
            }
        }
        for modifier in ex.modifiers {
            if !task.modifiers.iter().any(|m| m.name == modifier.name) {
                task.modifiers.push(modifier);
            }
        }
        task.dates.due = task.dates.due.take().or(ex.dates.due);
        task.dates.done = task.dates.done.take().or(ex.dates.done);
        task.dates.created = task.dates.created.take().or(ex.dates.created);
        task.dates.wip = task.dates.wip.take().or(ex.dates.wip);
        task.time_spent = task.time_spent.or(ex.time_spent);
    }

    set_date(&mut task.dates.due, &patch.due, "due")?;
    set_date(&mut task.dates.done, &patch.done, "done")?;
    set_date(&mut task.dates.created, &patch.created, "created")?;
    if let Some(minutes) = patch.time_spent {
        task.time_spent = Some(minutes);
    }

    task.is_urgent = task.modifiers.iter().any(|m| m.name == "urgent");
    task.is_important = task.modifiers.iter().any(|m| m.name == "important");
    Ok(())
}

fn set_date(slot: &mut Option<String>, value: &Option<String>, key: &str) -> Result<()> {
    match value.as_deref().map(str::trim) {
        None => {}
        Some("") => *slot = None,
        Some(v) if is_date_value(v) => *slot = Some(v.to_string()),
        Some(v) => {
            return Err(TaskError::validation(format!(
                "Invalid {} date '{}': expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS.sssZ",
                key, v
            )))
        }
    }
    Ok(())
}

fn normalize_names(names: &[String], sigil: char, kind: &str) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for raw in names {
        let name = raw.trim().trim_start_matches(sigil);
        if !is_token_name(name) {
            return Err(TaskError::validation(format!("Invalid {}: '{}'", kind, raw)));
        }
        let name = name.to_lowercase();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    Ok(out)
}

fn normalize_modifiers(modifiers: &[Modifier]) -> Result<Vec<Modifier>> {
    let mut out: Vec<Modifier> = Vec::new();
    for m in modifiers {
        let valid_value = m
            .value
            .as_deref()
            .map(|v| !v.is_empty() && !v.chars().any(char::is_whitespace))
            .unwrap_or(true);
        if !is_token_name(&m.name) || m.name.contains('/') || !valid_value {
            return Err(TaskError::validation(format!("Invalid modifier: '{}'", m)));
        }
        let name = m.name.to_lowercase();
        if !out.iter().any(|o| o.name == name) {
            out.push(Modifier {
                name,
                value: m.value.clone(),
            });
        }
    }
    Ok(out)
}
