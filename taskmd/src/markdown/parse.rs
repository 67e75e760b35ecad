// Line parser: task lines and section headings
//
// Task line:    <spaces>- [<state>] <text>
// Section line: ## Name  |  ### Name

use super::extract::extract;
use super::tree::build_tree;
use crate::model::{Task, TaskSnapshot, TaskStatus, INDENT_WIDTH, MAX_LEVEL};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Captures: (indent)(state)(text)
static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^( *)- \[([ /x\->?])\](?: (.*))?$").unwrap());

/// Captures: (hashes)(title)
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*$").unwrap());

/// A parsed markdown heading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeading {
    pub level: usize,
    pub text: String,
}

/// Parse a single line as a heading
pub fn parse_heading_line(line: &str) -> Option<ParsedHeading> {
    let caps = HEADING_RE.captures(line.trim_end_matches('\r'))?;
    let text = caps[2].to_string();
    if text.is_empty() {
        return None;
    }
    Some(ParsedHeading {
        level: caps[1].len(),
        text,
    })
}

/// Name of a section heading (`##` or `###`), if the line is one
pub fn section_heading(line: &str) -> Option<String> {
    parse_heading_line(line)
        .filter(|h| h.level == 2 || h.level == 3)
        .map(|h| h.text)
}

/// `L{line}_{first 8 hex chars of sha256(raw_line)}`
pub fn task_id(line_number: usize, raw_line: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_line.as_bytes());
    let hash = hasher.finalize();
    format!("L{}_{}", line_number, hex::encode(&hash[..4]))
}

/// Parse one line into a Task. `None` for anything that is not a task line,
/// including lines nested deeper than level 3.
///
/// `parent_id` and `children` are left empty; [`build_tree`] fills them in.
pub fn parse_line(line: &str, line_number: usize, section: Option<&str>) -> Option<Task> {
    let caps = TASK_RE.captures(line.trim_end_matches('\r'))?;

    let indent = caps[1].len();
    let level = indent / INDENT_WIDTH;
    if level > MAX_LEVEL as usize {
        return None;
    }

    let checkbox = caps[2].chars().next()?;
    let status = TaskStatus::from_checkbox(checkbox)?;
    let text = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    let ex = extract(text);

    let is_urgent = ex.modifiers.iter().any(|m| m.name == "urgent");
    let is_important = ex.modifiers.iter().any(|m| m.name == "important");

    Some(Task {
        id: task_id(line_number, line),
        line_number,
        raw_line: line.to_string(),
        description: ex.description,
        checkbox,
        status,
        level: level as u8,
        parent_id: None,
        children: Vec::new(),
        tags: ex.tags,
        mentions: ex.mentions,
        modifiers: ex.modifiers,
        dates: ex.dates,
        time_spent: ex.time_spent,
        is_urgent,
        is_important,
        section: section.map(str::to_string),
    })
}

/// Parse whole file content into a snapshot
pub fn parse_content(content: &str) -> TaskSnapshot {
    let lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let mut tasks = Vec::new();
    let mut sections: Vec<String> = Vec::new();
    let mut current_section: Option<String> = None;

    for (idx, line) in lines.iter().enumerate() {
        if let Some(heading) = parse_heading_line(line) {
            match heading.level {
                1 => current_section = None,
                2 | 3 => {
                    if !sections.contains(&heading.text) {
                        sections.push(heading.text.clone());
                    }
                    current_section = Some(heading.text);
                }
                _ => {}
            }
            continue;
        }

        if let Some(task) = parse_line(line, idx + 1, current_section.as_deref()) {
            tasks.push(task);
        }
    }

    build_tree(&mut tasks);

    TaskSnapshot {
        tasks,
        sections,
        raw_content: content.to_string(),
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_task() {
        let task = parse_line("- [ ] Write report #work _due:2026-02-01", 1, None).unwrap();

        assert_eq!(task.description, "Write report");
        assert_eq!(task.tags, vec!["work"]);
        assert_eq!(task.dates.due.as_deref(), Some("2026-02-01"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.level, 0);
        assert!(task.id.starts_with("L1_"));
        assert_eq!(task.id.len(), "L1_".len() + 8);
    }

    #[test]
    fn test_all_states_parse() {
        for status in TaskStatus::ALL {
            let line = format!("- [{}] Thing", status.checkbox());
            let task = parse_line(&line, 3, None).unwrap();
            assert_eq!(task.status, status);
            assert_eq!(task.checkbox, status.checkbox());
        }
    }

    #[test]
    fn test_rejects_non_task_lines() {
        assert!(parse_line("- [X] Uppercase is not a state", 1, None).is_none());
        assert!(parse_line("* [ ] Asterisk bullet", 1, None).is_none());
        assert!(parse_line("[ ] Bare checkbox", 1, None).is_none());
        assert!(parse_line("\t- [ ] Tab indent", 1, None).is_none());
        assert!(parse_line("Just prose", 1, None).is_none());
        assert!(parse_line("- [ ]No space", 1, None).is_none());
    }

    #[test]
    fn test_empty_task_text() {
        let task = parse_line("- [ ]", 1, None).unwrap();
        assert_eq!(task.description, "");
    }

    #[test]
    fn test_levels_from_indentation() {
        assert_eq!(parse_line("    - [ ] a", 1, None).unwrap().level, 1);
        assert_eq!(parse_line("        - [ ] a", 1, None).unwrap().level, 2);
        assert_eq!(parse_line("            - [ ] a", 1, None).unwrap().level, 3);
        // partial indentation rounds down
        assert_eq!(parse_line("      - [ ] a", 1, None).unwrap().level, 1);
    }

    #[test]
    fn test_level_above_three_is_not_a_task() {
        assert!(parse_line("                - [ ] too deep", 1, None).is_none());
    }

    #[test]
    fn test_urgent_important_flags() {
        let task = parse_line("- [ ] Pay rent +urgent +Important", 1, None).unwrap();
        assert!(task.is_urgent);
        assert!(task.is_important);
    }

    #[test]
    fn test_id_depends_on_line_and_content() {
        let a = task_id(1, "- [ ] a");
        assert_eq!(a, task_id(1, "- [ ] a"));
        assert_ne!(a, task_id(2, "- [ ] a"));
        assert_ne!(a, task_id(1, "- [ ] b"));
    }

    #[test]
    fn test_sections_tracked() {
        let content = "# Title\n- [ ] no section\n## Work\n- [ ] a\n### Deep\n- [ ] b\n#### Note\n- [ ] c\n# Other\n- [ ] d\n## Home\n- [ ] e\n";
        let snap = parse_content(content);

        let sections: Vec<Option<&str>> =
            snap.tasks.iter().map(|t| t.section.as_deref()).collect();
        assert_eq!(
            sections,
            vec![None, Some("Work"), Some("Deep"), Some("Deep"), None, Some("Home")]
        );
        assert_eq!(snap.sections, vec!["Work", "Deep", "Home"]);
    }

    #[test]
    fn test_lines_reproduce_content() {
        let content = "## A\n\n- [ ] one\nprose\n";
        let snap = parse_content(content);
        assert_eq!(snap.lines.join("\n"), content);
        assert_eq!(snap.tasks.len(), 1);
        assert_eq!(snap.tasks[0].line_number, 3);
    }

    #[test]
    fn test_crlf_line() {
        let task = parse_line("- [x] Windows line\r", 1, None).unwrap();
        assert_eq!(task.description, "Windows line");
        assert_eq!(task.status, TaskStatus::Completed);
    }
}
