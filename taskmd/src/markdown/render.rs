// Serializer: Task fields back into one canonical task line
//
// Field order is fixed so lines stay grep-friendly and diffs stay small:
//   {indent}- [{state}] {description} {#tags} {@mentions} {+modifiers} {_due} {_done} {_created} {_wip} {_spent}

use crate::model::{Task, INDENT_WIDTH};

/// Render a task as a single line (no trailing newline)
pub fn render_task(task: &Task) -> String {
    let mut line = format!(
        "{}- [{}]",
        " ".repeat(task.level as usize * INDENT_WIDTH),
        task.status.checkbox()
    );

    let mut push = |part: String| {
        if !part.is_empty() {
            line.push(' ');
            line.push_str(&part);
        }
    };

    push(task.description.clone());
    for tag in &task.tags {
        push(format!("#{}", tag));
    }
    for mention in &task.mentions {
        push(format!("@{}", mention));
    }
    for modifier in &task.modifiers {
        push(modifier.to_string());
    }

    let dates = [
        ("due", &task.dates.due),
        ("done", &task.dates.done),
        ("created", &task.dates.created),
        ("wip", &task.dates.wip),
    ];
    for (key, value) in dates {
        if let Some(value) = value {
            push(format!("_{}:{}", key, value));
        }
    }

    if let Some(minutes) = task.time_spent {
        push(format!("_spent:{}", minutes));
    }

    line
}
