// Parent/child hierarchy from indentation levels

use crate::model::Task;

/// Link tasks into a tree using a stack of open ancestors.
///
/// For each task, ancestors whose level is >= its own are closed; whatever
/// remains on top of the stack is the parent. Handles jumps in indentation
/// (level 0 followed directly by level 2) without lookahead.
///
/// # Panics
/// Tasks must be in strictly ascending line order. Any other order would
/// silently produce a wrong tree, so it is rejected outright.
pub fn build_tree(tasks: &mut [Task]) {
    assert!(
        tasks
            .windows(2)
            .all(|pair| pair[0].line_number < pair[1].line_number),
        "build_tree requires tasks in ascending line order"
    );

    for task in tasks.iter_mut() {
        task.parent_id = None;
        task.children.clear();
    }

    let mut stack: Vec<usize> = Vec::new();
    for idx in 0..tasks.len() {
        let level = tasks[idx].level;
        while let Some(&top) = stack.last() {
            if tasks[top].level >= level {
                stack.pop();
            } else {
                break;
            }
        }

        if let Some(&parent) = stack.last() {
            let child_id = tasks[idx].id.clone();
            tasks[idx].parent_id = Some(tasks[parent].id.clone());
            tasks[parent].children.push(child_id);
        }

        stack.push(idx);
    }
}
