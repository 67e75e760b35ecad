// Pure text <-> model pipeline for the task file
// Nothing in here touches the filesystem.

pub mod extract;
pub mod parse;
pub mod render;
pub mod tree;

pub use parse::{parse_content, parse_line};
pub use render::render_task;
