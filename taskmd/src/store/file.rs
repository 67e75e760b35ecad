// Whole-file reads and atomic writes of the task file

use crate::error::{IoContext, Result};
use crate::markdown::parse_content;
use crate::model::TaskSnapshot;
use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

/// Read the file's content. A missing file reads as empty.
pub fn read_content(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).at_path(path),
    }
}

/// Read and parse the task file
pub fn read_snapshot(path: &Path) -> Result<TaskSnapshot> {
    Ok(parse_content(&read_content(path)?))
}

/// Atomically save data to a file using write-to-temp + fsync + rename.
///
/// Readers see either the old or the new content, never a partial write.
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    fs::create_dir_all(&parent).at_path(&parent)?;

    // Temp file in the same directory so the rename stays on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    let write_temp = || -> io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()
    };
    if let Err(e) = write_temp() {
        let _ = fs::remove_file(&temp_path);
        return Err(e).at_path(&temp_path);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).at_path(path);
    }

    Ok(())
}
