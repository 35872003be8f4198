//! Atomic file operations for sync.
//!
//! This module provides safe file operations that prevent data corruption:
//! - Atomic writes: write to temp file, sync to disk, then rename
//! - Strict and lenient JSONL readers
//! - Manifest and `.gitignore` handling for the state directory

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::sync::types::{Manifest, SyncError, SyncRecord, SyncResult};

/// Name of the snapshot metadata file inside the state directory.
pub const MANIFEST_FILE: &str = "manifest.json";

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write content to a file atomically.
///
/// This function:
/// 1. Writes content to a temporary sibling (`<name>.tmp`)
/// 2. Calls `fsync` to ensure data is on disk
/// 3. Atomically renames the temp file to the target path
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> SyncResult<()> {
    let temp_path = temp_path_for(path);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes())?;
        writer.flush()?;
        // Sync to disk before rename
        writer.get_ref().sync_all()?;
    }

    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Render records as JSONL text, one record per line.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized.
pub fn render_jsonl(records: &[SyncRecord]) -> SyncResult<String> {
    let mut content = String::new();
    for record in records {
        let line = serde_json::to_string(record)?;
        content.push_str(&line);
        content.push('\n');
    }
    Ok(content)
}

/// Read all sync records from a JSONL file.
///
/// A missing file reads as empty. Invalid lines fail the whole read with
/// the line number.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line does not parse.
pub fn read_jsonl(path: &Path) -> SyncResult<Vec<SyncRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let record: SyncRecord =
            serde_json::from_str(&line).map_err(|e| SyncError::InvalidRecord {
                line: line_num + 1,
                message: e.to_string(),
            })?;
        records.push(record);
    }

    Ok(records)
}

/// Parse JSONL text, keeping going past bad lines.
///
/// Each entry is either a record or the `InvalidRecord` error for its line.
#[must_use]
pub fn parse_jsonl(content: &str) -> Vec<SyncResult<SyncRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(line_num, line)| {
            serde_json::from_str(line).map_err(|e| SyncError::InvalidRecord {
                line: line_num + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Count the number of non-empty lines in a JSONL file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn count_lines(path: &Path) -> SyncResult<usize> {
    if !path.exists() {
        return Ok(0);
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let count = reader
        .lines()
        .map_while(std::result::Result::ok)
        .filter(|l| !l.trim().is_empty())
        .count();
    Ok(count)
}

/// Get the size of a file in bytes.
///
/// Returns 0 if the file doesn't exist.
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read `manifest.json` from a state directory, if present.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_manifest(dir: &Path) -> SyncResult<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Write `manifest.json` atomically.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> SyncResult<()> {
    let mut content = serde_json::to_string_pretty(manifest)?;
    content.push('\n');
    atomic_write(&dir.join(MANIFEST_FILE), &content)
}

/// Generate .gitignore content for the state directory.
///
/// Uses a whitelist pattern: ignore everything by default, then explicitly
/// include only the documents that should be tracked in git.
#[must_use]
pub fn gitignore_content() -> &'static str {
    r#"# Harbor state directory
# Whitelist pattern: ignore everything except the synchronized documents

# Ignore everything by default
*

# Allow .gitignore itself
!.gitignore

# Allow the documents and their manifest
!*.jsonl
!manifest.json
"#
}

/// Ensure .gitignore exists in the state directory.
///
/// If the file already exists, it is not modified (user may have customized it).
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn ensure_gitignore(state_dir: &Path) -> SyncResult<()> {
    let gitignore_path = state_dir.join(".gitignore");

    if gitignore_path.exists() {
        return Ok(());
    }

    fs::create_dir_all(state_dir)?;

    let mut file = File::create(&gitignore_path)?;
    file.write_all(gitignore_content().as_bytes())?;
    file.sync_all()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityClass, Port};
    use crate::sync::types::Record;
    use tempfile::TempDir;

    fn port_record(id: &str) -> SyncRecord {
        SyncRecord::Port(Record::new(Port::new(id, "Test port")).unwrap())
    }

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("test.jsonl");

        atomic_write(&path, "line 1\nline 2\n").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "line 1\nline 2\n");
        assert!(!temp_dir.path().join("nested").join("test.jsonl.tmp").exists());
    }

    #[test]
    fn test_write_then_read_jsonl() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ports.jsonl");

        let content = render_jsonl(&[port_record("port_1"), port_record("port_2")]).unwrap();
        atomic_write(&path, &content).unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].key(), "port_2");
        assert_eq!(count_lines(&path).unwrap(), 2);
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let records = read_jsonl(Path::new("/nonexistent/ports.jsonl")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_read_jsonl_reports_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ports.jsonl");
        let good = render_jsonl(&[port_record("port_1")]).unwrap();
        fs::write(&path, format!("{good}\n{{broken\n")).unwrap();

        let result = read_jsonl(&path);
        assert!(matches!(result, Err(SyncError::InvalidRecord { line: 3, .. })));
    }

    #[test]
    fn test_parse_jsonl_is_lenient() {
        let good = render_jsonl(&[port_record("port_1")]).unwrap();
        let parsed = parse_jsonl(&format!("{{broken\n{good}"));
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_err());
        assert_eq!(parsed[1].as_ref().unwrap().class(), EntityClass::Port);
    }

    #[test]
    fn test_gitignore_content() {
        let content = gitignore_content();

        assert!(content.contains('*'), "Should ignore everything by default");
        assert!(content.contains("!*.jsonl"), "Should whitelist JSONL files");
        assert!(content.contains("!manifest.json"), "Should whitelist the manifest");
        assert!(content.contains("!.gitignore"), "Should whitelist itself");
    }

    #[test]
    fn test_ensure_gitignore_does_not_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let gitignore_path = temp_dir.path().join(".gitignore");

        fs::write(&gitignore_path, "# Custom content\n*.tmp\n").unwrap();
        ensure_gitignore(temp_dir.path()).unwrap();

        let content = fs::read_to_string(&gitignore_path).unwrap();
        assert!(content.contains("Custom content"));
        assert!(!content.contains("!*.jsonl"));
    }

    #[test]
    fn test_manifest_missing_is_none() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_manifest(temp_dir.path()).unwrap().is_none());
    }
}
