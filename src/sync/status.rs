//! Human-readable sync output.
//!
//! These printers back the `sync` subcommands when output goes to a
//! terminal. Machine-readable output serializes the report types directly.

use std::path::Path;

use colored::Colorize;

use crate::model::{ConflictRecord, EntityClass};
use crate::sync::file::{count_lines, file_size};
use crate::sync::orchestrator::{DiffReport, DiffSource, PullReport, PushReport, StatusReport};
use crate::sync::types::{ExportFileInfo, ExportStats, ImportResult};

/// Document files present in a state directory.
#[must_use]
pub fn local_files(state_dir: &Path) -> Vec<ExportFileInfo> {
    EntityClass::ALL
        .into_iter()
        .map(|class| state_dir.join(class.file_name()))
        .filter(|path| path.exists())
        .map(|path| ExportFileInfo {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: file_size(&path),
            line_count: count_lines(&path).unwrap_or(0),
        })
        .collect()
}

/// Print sync status to stdout.
pub fn print_status(status: &StatusReport, files: &[ExportFileInfo]) {
    println!("{}", "Sync Status".bold().underline());
    println!();
    println!("  Environment: {}", status.environment.cyan());
    println!("  Repository:  {}", status.repo_dir);
    println!("  Records:     {}", status.local_records);
    println!();

    match (status.ahead, status.behind) {
        (0, 0) => println!("{}", "Up to date with upstream.".green()),
        (ahead, 0) => println!("{} {ahead} commit(s) to push.", "Ahead:".yellow().bold()),
        (0, behind) => println!("{} {behind} commit(s) to pull.", "Behind:".yellow().bold()),
        (ahead, behind) => println!(
            "{} {ahead} ahead, {behind} behind. Pull before pushing.",
            "Diverged:".red().bold()
        ),
    }

    if status.open_conflicts > 0 {
        println!(
            "{} {} open. Run 'harbor sync conflicts' to review.",
            "Conflicts:".red().bold(),
            status.open_conflicts
        );
    }
    println!();

    if files.is_empty() {
        println!("{}", "No documents in the sync tree.".dimmed());
    } else {
        println!("{}", "Documents:".blue().bold());
        for file in files {
            println!(
                "  {} ({}, {} records)",
                file.name,
                format_size(file.size),
                file.line_count
            );
        }
    }

    if let Some(preview) = &status.import_preview {
        println!();
        println!("{}", "Pull would:".blue().bold());
        print_import_counts(preview);
    }
}

pub fn print_export(stats: &ExportStats, dir: &Path) {
    if stats.is_unchanged() {
        println!("{} ({} records)", "Nothing changed".dimmed(), stats.total());
        return;
    }
    println!("{} {} records to {}", "Exported".green(), stats.total(), dir.display());
    for (class, count) in &stats.classes {
        println!("  {:<12} {count}", class.file_name());
    }
}

pub fn print_push(report: &PushReport) {
    match (&report.commit, report.pushed) {
        (Some(commit), true) => println!(
            "{} {} records ({})",
            "Pushed".green(),
            report.records,
            &commit[..commit.len().min(8)]
        ),
        (None, true) => println!("{} pending commits", "Pushed".green()),
        _ => println!("{}", "Nothing to push.".dimmed()),
    }
}

pub fn print_pull(report: &PullReport) {
    if report.changed_files.is_empty() {
        println!("{}", "Already up to date.".dimmed());
        return;
    }
    print_import_result(&report.import);
}

/// Print an import result with its conflicts, errors and warnings.
pub fn print_import_result(result: &ImportResult) {
    if result.dry_run {
        println!("{}", "Dry run, nothing written.".yellow());
    }
    print_import_counts(result);

    if !result.conflicts.is_empty() {
        println!();
        print_conflicts(&result.conflicts);
    }
    for failure in &result.errors {
        println!(
            "  {} {} {}: {}",
            "error".red(),
            failure.class,
            failure.key,
            failure.message
        );
    }
    for warning in &result.warnings {
        println!("  {} {warning}", "warning".yellow());
    }
}

fn print_import_counts(result: &ImportResult) {
    let totals = result.totals();
    println!(
        "  {} imported, {} unchanged, {} skipped, {} conflicts",
        totals.imported, totals.unchanged, totals.skipped, totals.conflicts
    );
    for (class, stats) in &result.classes {
        if stats.total() > 0 {
            println!(
                "    {:<12} +{} ={} ~{} !{}",
                class.to_string(),
                stats.imported,
                stats.unchanged,
                stats.skipped,
                stats.conflicts
            );
        }
    }
}

pub fn print_conflicts(conflicts: &[ConflictRecord]) {
    if conflicts.is_empty() {
        println!("{}", "No conflicts.".green());
        return;
    }
    println!("{}", "Conflicts:".red().bold());
    for conflict in conflicts {
        let state = match conflict.resolution {
            Some(resolution) => resolution.to_string().dimmed(),
            None => "open".yellow(),
        };
        println!(
            "  {} {} {} [{}] {}",
            conflict.id.cyan(),
            conflict.entity_class,
            conflict.entity_key,
            conflict.differing_fields.join(", "),
            state
        );
    }
}

pub fn print_diff(diff: &DiffReport) {
    let source = match &diff.source {
        DiffSource::Conflict { id } => format!("conflict {id}"),
        DiffSource::Upstream => "upstream".to_string(),
        DiffSource::Missing => "nowhere else".to_string(),
    };
    println!("{} {} (vs {source})", diff.class.to_string().bold(), diff.key);

    if diff.differing_fields.is_empty() {
        println!("{}", "  No differences.".green());
        return;
    }
    let null = serde_json::Value::Null;
    for field in &diff.differing_fields {
        let local = diff.local.as_ref().and_then(|v| v.get(field)).unwrap_or(&null);
        let foreign = diff.foreign.as_ref().and_then(|v| v.get(field)).unwrap_or(&null);
        println!("  {field}:");
        println!("    {} {local}", "-".red());
        println!("    {} {foreign}", "+".green());
    }
}

/// Format a byte size as a human-readable string.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024 + 512 * 1024), "1.5 MB");
    }

    #[test]
    fn test_local_files_lists_class_documents_only() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("ports.jsonl"), "{}\n{}\n").unwrap();
        std::fs::write(temp_dir.path().join("manifest.json"), "{}").unwrap();

        let files = local_files(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "ports.jsonl");
        assert_eq!(files[0].line_count, 2);
    }
}
