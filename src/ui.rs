use std::io::{self, IsTerminal};

use crate::config::ResolvedConfig;
use crate::db::RunRecord;
use crate::imports::{ImportAction, ImportReport};
use crate::report::FailedItem;
use crate::sync::SyncReport;

pub fn print_sync_report(report: &SyncReport) {
    for line in sync_report_lines(report, &Palette::auto()) {
        println!("{line}");
    }
}

pub fn print_import_report(report: &ImportReport) {
    for line in import_report_lines(report, &Palette::auto()) {
        println!("{line}");
    }
}

pub fn print_config(config: &ResolvedConfig) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Configuration"));
    println!("  config      {}", config.config_path.display());
    println!(
        "  zotero dir  {}",
        display_or_unset(config.zotero_dir.as_deref(), &palette)
    );
    println!(
        "  vault       {}",
        display_or_unset(config.vault_path.as_deref(), &palette)
    );
    println!("  busy wait   {} ms", config.busy_timeout_ms);
}

pub fn print_runs(runs: &[RunRecord]) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Recent runs"));
    if runs.is_empty() {
        println!("{}", palette.dim("no runs recorded yet"));
        return;
    }
    for run in runs {
        println!(
            "{} {:<10} {} {}",
            palette.dim(&run.finished_at),
            run.direction,
            palette.status(&run.status),
            run_counts(run)
        );
    }
}

fn sync_report_lines(report: &SyncReport, palette: &Palette) -> Vec<String> {
    let mut lines = vec![palette.heading(if report.dry_run {
        "Sync preview (dry run)"
    } else {
        "Sync"
    })];
    for change in &report.changes {
        lines.push(format!(
            "  {} {}",
            palette.change(change.change.as_str()),
            change.key
        ));
    }
    for orphan in &report.orphans {
        lines.push(format!(
            "  {} {}",
            palette.warn("orphan"),
            palette.dim(&format!("{orphan} has no matching record; left in place"))
        ));
    }
    push_failures(&mut lines, &report.failures, palette);
    lines.push(palette.dim(&format!(
        "created={} updated={} unchanged={} failed={} views_changed={}",
        report.created, report.updated, report.unchanged, report.failed, report.views_changed
    )));
    if report.cancelled {
        lines.push(palette.warn("cancelled before every record was processed"));
    }
    lines
}

fn import_report_lines(report: &ImportReport, palette: &Palette) -> Vec<String> {
    let mut lines = vec![palette.heading(if report.dry_run {
        "Note import preview (dry run)"
    } else {
        "Note import"
    })];
    for action in &report.actions {
        if matches!(action.action, ImportAction::SkipUnchanged | ImportAction::Failed) {
            continue;
        }
        let target = match &action.document {
            Some(document) => format!("{}/{}", action.record_key, document),
            None => action.record_key.clone(),
        };
        lines.push(format!("  {} {}", palette.change(action.action.as_str()), target));
    }
    push_failures(&mut lines, &report.failures, palette);
    lines.push(palette.dim(&format!(
        "imported={} unchanged={} modified={} empty={} not_found={} failed={}",
        report.imported,
        report.skipped_unchanged,
        report.skipped_modified,
        report.skipped_empty,
        report.skipped_not_found,
        report.failed
    )));
    if report.skipped_modified > 0 {
        lines.push(palette.dim("rerun with --overwrite to import modified documents"));
    }
    if report.cancelled {
        lines.push(palette.warn("cancelled before every document was processed"));
    }
    lines
}

fn push_failures(lines: &mut Vec<String>, failures: &[FailedItem], palette: &Palette) {
    for failure in failures {
        lines.push(format!(
            "  {} {} {}",
            palette.error(failure.category.as_str()),
            failure.item,
            palette.dim(&failure.reason)
        ));
    }
}

fn run_counts(run: &RunRecord) -> String {
    let keys: &[&str] = if run.direction == "sync" {
        &["created", "updated", "unchanged", "failed"]
    } else {
        &["imported", "skipped_unchanged", "skipped_modified", "failed"]
    };
    keys.iter()
        .filter_map(|key| run.summary.get(*key).map(|value| format!("{key}={value}")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_or_unset(path: Option<&std::path::Path>, palette: &Palette) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => palette.dim("(not set)"),
    }
}

struct Palette {
    enabled: bool,
}

impl Palette {
    fn auto() -> Self {
        let enabled = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal();
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn heading(&self, text: &str) -> String {
        self.paint("1;36", text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    fn warn(&self, text: &str) -> String {
        self.paint("33", text)
    }

    fn error(&self, text: &str) -> String {
        self.paint("1;31", &format!("[{}]", text.to_ascii_uppercase()))
    }

    fn change(&self, kind: &str) -> String {
        self.paint(change_color_code(kind), &format!("{kind:<18}"))
    }

    fn status(&self, status: &str) -> String {
        let code = match status {
            "completed" => "32",
            "partial" => "33",
            _ => "31",
        };
        self.paint(code, &format!("[{}]", status.to_ascii_uppercase()))
    }
}

fn change_color_code(kind: &str) -> &'static str {
    match kind {
        "created" | "import" => "32",
        "metadata-updated" | "attachment-updated" | "reimport" => "36",
        "skip-modified" | "skip-not-found" => "33",
        _ => "37",
    }
}
