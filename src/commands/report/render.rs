use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Settings;
use crate::model::{LoadedRecord, MonthlySummary, UpdateStatus};
use crate::pdf::{Cell, Color, Flow, Font, Table};
use crate::util::{file_name_safe, write_atomic};

const MAX_PACKAGE_ROWS: usize = 30;
const MAX_RAW_LINES: usize = 80;

const SUCCESS_COLOR: Color = Color::hex(0x27ae60);
const ERROR_COLOR: Color = Color::hex(0xc0392b);
const UNKNOWN_COLOR: Color = Color::hex(0xe67e22);
const HEADING_COLOR: Color = Color::hex(0x2c3e50);
const MUTED_COLOR: Color = Color::hex(0x7f8c8d);
const LABEL_BACKGROUND: Color = Color::hex(0xecf0f1);
const HEADER_BACKGROUND: Color = Color::hex(0x34495e);
const CODE_BACKGROUND: Color = Color::hex(0xf4f6f7);
const ERROR_BACKGROUND: Color = Color::hex(0xfdedec);

const NOT_AVAILABLE: &str = "N/A";

pub fn report_file_name(summary: &MonthlySummary, server: &str) -> String {
    format!(
        "security_monthly_{}_{}.pdf",
        summary.period.compact(),
        file_name_safe(server)
    )
}

pub fn render(summary: &MonthlySummary, settings: &Settings) -> Result<PathBuf> {
    let path = settings
        .report_dir
        .join(report_file_name(summary, &settings.server_name));

    let bytes = render_bytes(summary, settings);
    write_atomic(&path, &bytes)
        .with_context(|| format!("failed to write report {}", path.display()))?;

    info!(
        path = %path.display(),
        bytes = bytes.len(),
        records = summary.total_runs,
        "rendered monthly report"
    );
    Ok(path)
}

pub fn render_bytes(summary: &MonthlySummary, settings: &Settings) -> Vec<u8> {
    let title = format!(
        "Monthly Security Report - {} - {}",
        settings.server_name,
        summary.period.label()
    );
    let mut flow = Flow::new(&title);

    cover(&mut flow, summary, settings);

    if summary.is_empty() {
        flow.spacer(18.0);
        flow.paragraph("Update Runs", Font::HelveticaBold, 14.0, HEADING_COLOR);
        flow.spacer(4.0);
        flow.paragraph(
            "No update runs were recorded for this period.",
            Font::HelveticaOblique,
            10.0,
            MUTED_COLOR,
        );
    }

    for (index, entry) in summary.records.iter().enumerate() {
        record_section(&mut flow, index + 1, entry);
    }

    flow.spacer(18.0);
    flow.rule(MUTED_COLOR);
    flow.centered(
        "Auto-generated by security-updater",
        Font::HelveticaOblique,
        8.0,
        MUTED_COLOR,
    );

    flow.finish()
}

fn cover(flow: &mut Flow, summary: &MonthlySummary, settings: &Settings) {
    flow.centered("Monthly Security Report", Font::HelveticaBold, 20.0, HEADING_COLOR);
    flow.spacer(2.0);
    flow.centered(&settings.server_name, Font::Helvetica, 12.0, MUTED_COLOR);
    flow.spacer(14.0);

    let rows = [
        ("Server", settings.server_name.clone()),
        ("Environment", settings.environment.clone()),
        ("Period", summary.period.label()),
        ("Total runs", summary.total_runs.to_string()),
        ("Successful", summary.success_count.to_string()),
        ("Errors", summary.error_count.to_string()),
        ("Unknown", summary.unknown_count.to_string()),
    ];
    flow.table(&label_table(&rows));
}

fn record_section(flow: &mut Flow, number: usize, entry: &LoadedRecord) {
    let record = &entry.record;

    flow.spacer(20.0);
    flow.ensure_space(90.0);
    flow.paragraph(
        &format!("Update #{number} \u{b7} {}", entry.file_name),
        Font::HelveticaBold,
        13.0,
        HEADING_COLOR,
    );
    flow.spacer(4.0);
    flow.banner(record.status.as_str(), 11.0, status_color(record.status), Color::WHITE);
    flow.spacer(6.0);

    let timing = [
        (
            "Started",
            record.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("Duration", format_duration(record.duration)),
        (
            "Exit code",
            record
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        ),
        ("OS family", or_na(record.os_family.as_deref())),
    ];
    flow.table(&label_table(&timing));

    packages(flow, entry);

    if record.status == UpdateStatus::Error || !record.errors.is_empty() {
        subheading(flow, "Errors");
        if record.errors.is_empty() {
            muted(flow, "No error lines were captured.");
        } else {
            let lines: Vec<&str> = record.errors.iter().map(String::as_str).collect();
            flow.preformatted(&lines, 8.0, ERROR_BACKGROUND, ERROR_COLOR);
        }
    }

    if !entry.issues.is_empty() {
        subheading(flow, "Record issues");
        for issue in &entry.issues {
            flow.paragraph(&format!("- {issue}"), Font::HelveticaOblique, 9.0, UNKNOWN_COLOR);
        }
    }

    raw_excerpt(flow, &record.raw_output);
}

fn packages(flow: &mut Flow, entry: &LoadedRecord) {
    let updated = &entry.record.packages_updated;
    subheading(flow, &format!("Packages updated ({})", updated.len()));

    if updated.is_empty() {
        muted(flow, "none");
        return;
    }

    let header = |text: &str| {
        Cell::new(text)
            .bold()
            .color(Color::WHITE)
            .background(HEADER_BACKGROUND)
            .centered()
    };
    let mut table = Table::new(vec![224.0, 140.0, 140.0]).row(vec![
        header("Package"),
        header("Old version"),
        header("New version"),
    ]);
    for package in updated.iter().take(MAX_PACKAGE_ROWS) {
        table = table.row(vec![
            Cell::new(package.name.as_str()),
            Cell::new(or_na(package.old_version.as_deref())).monospace(),
            Cell::new(or_na(package.new_version.as_deref())).monospace(),
        ]);
    }
    flow.table(&table);

    if updated.len() > MAX_PACKAGE_ROWS {
        muted(
            flow,
            &format!("... and {} more package(s).", updated.len() - MAX_PACKAGE_ROWS),
        );
    }
}

fn raw_excerpt(flow: &mut Flow, raw_output: &str) {
    subheading(flow, "Raw log excerpt");

    let lines: Vec<&str> = raw_output.lines().collect();
    if lines.is_empty() {
        muted(flow, "No output was captured.");
        return;
    }

    let shown = lines.len().min(MAX_RAW_LINES);
    flow.preformatted(&lines[..shown], 7.0, CODE_BACKGROUND, Color::BLACK);

    if lines.len() > shown {
        flow.spacer(2.0);
        muted(
            flow,
            &format!(
                "... {} more lines truncated. See full log on disk.",
                lines.len() - shown
            ),
        );
    }
}

fn label_table(rows: &[(&str, String)]) -> Table {
    rows.iter()
        .fold(Table::new(vec![160.0, 344.0]), |table, (label, value)| {
            table.row(vec![
                Cell::new(*label).bold().background(LABEL_BACKGROUND),
                Cell::new(value.as_str()),
            ])
        })
}

fn subheading(flow: &mut Flow, text: &str) {
    flow.spacer(10.0);
    flow.ensure_space(40.0);
    flow.paragraph(text, Font::HelveticaBold, 11.0, HEADING_COLOR);
    flow.spacer(3.0);
}

fn muted(flow: &mut Flow, text: &str) {
    flow.paragraph(text, Font::HelveticaOblique, 9.0, MUTED_COLOR);
}

fn status_color(status: UpdateStatus) -> Color {
    match status {
        UpdateStatus::Success => SUCCESS_COLOR,
        UpdateStatus::Error => ERROR_COLOR,
        UpdateStatus::Unknown => UNKNOWN_COLOR,
    }
}

fn or_na(value: Option<&str>) -> String {
    value.unwrap_or(NOT_AVAILABLE).to_string()
}

fn format_duration(duration: Option<Duration>) -> String {
    let Some(duration) = duration else {
        return NOT_AVAILABLE.to_string();
    };
    let tenths = (duration.as_millis() + 50) / 100;
    let minutes = tenths / 600;
    let rest = tenths % 600;
    if minutes > 0 {
        format!("{minutes}m {}.{}s", rest / 10, rest % 10)
    } else {
        format!("{}.{}s", rest / 10, rest % 10)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::{format_duration, render};
    use crate::config::Settings;
    use crate::model::{LoadedRecord, MonthlySummary, PackageUpdate, Period, UpdateRecord, UpdateStatus};

    fn settings(report_dir: &Path, server: &str) -> Settings {
        let mut file = HashMap::new();
        file.insert("REPORT_DIR".to_string(), report_dir.display().to_string());
        file.insert("LOG_DIR".to_string(), report_dir.display().to_string());
        file.insert("SERVER_NAME".to_string(), server.to_string());
        Settings::from_sources(&file, |_| None).expect("settings")
    }

    fn loaded(day: u32, status: UpdateStatus, packages: usize, raw_lines: usize) -> LoadedRecord {
        let raw_output: String = (0..raw_lines).map(|n| format!("output line {n}\n")).collect();
        LoadedRecord {
            file_name: format!("security-update_202602{day:02}_020000.log"),
            record: UpdateRecord {
                timestamp: Utc.with_ymd_and_hms(2026, 2, day, 2, 0, 0).unwrap(),
                status,
                duration: Some(Duration::from_millis(95_400)),
                exit_code: Some(0),
                server: Some("web-01".to_string()),
                environment: Some("production".to_string()),
                os_family: None,
                packages_updated: (0..packages)
                    .map(|n| PackageUpdate {
                        name: format!("pkg{n}"),
                        old_version: Some("1.0".to_string()),
                        new_version: None,
                    })
                    .collect(),
                errors: if status == UpdateStatus::Error {
                    vec!["E: Sub-process /usr/bin/dpkg returned an error code (1)".to_string()]
                } else {
                    Vec::new()
                },
                raw_output,
            },
            issues: Vec::new(),
        }
    }

    fn period() -> Period {
        Period::new(2026, 2).expect("period")
    }

    #[test]
    fn rendering_twice_is_byte_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings(dir.path(), "web-01");
        let summary = MonthlySummary::new(
            period(),
            vec![
                loaded(3, UpdateStatus::Success, 45, 200),
                loaded(10, UpdateStatus::Error, 0, 5),
            ],
        );

        let first = render(&summary, &settings).expect("render");
        let first_bytes = fs::read(&first).expect("read");
        let second = render(&summary, &settings).expect("render again");
        let second_bytes = fs::read(&second).expect("read");

        assert_eq!(first, second);
        assert_eq!(first_bytes, second_bytes);
        assert_eq!(
            first.file_name().and_then(|n| n.to_str()),
            Some("security_monthly_202602_web-01.pdf")
        );

        let text = String::from_utf8_lossy(&first_bytes);
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.contains("(Update #1 \\267 security-update_20260203_020000.log) Tj"));
        assert!(text.contains("... 120 more lines truncated. See full log on disk."));
        assert!(text.contains("... and 15 more package\\(s\\)."));
        assert!(text.contains("(none) Tj"));
        assert!(text.contains("Auto-generated by security-updater"));
    }

    #[test]
    fn empty_period_renders_an_explicit_notice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings(dir.path(), "db/01 primary");
        let summary = MonthlySummary::new(period(), Vec::new());

        let path = render(&summary, &settings).expect("render");
        let text = String::from_utf8_lossy(&fs::read(&path).expect("read")).into_owned();

        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("security_monthly_202602_db_01_primary.pdf")
        );
        assert!(text.contains("No update runs were recorded for this period."));
        assert!(text.contains("(Page 1 of 1) Tj"));
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(None), "N/A");
        assert_eq!(format_duration(Some(Duration::from_millis(4_300))), "4.3s");
        assert_eq!(format_duration(Some(Duration::from_millis(95_400))), "1m 35.4s");
        assert_eq!(format_duration(Some(Duration::from_millis(119_960))), "2m 0.0s");
        assert_eq!(format_duration(Some(Duration::from_millis(59_970))), "1m 0.0s");
    }
}
