use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::config::Settings;
use crate::model::UpdateStatus;
use crate::record::rules::ErrorRules;
use crate::record::{RecordParser, RecordStore};
use crate::util::utc_rfc3339;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub server: String,
    pub environment: String,
    pub log_dir: String,
    pub report_dir: String,
    pub relay_configured: bool,
    pub record_count: usize,
    pub latest_record: Option<LatestRecord>,
    pub report_count: usize,
    pub latest_report: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LatestRecord {
    pub file_name: String,
    pub timestamp: String,
    pub status: UpdateStatus,
    pub packages_updated: usize,
    pub errors: usize,
    pub issues: Vec<String>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let settings = Settings::load(&args.config)?;
    let status = collect_status(&settings)?;

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&status).context("failed to serialize status")?;
        println!("{rendered}");
        return Ok(());
    }

    info!(
        server = %status.server,
        environment = %status.environment,
        log_dir = %status.log_dir,
        report_dir = %status.report_dir,
        relay_configured = status.relay_configured,
        "status requested"
    );

    match &status.latest_record {
        Some(latest) => info!(
            records = status.record_count,
            file = %latest.file_name,
            timestamp = %latest.timestamp,
            status = %latest.status,
            packages = latest.packages_updated,
            errors = latest.errors,
            issues = latest.issues.len(),
            "latest update record"
        ),
        None => warn!(log_dir = %status.log_dir, "no update records found"),
    }

    match &status.latest_report {
        Some(latest) => info!(reports = status.report_count, latest = %latest, "reports"),
        None => warn!(report_dir = %status.report_dir, "no reports generated yet"),
    }

    Ok(())
}

pub fn collect_status(settings: &Settings) -> Result<StatusReport> {
    let store = RecordStore::new(&settings.log_dir);
    let files = store.list()?;

    let latest_record = match files.last() {
        Some(file) => {
            let parser = RecordParser::new(ErrorRules::from_settings(settings)?)?;
            let loaded = store.load(file, &parser);
            Some(LatestRecord {
                file_name: loaded.file_name,
                timestamp: utc_rfc3339(loaded.record.timestamp),
                status: loaded.record.status,
                packages_updated: loaded.record.packages_updated.len(),
                errors: loaded.record.errors.len(),
                issues: loaded.issues,
            })
        }
        None => None,
    };

    let reports = report_files(&settings.report_dir)?;

    Ok(StatusReport {
        server: settings.server_name.clone(),
        environment: settings.environment.clone(),
        log_dir: settings.log_dir.display().to_string(),
        report_dir: settings.report_dir.display().to_string(),
        relay_configured: settings.relay_configured(),
        record_count: files.len(),
        latest_record,
        report_count: reports.len(),
        latest_report: reports.last().cloned(),
    })
}

fn report_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("security_monthly_") && name.ends_with(".pdf") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
