use std::path::Path;

use anyhow::Result;
use tracing::{debug, info};

use crate::model::{MonthlySummary, Period};
use crate::record::rules::ErrorRules;
use crate::record::{RecordParser, RecordStore};

pub fn build_summary(log_dir: &Path, period: Period, rules: ErrorRules) -> Result<MonthlySummary> {
    let store = RecordStore::new(log_dir);
    let parser = RecordParser::new(rules)?;

    let files = store.list_period(period)?;
    debug!(
        log_dir = %store.dir().display(),
        period = %period.compact(),
        files = files.len(),
        "selected record files"
    );

    let records = files
        .iter()
        .map(|file| {
            let loaded = store.load(file, &parser);
            if !loaded.issues.is_empty() {
                debug!(file = %loaded.file_name, issues = ?loaded.issues, "record loaded with issues");
            }
            loaded
        })
        .collect();

    let summary = MonthlySummary::new(period, records);
    info!(
        period = %period.compact(),
        total = summary.total_runs,
        success = summary.success_count,
        error = summary.error_count,
        unknown = summary.unknown_count,
        "built monthly summary"
    );

    Ok(summary)
}
