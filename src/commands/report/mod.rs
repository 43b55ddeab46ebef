use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use tracing::{info, warn};

use crate::cli::ReportArgs;
use crate::config::Settings;
use crate::model::{MonthlySummary, Period};
use crate::notify::{self, Delivery};
use crate::record::rules::ErrorRules;

mod render;
mod summary;

pub use render::render;
pub use summary::build_summary;

#[derive(Debug)]
pub struct ReportOutcome {
    pub path: PathBuf,
    pub summary: MonthlySummary,
    pub delivered: bool,
}

pub fn run(args: ReportArgs) -> Result<()> {
    let settings = Settings::load(&args.config)?;
    let period = match (args.year, args.month) {
        (Some(year), Some(month)) => Period::new(year, month)?,
        _ => Period::previous_month(Local::now().date_naive()),
    };

    let outcome = generate_report(&settings, period, !args.no_send)?;

    info!(
        path = %outcome.path.display(),
        period = %period.compact(),
        runs = outcome.summary.total_runs,
        delivered = outcome.delivered,
        "report complete"
    );
    Ok(())
}

pub fn generate_report(settings: &Settings, period: Period, send: bool) -> Result<ReportOutcome> {
    let rules = ErrorRules::from_settings(settings)?;
    let summary = build_summary(&settings.log_dir, period, rules)?;
    let path = render(&summary, settings)?;

    let delivered = if send {
        let delivery = Delivery {
            path: path.clone(),
            caption: caption(&summary, settings),
        };
        let delivered = notify::send(&delivery, settings);
        if !delivered && settings.relay_configured() {
            warn!(path = %path.display(), "report was not delivered; it remains on disk");
        }
        delivered
    } else {
        info!("delivery skipped (--no-send)");
        false
    };

    Ok(ReportOutcome {
        path,
        summary,
        delivered,
    })
}

fn caption(summary: &MonthlySummary, settings: &Settings) -> String {
    format!(
        "Security report {} for {} ({}): {} run(s), {} successful, {} error(s), {} unknown",
        summary.period.label(),
        settings.server_name,
        settings.environment,
        summary.total_runs,
        summary.success_count,
        summary.error_count,
        summary.unknown_count
    )
}
