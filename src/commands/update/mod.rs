use std::fmt::Write;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::UpdateArgs;
use crate::config::Settings;
use crate::model::{UpdateRecord, UpdateStatus};
use crate::record::rules::{ErrorRules, MAX_ERROR_LINES, PackageRules};
use crate::record::{RecordStore, encode};

pub mod plan;
mod process;

use self::plan::UpdatePlan;

const STEP_RULE: &str =
    "**********************************************************************";

#[derive(Debug)]
pub struct UpdateRun {
    pub record: UpdateRecord,
    pub path: Option<PathBuf>,
}

pub fn run(args: UpdateArgs) -> Result<()> {
    let settings = if args.dry_run {
        Settings::read(&args.config)?
    } else {
        Settings::load(&args.config)?
    };
    let plan = UpdatePlan::detect();
    let rules = ErrorRules::from_settings(&settings)?;

    info!(
        server = %settings.server_name,
        environment = %settings.environment,
        os_family = %plan.os_family,
        dry_run = args.dry_run,
        "starting security update"
    );

    let outcome = run_update(&settings, &plan, &rules, args.dry_run)?;

    match &outcome.path {
        Some(path) => info!(
            path = %path.display(),
            status = %outcome.record.status,
            packages = outcome.record.packages_updated.len(),
            duration_ms = outcome.record.duration.map(|d| d.as_millis() as u64).unwrap_or_default(),
            "update record written"
        ),
        None => {
            write_dry_run(&mut io::stdout().lock(), &outcome.record)
                .context("failed to print dry-run record")?;
            info!(status = %outcome.record.status, "dry-run complete");
        }
    }

    Ok(())
}

fn write_dry_run(out: &mut impl io::Write, record: &UpdateRecord) -> io::Result<()> {
    writeln!(out, "[DRY-RUN] simulated update run; no record was written")?;
    out.write_all(encode(record).as_bytes())?;
    out.flush()
}

pub fn run_update(
    settings: &Settings,
    plan: &UpdatePlan,
    rules: &ErrorRules,
    dry_run: bool,
) -> Result<UpdateRun> {
    let timestamp = Utc::now();
    let started = Instant::now();
    let deadline = started + settings.update_timeout;

    if !dry_run {
        plan.preflight()?;
    }

    let mut transcript = String::new();
    let mut step_errors = Vec::new();
    let mut exit_code = Some(0);
    let mut failed = false;

    for step in &plan.steps {
        let _ = writeln!(transcript, "{STEP_RULE}\n{}\n{STEP_RULE}\n", step.label);
        let _ = writeln!(transcript, "$ {}", step.command_line());

        if dry_run {
            transcript.push_str("[DRY-RUN] command not executed\n\n");
            continue;
        }

        let outcome = process::run_bounded(step, deadline)?;
        transcript.push_str(&outcome.output);
        debug!(
            command = %step.command_line(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "step returned"
        );

        if outcome.timed_out {
            let secs = settings.update_timeout.as_secs();
            let _ = writeln!(transcript, "[timed out after {secs}s; process group killed]\n");
            warn!(command = %step.command_line(), timeout_secs = secs, "update step timed out");
            step_errors.push(format!("update timed out after {secs} seconds"));
            exit_code = None;
            failed = true;
            break;
        }

        let code_text = outcome
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let _ = writeln!(transcript, "[exit {code_text}]\n");

        if !step.accepts(outcome.exit_code) {
            warn!(command = %step.command_line(), exit_code = %code_text, "update step failed");
            step_errors.push(format!("'{}' exited with {code_text}", step.command_line()));
            if !failed {
                exit_code = outcome.exit_code;
            }
            failed = true;
        }
    }

    let output_errors = rules.error_lines(&transcript);
    let status = classify(failed, &output_errors);

    let mut errors = step_errors;
    errors.extend(output_errors);
    errors.truncate(MAX_ERROR_LINES);

    let packages_updated = PackageRules::defaults()?.extract(&transcript);

    let record = UpdateRecord {
        timestamp,
        status,
        duration: Some(started.elapsed()),
        exit_code,
        server: Some(settings.server_name.clone()),
        environment: Some(settings.environment.clone()),
        os_family: Some(plan.os_family.clone()),
        packages_updated,
        errors,
        raw_output: transcript,
    };

    if dry_run {
        return Ok(UpdateRun { record, path: None });
    }

    let path = RecordStore::new(&settings.log_dir).append(&record)?;
    Ok(UpdateRun {
        record,
        path: Some(path),
    })
}

pub fn classify(step_failed: bool, output_errors: &[String]) -> UpdateStatus {
    if step_failed || !output_errors.is_empty() {
        UpdateStatus::Error
    } else {
        UpdateStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use super::plan::{UpdatePlan, UpdateStep};
    use super::{classify, run, run_update, write_dry_run};
    use crate::cli::UpdateArgs;
    use crate::config::Settings;
    use crate::model::UpdateStatus;
    use crate::record::RecordParser;
    use crate::record::rules::ErrorRules;

    fn settings_for(log_dir: &Path) -> Settings {
        let mut file = HashMap::new();
        file.insert("LOG_DIR".to_string(), log_dir.display().to_string());
        file.insert(
            "REPORT_DIR".to_string(),
            log_dir.join("reports").display().to_string(),
        );
        file.insert("SERVER_NAME".to_string(), "test-host".to_string());
        Settings::from_sources(&file, |_| None).expect("settings")
    }

    fn shell_plan(scripts: &[&str]) -> UpdatePlan {
        UpdatePlan {
            os_family: "debian".to_string(),
            steps: scripts
                .iter()
                .enumerate()
                .map(|(index, script)| {
                    UpdateStep::new(&format!("STEP {}", index + 1), "sh", &["-c", script])
                })
                .collect(),
        }
    }

    fn record_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("security-update_"))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn successful_run_writes_one_record_that_parses_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_for(dir.path());
        let plan = shell_plan(&[
            "echo 'Reading package lists...'",
            "echo '  libssl3 (3.0.2-0ubuntu1.10 => 3.0.2-0ubuntu1.12)'; echo 'All upgrades installed'",
        ]);
        let rules = ErrorRules::defaults().expect("rules");

        let run = run_update(&settings, &plan, &rules, false).expect("run");

        assert_eq!(run.record.status, UpdateStatus::Success);
        assert_eq!(run.record.exit_code, Some(0));
        assert_eq!(run.record.packages_updated.len(), 1);
        assert_eq!(record_files(dir.path()).len(), 1);

        let path = run.path.expect("record path");
        let content = fs::read_to_string(&path).expect("read record");
        let parser = RecordParser::new(rules).expect("parser");
        let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
        let loaded = parser.parse(name, &content);

        assert_eq!(loaded.record.status, run.record.status);
        assert_eq!(loaded.record.packages_updated, run.record.packages_updated);
        let written = run.record.duration.expect("duration").as_millis();
        let parsed = loaded.record.duration.expect("parsed duration").as_millis();
        assert_eq!(written, parsed);
        assert!(loaded.issues.is_empty(), "issues: {:?}", loaded.issues);
    }

    #[test]
    fn nonzero_exit_is_an_error_record_not_a_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_for(dir.path());
        let plan = shell_plan(&["echo refreshing; exit 2", "echo second step ran"]);

        let run = run_update(&settings, &plan, &ErrorRules::defaults().expect("rules"), false)
            .expect("operational failures still produce a record");

        assert_eq!(run.record.status, UpdateStatus::Error);
        assert_eq!(run.record.exit_code, Some(2));
        assert!(run.record.errors[0].contains("exited with 2"));
        assert!(run.record.raw_output.contains("second step ran"));
        assert_eq!(record_files(dir.path()).len(), 1);
    }

    #[test]
    fn error_marker_on_clean_exit_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_for(dir.path());
        let plan = shell_plan(&["echo 'E: Unable to locate package foo'"]);

        let run = run_update(&settings, &plan, &ErrorRules::defaults().expect("rules"), false)
            .expect("run");

        assert_eq!(run.record.status, UpdateStatus::Error);
        assert_eq!(run.record.exit_code, Some(0));
        assert_eq!(run.record.errors, vec!["E: Unable to locate package foo"]);
    }

    #[test]
    fn timeout_kills_the_run_and_records_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = settings_for(dir.path());
        settings.update_timeout = Duration::from_secs(1);
        let plan = shell_plan(&["sleep 20", "echo unreachable"]);

        let run = run_update(&settings, &plan, &ErrorRules::defaults().expect("rules"), false)
            .expect("run");

        assert_eq!(run.record.status, UpdateStatus::Error);
        assert!(run.record.errors.iter().any(|e| e.contains("timed out after 1 seconds")));
        assert!(run.record.exit_code.is_none());
        assert!(!run.record.raw_output.contains("unreachable"));

        let duration = run.record.duration.expect("duration");
        assert!(duration >= Duration::from_secs(1));
        assert!(duration < Duration::from_secs(5), "took {duration:?}");
        assert_eq!(record_files(dir.path()).len(), 1);
    }

    #[test]
    fn dry_run_describes_the_run_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_for(dir.path());
        let plan = UpdatePlan {
            os_family: "debian".to_string(),
            steps: vec![UpdateStep::new("STEP 1", "not-installed-anywhere", &["-d"])],
        };

        let run = run_update(&settings, &plan, &ErrorRules::defaults().expect("rules"), true)
            .expect("dry run skips binary lookup");

        assert!(run.path.is_none());
        assert_eq!(run.record.status, UpdateStatus::Success);
        assert!(run.record.raw_output.contains("$ not-installed-anywhere -d"));
        assert!(run.record.raw_output.contains("[DRY-RUN] command not executed"));
        assert!(record_files(dir.path()).is_empty());
    }

    #[test]
    fn dry_run_output_announces_the_simulation_and_prints_the_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_for(dir.path());
        let plan = shell_plan(&["true"]);
        let run = run_update(&settings, &plan, &ErrorRules::defaults().expect("rules"), true)
            .expect("dry run");

        let mut out = Vec::new();
        write_dry_run(&mut out, &run.record).expect("write");
        let text = String::from_utf8(out).expect("utf8");

        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("[DRY-RUN] simulated update run; no record was written")
        );
        assert_eq!(lines.next(), Some(crate::record::MAGIC));
        assert!(text.contains("Status: SUCCESS"));
        assert!(text.contains("Server: test-host"));
        assert!(text.contains("$ sh -c true"));
    }

    #[test]
    fn dry_run_command_leaves_directories_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("logs");
        let report_dir = dir.path().join("reports");
        let config = dir.path().join("config.env");
        fs::write(
            &config,
            format!(
                "LOG_DIR={}\nREPORT_DIR={}\n",
                log_dir.display(),
                report_dir.display()
            ),
        )
        .expect("write config");

        run(UpdateArgs {
            config,
            dry_run: true,
        })
        .expect("dry run");

        assert!(!log_dir.exists());
        assert!(!report_dir.exists());
    }

    #[test]
    fn missing_binary_is_fatal_and_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings_for(dir.path());
        let plan = UpdatePlan {
            os_family: "debian".to_string(),
            steps: vec![UpdateStep::new("STEP 1", "not-installed-anywhere", &[])],
        };

        let result = run_update(&settings, &plan, &ErrorRules::defaults().expect("rules"), false);

        assert!(result.is_err());
        assert!(record_files(dir.path()).is_empty());
    }

    #[test]
    fn classify_requires_clean_exit_and_clean_output() {
        assert_eq!(classify(false, &[]), UpdateStatus::Success);
        assert_eq!(classify(true, &[]), UpdateStatus::Error);
        assert_eq!(
            classify(false, &["E: broken".to_string()]),
            UpdateStatus::Error
        );
    }
}
