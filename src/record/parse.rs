use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::model::{LoadedRecord, UpdateRecord, UpdateStatus};
use crate::util::sha256_hex;

use super::rules::{ErrorRules, PackageRules};
use super::{MAGIC, RAW_DELIMITER, timestamp_from_file_name};

const LEGACY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct RecordParser {
    errors: ErrorRules,
    packages: PackageRules,
    legacy_started: Regex,
    legacy_finished: Regex,
    legacy_status: Regex,
}

#[derive(Default)]
struct Header {
    timestamp: Option<DateTime<Utc>>,
    status: Option<UpdateStatus>,
    duration: Option<Duration>,
    package_hint: Option<usize>,
    exit_code: Option<i32>,
    server: Option<String>,
    environment: Option<String>,
    os_family: Option<String>,
    checksum: Option<String>,
    errors: Vec<String>,
}

impl RecordParser {
    pub fn new(errors: ErrorRules) -> Result<Self> {
        Ok(Self {
            errors,
            packages: PackageRules::defaults()?,
            legacy_started: Regex::new(r"(?m)^\s*Started\s*:\s*(.+?)\s*$")
                .context("failed to compile legacy Started pattern")?,
            legacy_finished: Regex::new(r"(?m)^\s*Finished\s*:\s*(.+?)\s*$")
                .context("failed to compile legacy Finished pattern")?,
            legacy_status: Regex::new(r"(?m)^\s*Status\s*:\s*(.+?)\s*$")
                .context("failed to compile legacy Status pattern")?,
        })
    }

    pub fn parse(&self, file_name: &str, content: &str) -> LoadedRecord {
        let mut issues = Vec::new();
        let file_timestamp = timestamp_from_file_name(file_name);

        let record = match split_sections(content) {
            Sections::Structured { header, raw } => {
                self.parse_structured(&header, raw, file_timestamp, &mut issues)
            }
            Sections::Truncated => {
                issues.push("raw output delimiter missing; header ignored".to_string());
                self.reconstruct(content, file_timestamp, false, &mut issues)
            }
            Sections::Unstructured => self.reconstruct(content, file_timestamp, true, &mut issues),
        };

        LoadedRecord {
            file_name: file_name.to_string(),
            record,
            issues,
        }
    }

    pub fn unreadable(&self, file_name: &str, reason: String) -> LoadedRecord {
        let mut issues = Vec::new();
        let timestamp = fallback_timestamp(timestamp_from_file_name(file_name), &mut issues);
        issues.push(reason);

        LoadedRecord {
            file_name: file_name.to_string(),
            record: UpdateRecord {
                timestamp,
                status: UpdateStatus::Unknown,
                duration: None,
                exit_code: None,
                server: None,
                environment: None,
                os_family: None,
                packages_updated: Vec::new(),
                errors: Vec::new(),
                raw_output: String::new(),
            },
            issues,
        }
    }

    fn parse_structured(
        &self,
        lines: &[&str],
        raw: &str,
        file_timestamp: Option<DateTime<Utc>>,
        issues: &mut Vec<String>,
    ) -> UpdateRecord {
        let header = read_header(lines, issues);

        let timestamp = match header.timestamp {
            Some(timestamp) => timestamp,
            None => fallback_timestamp(file_timestamp, issues),
        };

        let status = header.status.unwrap_or_else(|| {
            issues.push("status missing from header".to_string());
            UpdateStatus::Unknown
        });

        if let Some(expected) = &header.checksum {
            if *expected != sha256_hex(raw.as_bytes()) {
                issues.push("raw output checksum mismatch (file truncated or edited)".to_string());
            }
        }

        let packages_updated = self.packages.extract(raw);
        if let Some(hint) = header.package_hint {
            if hint != packages_updated.len() {
                issues.push(format!(
                    "header lists {hint} package(s), raw output shows {}",
                    packages_updated.len()
                ));
            }
        }

        UpdateRecord {
            timestamp,
            status,
            duration: header.duration,
            exit_code: header.exit_code,
            server: header.server,
            environment: header.environment,
            os_family: header.os_family,
            packages_updated,
            errors: header.errors,
            raw_output: raw.to_string(),
        }
    }

    fn reconstruct(
        &self,
        content: &str,
        file_timestamp: Option<DateTime<Utc>>,
        legacy: bool,
        issues: &mut Vec<String>,
    ) -> UpdateRecord {
        let capture = |pattern: &Regex| {
            pattern
                .captures(content)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_string())
        };

        let (started, finished, legacy_status) = if legacy {
            (
                capture(&self.legacy_started).and_then(|value| parse_legacy_time(&value)),
                capture(&self.legacy_finished).and_then(|value| parse_legacy_time(&value)),
                capture(&self.legacy_status),
            )
        } else {
            (None, None, None)
        };

        let status = match &legacy_status {
            Some(value) => UpdateStatus::from_legacy(value),
            None => {
                if legacy {
                    issues.push("record header missing; status unknown".to_string());
                }
                UpdateStatus::Unknown
            }
        };

        let timestamp = match started {
            Some(started) => started,
            None => fallback_timestamp(file_timestamp, issues),
        };

        let duration = match (started, finished) {
            (Some(started), Some(finished)) => (finished - started).to_std().ok(),
            _ => None,
        };

        UpdateRecord {
            timestamp,
            status,
            duration,
            exit_code: None,
            server: None,
            environment: None,
            os_family: None,
            packages_updated: self.packages.extract(content),
            errors: self.errors.error_lines(content),
            raw_output: content.to_string(),
        }
    }
}

enum Sections<'a> {
    Structured { header: Vec<&'a str>, raw: &'a str },
    Truncated,
    Unstructured,
}

fn split_sections(content: &str) -> Sections<'_> {
    let mut offset = 0;
    let mut lines = content.split_inclusive('\n');

    match lines.next() {
        Some(first) if strip_line_end(first) == MAGIC => offset += first.len(),
        _ => return Sections::Unstructured,
    }

    let mut header = Vec::new();
    for line in lines {
        offset += line.len();
        let line = strip_line_end(line);
        if line == RAW_DELIMITER {
            return Sections::Structured {
                header,
                raw: &content[offset..],
            };
        }
        header.push(line);
    }

    Sections::Truncated
}

fn strip_line_end(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn read_header(lines: &[&str], issues: &mut Vec<String>) -> Header {
    let mut header = Header::default();

    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            if !line.trim().is_empty() {
                issues.push(format!("malformed header line: {}", line.trim()));
            }
            continue;
        };
        let value = value.trim();
        let present = (!value.is_empty() && value != "N/A").then(|| value.to_string());

        match key.trim() {
            "Timestamp" => match DateTime::parse_from_rfc3339(value) {
                Ok(ts) => header.timestamp = Some(ts.with_timezone(&Utc)),
                Err(_) => issues.push(format!("unparseable timestamp: {value}")),
            },
            "Status" => match UpdateStatus::parse(value) {
                Some(status) => header.status = Some(status),
                None => issues.push(format!("unrecognized status: {value}")),
            },
            "Duration-Ms" => {
                if let Some(raw) = present {
                    match raw.parse::<u64>() {
                        Ok(ms) => header.duration = Some(Duration::from_millis(ms)),
                        Err(_) => issues.push(format!("unparseable duration: {raw}")),
                    }
                }
            }
            "Packages" => header.package_hint = value.parse::<usize>().ok(),
            "Exit-Code" => header.exit_code = present.and_then(|raw| raw.parse::<i32>().ok()),
            "Server" => header.server = present,
            "Environment" => header.environment = present,
            "OS-Family" => header.os_family = present,
            "Output-Sha256" => header.checksum = present,
            "Error" => {
                if !value.is_empty() {
                    header.errors.push(value.to_string());
                }
            }
            _ => {}
        }
    }

    header
}

fn fallback_timestamp(
    file_timestamp: Option<DateTime<Utc>>,
    issues: &mut Vec<String>,
) -> DateTime<Utc> {
    match file_timestamp {
        Some(ts) => ts,
        None => {
            issues.push("no usable timestamp in header or file name".to_string());
            DateTime::<Utc>::default()
        }
    }
}

fn parse_legacy_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), LEGACY_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
