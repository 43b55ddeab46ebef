use std::fmt::Write;

use crate::model::UpdateRecord;
use crate::util::{sha256_hex, utc_rfc3339};

use super::{MAGIC, RAW_DELIMITER};

const NOT_AVAILABLE: &str = "N/A";

pub fn encode(record: &UpdateRecord) -> String {
    let mut out = String::with_capacity(record.raw_output.len() + 512);

    let duration = record
        .duration
        .map(|duration| duration.as_millis().to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let exit_code = record
        .exit_code
        .map(|code| code.to_string())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{MAGIC}");
    let _ = writeln!(out, "Timestamp: {}", utc_rfc3339(record.timestamp));
    let _ = writeln!(out, "Status: {}", record.status);
    let _ = writeln!(out, "Duration-Ms: {duration}");
    let _ = writeln!(out, "Packages: {}", record.packages_updated.len());
    let _ = writeln!(out, "Exit-Code: {exit_code}");
    write_optional(&mut out, "Server", record.server.as_deref());
    write_optional(&mut out, "Environment", record.environment.as_deref());
    write_optional(&mut out, "OS-Family", record.os_family.as_deref());
    let _ = writeln!(
        out,
        "Output-Sha256: {}",
        sha256_hex(record.raw_output.as_bytes())
    );
    for error in &record.errors {
        let _ = writeln!(out, "Error: {}", single_line(error));
    }
    let _ = writeln!(out, "{RAW_DELIMITER}");
    out.push_str(&record.raw_output);

    out
}

fn write_optional(out: &mut String, key: &str, value: Option<&str>) {
    let _ = writeln!(
        out,
        "{key}: {}",
        value.map(single_line).unwrap_or_else(|| NOT_AVAILABLE.to_string())
    );
}

fn single_line(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
