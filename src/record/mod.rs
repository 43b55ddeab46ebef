//! The on-disk run record.
//!
//! One UTF-8 text file per update run:
//!
//! ```text
//! # security-update record v1
//! Timestamp: 2026-02-03T02:00:00Z
//! Status: SUCCESS
//! Duration-Ms: 83120
//! Packages: 2
//! Exit-Code: 0
//! Server: web-01
//! Environment: production
//! OS-Family: debian
//! Output-Sha256: 5f2c...
//! Error: E: Could not get lock /var/lib/dpkg/lock-frontend
//! ----- BEGIN RAW OUTPUT -----
//! <captured transcript, verbatim, to end of file>
//! ```

mod format;
mod parse;
pub mod rules;
mod store;

use chrono::{DateTime, NaiveDateTime, Utc};

pub use format::encode;
pub use parse::RecordParser;
pub use store::RecordStore;

pub const MAGIC: &str = "# security-update record v1";
pub const RAW_DELIMITER: &str = "----- BEGIN RAW OUTPUT -----";

const FILE_PREFIX: &str = "security-update_";
const FILE_EXTENSION: &str = "log";

pub fn file_name_for(ts: DateTime<Utc>) -> String {
    format!(
        "{FILE_PREFIX}{}.{FILE_EXTENSION}",
        crate::util::utc_file_stamp(ts)
    )
}

pub fn timestamp_from_file_name(file_name: &str) -> Option<DateTime<Utc>> {
    let stem = file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?
        .strip_suffix('.')?;
    let stamp = stem.get(..15)?;
    let suffix = &stem[15..];
    if let Some(counter) = suffix.strip_prefix('_') {
        if counter.is_empty() || !counter.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
    } else if !suffix.is_empty() {
        return None;
    }

    let well_formed = stamp.bytes().enumerate().all(|(index, byte)| {
        if index == 8 {
            byte == b'_'
        } else {
            byte.is_ascii_digit()
        }
    });
    if !well_formed {
        return None;
    }

    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{file_name_for, timestamp_from_file_name};

    #[test]
    fn file_names_round_trip_their_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 3, 2, 0, 9).unwrap();
        let name = file_name_for(ts);
        assert_eq!(name, "security-update_20260203_020009.log");
        assert_eq!(timestamp_from_file_name(&name), Some(ts));
        assert_eq!(
            timestamp_from_file_name("security-update_20260203_020009_2.log"),
            Some(ts)
        );
    }

    #[test]
    fn foreign_names_are_not_records() {
        assert!(timestamp_from_file_name(".tmpA1b2C3").is_none());
        assert!(timestamp_from_file_name("security-update_20260203.log").is_none());
        assert!(timestamp_from_file_name("security-update_20261399_000000.log").is_none());
        assert!(timestamp_from_file_name("notes.txt").is_none());
    }
}
