use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::model::{LoadedRecord, Period, UpdateRecord};
use crate::util::write_atomic_new;

use super::{RecordParser, encode, file_name_for, timestamp_from_file_name};

#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFile {
    pub path: PathBuf,
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn append(&self, record: &UpdateRecord) -> Result<PathBuf> {
        let path = self.dir.join(file_name_for(record.timestamp));
        write_atomic_new(&path, encode(record).as_bytes())
    }

    pub fn list(&self) -> Result<Vec<RecordFile>> {
        if !self.dir.exists() {
            warn!(path = %self.dir.display(), "log directory missing; no records");
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read {}", self.dir.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", self.dir.display()))?;
            let path = entry.path();

            let is_file = entry
                .file_type()
                .with_context(|| format!("failed to inspect file type: {}", path.display()))?
                .is_file();
            if !is_file {
                continue;
            }

            let Some(file_name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                debug!(path = %path.display(), "skipping non UTF-8 file name");
                continue;
            };
            let Some(timestamp) = timestamp_from_file_name(&file_name) else {
                continue;
            };

            files.push(RecordFile {
                path,
                file_name,
                timestamp,
            });
        }

        files.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(files)
    }

    pub fn list_period(&self, period: Period) -> Result<Vec<RecordFile>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|file| period.contains(file.timestamp))
            .collect())
    }

    pub fn load(&self, file: &RecordFile, parser: &RecordParser) -> LoadedRecord {
        match fs::read(&file.path) {
            Ok(bytes) => parser.parse(&file.file_name, &String::from_utf8_lossy(&bytes)),
            Err(err) => {
                warn!(path = %file.path.display(), error = %err, "failed to read record");
                parser.unreadable(&file.file_name, format!("failed to read record: {err}"))
            }
        }
    }
}
