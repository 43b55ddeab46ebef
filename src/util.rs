use std::fs::{self, DirBuilder};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

pub const PRIVATE_DIR_MODE: u32 = 0o750;

pub fn utc_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_file_stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d_%H%M%S").to_string()
}

pub fn ensure_private_directory(path: &Path) -> Result<()> {
    if !path.is_dir() {
        DirBuilder::new()
            .recursive(true)
            .mode(PRIVATE_DIR_MODE)
            .create(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
        fs::set_permissions(path, fs::Permissions::from_mode(PRIVATE_DIR_MODE))
            .with_context(|| format!("failed to restrict permissions: {}", path.display()))?;
    }

    NamedTempFile::new_in(path)
        .with_context(|| format!("directory is not writable: {}", path.display()))?;

    Ok(())
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut temp = new_sibling_temp(path)?;
    temp.write_all(data)
        .with_context(|| format!("failed to write {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("failed to move file into place: {}", path.display()))?;
    Ok(())
}

pub fn write_atomic_new(path: &Path, data: &[u8]) -> Result<PathBuf> {
    let mut temp = new_sibling_temp(path)?;
    temp.write_all(data)
        .with_context(|| format!("failed to write {}", path.display()))?;
    temp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;

    let mut candidate = path.to_path_buf();
    let mut attempt = 0_u32;
    loop {
        match temp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(err) if err.error.kind() == std::io::ErrorKind::AlreadyExists && attempt < 100 => {
                attempt += 1;
                temp = err.file;
                candidate = suffixed_path(path, attempt);
            }
            Err(err) => {
                return Err(err.error)
                    .with_context(|| format!("failed to move file into place: {}", candidate.display()));
            }
        }
    }
}

fn new_sibling_temp(path: &Path) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))
}

fn suffixed_path(path: &Path, attempt: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{attempt}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{attempt}"),
    };
    path.with_file_name(name)
}

pub fn file_name_safe(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '_' | '-') {
                character
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|character| character == '.') {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{file_name_safe, write_atomic, write_atomic_new};

    #[test]
    fn file_name_safe_replaces_separators() {
        assert_eq!(file_name_safe("web-01.prod"), "web-01.prod");
        assert_eq!(file_name_safe("db/primary host"), "db_primary_host");
        assert_eq!(file_name_safe(".."), "unnamed");
        assert_eq!(file_name_safe("  "), "unnamed");
    }

    #[test]
    fn write_atomic_new_never_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("security-update_20260201_020000.log");

        let first = write_atomic_new(&path, b"first").expect("first write");
        let second = write_atomic_new(&path, b"second").expect("second write");

        assert_eq!(first, path);
        assert_eq!(
            second.file_name().and_then(|name| name.to_str()),
            Some("security-update_20260201_020000_1.log")
        );
        assert_eq!(fs::read(&first).expect("read first"), b"first");
        assert_eq!(fs::read(&second).expect("read second"), b"second");
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.pdf");

        write_atomic(&path, b"old").expect("first write");
        write_atomic(&path, b"new").expect("second write");

        assert_eq!(fs::read(&path).expect("read"), b"new");
        let entries = fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(entries, 1);
    }
}
