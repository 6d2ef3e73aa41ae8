//! Moving consumed input files aside

use chrono::{Local, NaiveDateTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub fn archive_file_name(stamp: NaiveDateTime) -> String {
    format!("input_{}.csv", stamp.format("%Y%m%d_%H%M%S"))
}

/// Move `input` into `archive_dir`, named after the earliest row timestamp
/// (or the current local time when no row had one). Never overwrites.
pub fn archive_input(
    input: &Path,
    archive_dir: &Path,
    earliest: Option<NaiveDateTime>,
) -> io::Result<PathBuf> {
    fs::create_dir_all(archive_dir)?;
    let stamp = earliest.unwrap_or_else(|| Local::now().naive_local());
    let target = free_target(archive_dir, stamp);
    move_file(input, &target)?;
    Ok(target)
}

fn free_target(dir: &Path, stamp: NaiveDateTime) -> PathBuf {
    let name = archive_file_name(stamp);
    let candidate = dir.join(&name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = name.trim_end_matches(".csv");
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem}_{n}.csv"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(from, to)?;
    fs::remove_file(from)
}
