//! Persisted voice log.
//!
//! One entry per line: `<n> [HH:MM:SS] - <text>`. Numbering resumes from the highest
//! leading integer already in the file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, NaiveTime};

pub struct Journal {
    path: PathBuf,
    next: u64,
}

impl Journal {
    /// Open (or create) the log at `path`, continuing its numbering.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let last = match File::open(&path) {
            Ok(file) => highest_sequence(BufReader::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        Ok(Self {
            path,
            next: last + 1,
        })
    }

    /// New log in `dir` named after the current local time.
    pub fn create_in(dir: &Path) -> Result<Self> {
        Self::open(dir.join(file_name(Local::now().naive_local())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry stamped with the current local time; returns its sequence number.
    pub fn append(&mut self, text: &str) -> Result<u64> {
        self.append_at(Local::now().time(), text)
    }

    pub fn append_at(&mut self, time: NaiveTime, text: &str) -> Result<u64> {
        let number = self.next;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{}", format_entry(number, time, text))?;
        self.next += 1;
        tracing::debug!(number, path = %self.path.display(), "voice log entry written");
        Ok(number)
    }
}

pub fn format_entry(number: u64, time: NaiveTime, text: &str) -> String {
    format!("{} [{}] - {}", number, time.format("%H:%M:%S"), text.trim())
}

pub fn file_name(at: NaiveDateTime) -> String {
    format!("{}.txt", at.format("%Y-%m-%d_%H-%M-%S"))
}

fn highest_sequence(reader: impl BufRead) -> u64 {
    reader
        .lines()
        .map_while(Result::ok)
        .filter_map(|line| {
            let digits: String = line
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 4, 5).unwrap()
    }

    #[test]
    fn entries_use_the_log_format() {
        assert_eq!(
            format_entry(3, noon(), " mark lesion on slice 40 "),
            "3 [12:04:05] - mark lesion on slice 40"
        );
    }

    #[test]
    fn file_names_carry_the_start_time() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(file_name(at), "2024-03-09_08-30-00.txt");
    }

    #[test]
    fn numbering_resumes_from_the_highest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.txt");
        fs::write(&path, "1 [10:00:00] - a\n7 [10:01:00] - b\nnot an entry\n3 [10:02:00] - c\n")
            .unwrap();

        let mut journal = Journal::open(&path).unwrap();
        assert_eq!(journal.append_at(noon(), "next").unwrap(), 8);
        assert_eq!(journal.append_at(noon(), "after").unwrap(), 9);

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("8 [12:04:05] - next\n9 [12:04:05] - after\n"));
    }

    #[test]
    fn new_logs_start_at_one_and_create_their_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::create_in(&dir.path().join("logs")).unwrap();
        assert_eq!(journal.append("first").unwrap(), 1);
        assert!(journal.path().exists());
    }
}
