//! Durable append-only file sink.
//!
//! One file per match, one JSON object per line, flushed after every
//! write. The final line of a healthy file is the match summary. This sink
//! is the authoritative audit trail; recovery walks the file linewise and
//! tolerates a torn trailing line.

use serde::Serialize;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct MatchLog {
    file: File,
    path: PathBuf,
}

impl MatchLog {
    pub fn open(dir: &Path, match_id: &str) -> io::Result<Self> {
        create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", match_id));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &impl Serialize) -> io::Result<()> {
        let line = serde_json::to_string(record).map_err(io::Error::from)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()
    }

    /// Read all records from a log file. Unparseable lines are skipped.
    pub fn read_records(path: &Path) -> io::Result<Vec<serde_json::Value>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(path)?;
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str(&line) {
                out.push(value);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = MatchLog::open(dir.path(), "m-test").unwrap();
        log.append(&json!({"record_type": "turn", "turn_number": 1})).unwrap();
        log.append(&json!({"record_type": "match_summary"})).unwrap();

        let records = MatchLog::read_records(log.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["turn_number"], 1);
        assert_eq!(records[1]["record_type"], "match_summary");
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = MatchLog::open(dir.path(), "m-x").unwrap();
            log.append(&json!({"n": 1})).unwrap();
        }
        let mut log = MatchLog::open(dir.path(), "m-x").unwrap();
        log.append(&json!({"n": 2})).unwrap();
        let records = MatchLog::read_records(log.path()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_torn_trailing_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m-torn.log");
        std::fs::write(&path, "{\"n\":1}\n{\"n\":2").unwrap();
        let records = MatchLog::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = MatchLog::read_records(&dir.path().join("absent.log")).unwrap();
        assert!(records.is_empty());
    }
}
