// SPDX-License-Identifier: GPL-2.0
//
// scx_adaptived: feature record sink for offline model training.
//
// Appends one CSV row per tick; the offline dataset tooling cleans and
// consumes the file. Best-effort only: the control loop never depends on a
// record landing.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use log::warn;

use crate::features::{
    FeatureSnapshot, AVG_LOAD, LOADAVG1, LOADAVG15, LOADAVG5, MAX_LOAD, MEM_USED_PCT,
    PROCS_BLOCKED, PROCS_RUNNING, PROC_CPU, PROC_READ_BYTES, PROC_RSS_KB, PROC_THREADS,
    PROC_VMS_KB, PROC_WRITE_BYTES, PSI_CPU_FULL, PSI_CPU_SOME, TARGET_PID,
};

/// Stable column order. The cleaner drops timestamp/target_pid and
/// median-fills empty cells, so absent features serialize as empty strings.
const COLUMNS: &[&str] = &[
    AVG_LOAD,
    MAX_LOAD,
    PROC_CPU,
    TARGET_PID,
    MEM_USED_PCT,
    PROCS_RUNNING,
    PROCS_BLOCKED,
    LOADAVG1,
    LOADAVG5,
    LOADAVG15,
    PSI_CPU_SOME,
    PSI_CPU_FULL,
    PROC_RSS_KB,
    PROC_VMS_KB,
    PROC_THREADS,
    PROC_READ_BYTES,
    PROC_WRITE_BYTES,
];

pub struct FeatureLog {
    path: PathBuf,
    last_error: Option<String>,
}

impl FeatureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_error: None,
        }
    }

    /// Append one record. Failures are logged once per distinct error so a
    /// persistently unwritable sink does not spam every tick.
    pub fn append(&mut self, snap: &FeatureSnapshot, boost_level: u8) {
        let timestamp = chrono::Utc::now().timestamp();
        if let Err(e) = self.append_at(timestamp, snap, boost_level) {
            let msg = e.to_string();
            if self.last_error.as_deref() != Some(&msg) {
                warn!("failed to append feature record to {}: {}", self.path.display(), msg);
                self.last_error = Some(msg);
            }
        } else {
            self.last_error = None;
        }
    }

    fn append_at(
        &self,
        timestamp: i64,
        snap: &FeatureSnapshot,
        boost_level: u8,
    ) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut record = String::new();
        if file.metadata()?.len() == 0 {
            record.push_str("timestamp");
            for col in COLUMNS {
                let _ = write!(record, ",{}", col);
            }
            record.push_str(",boost_level\n");
        }

        let _ = write!(record, "{}", timestamp);
        for col in COLUMNS {
            match snap.get(col) {
                Some(value) => {
                    let _ = write!(record, ",{}", value);
                }
                None => record.push(','),
            }
        }
        let _ = writeln!(record, ",{}", boost_level);

        file.write_all(record.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_once_and_stable_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics_log.csv");
        let log = FeatureLog::new(&path);

        let mut snap = FeatureSnapshot::new();
        snap.insert(AVG_LOAD, 70.0);
        snap.insert(MAX_LOAD, 90.0);
        snap.insert(PROC_CPU, 33.5);
        log.append_at(1000, &snap, 2).unwrap();
        log.append_at(1001, &snap, 3).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,avg_load,max_load,proc_cpu,"));
        assert!(lines[0].ends_with(",boost_level"));
        assert!(lines[1].starts_with("1000,70,90,33.5,"));
        assert!(lines[1].ends_with(",2"));
        assert!(lines[2].starts_with("1001,"));

        // Every row has one cell per column.
        let width = lines[0].split(',').count();
        assert_eq!(lines[1].split(',').count(), width);
    }

    #[test]
    fn test_absent_features_serialize_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics_log.csv");
        let log = FeatureLog::new(&path);

        let mut snap = FeatureSnapshot::new();
        snap.insert(AVG_LOAD, 10.0);
        log.append_at(1000, &snap, 0).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let row = content.lines().nth(1).unwrap();
        // timestamp, avg_load, then an empty max_load cell.
        assert!(row.starts_with("1000,10,,"));
    }

    #[test]
    fn test_append_survives_unwritable_sink() {
        let dir = tempdir().unwrap();
        let mut log = FeatureLog::new(dir.path().join("no/such/dir/metrics.csv"));
        // Must not panic; the loop treats the sink as best-effort.
        log.append(&FeatureSnapshot::new(), 1);
        log.append(&FeatureSnapshot::new(), 1);
    }
}
