// SPDX-License-Identifier: GPL-2.0
//
// scx_adaptived: feature snapshot assembly from /proc.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use log::debug;

pub const AVG_LOAD: &str = "avg_load";
pub const MAX_LOAD: &str = "max_load";
pub const PROC_CPU: &str = "proc_cpu";
pub const TARGET_PID: &str = "target_pid";
pub const MEM_USED_PCT: &str = "mem_used_pct";
pub const PROCS_RUNNING: &str = "procs_running";
pub const PROCS_BLOCKED: &str = "procs_blocked";
pub const LOADAVG1: &str = "loadavg1";
pub const LOADAVG5: &str = "loadavg5";
pub const LOADAVG15: &str = "loadavg15";
pub const PSI_CPU_SOME: &str = "psi_cpu_some";
pub const PSI_CPU_FULL: &str = "psi_cpu_full";
pub const PROC_RSS_KB: &str = "proc_rss_kb";
pub const PROC_VMS_KB: &str = "proc_vms_kb";
pub const PROC_THREADS: &str = "proc_threads";
pub const PROC_READ_BYTES: &str = "proc_read_bytes";
pub const PROC_WRITE_BYTES: &str = "proc_write_bytes";

/// One tick's worth of named metrics. Metrics whose source could not be
/// read this tick are omitted, not defaulted; consumers that want a zero
/// default ask for it explicitly.
#[derive(Debug, Clone, Default)]
pub struct FeatureSnapshot {
    values: BTreeMap<String, f64>,
}

impl FeatureSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn get_or_zero(&self, key: &str) -> f64 {
        self.get(key).unwrap_or(0.0)
    }
}

/// Parse a decimal number, tolerating a comma as the decimal separator
/// (locale artifact in PSI output and ps pcpu columns).
pub fn parse_decimal(text: &str) -> Option<f64> {
    text.trim().replace(',', ".").parse::<f64>().ok()
}

fn field_after(line: &str, n: usize) -> Option<&str> {
    line.split_whitespace().nth(n)
}

/// Memory used percentage from /proc/meminfo content. Unavailable as a
/// whole if either half-value is missing or the total is zero.
fn parse_mem_used_pct(content: &str) -> Option<f64> {
    let mut total: Option<i64> = None;
    let mut available: Option<i64> = None;

    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            total = field_after(line, 1).and_then(|v| v.parse().ok());
        } else if line.starts_with("MemAvailable:") {
            available = field_after(line, 1).and_then(|v| v.parse().ok());
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }

    let (total, available) = (total?, available?);
    if total == 0 {
        return None;
    }
    Some((1.0 - (available as f64 / total as f64)) * 100.0)
}

/// procs_running and procs_blocked from /proc/stat content.
fn parse_proc_counts(content: &str) -> (Option<i64>, Option<i64>) {
    let mut running = None;
    let mut blocked = None;

    for line in content.lines() {
        if line.starts_with("procs_running") {
            running = field_after(line, 1).and_then(|v| v.parse().ok());
        } else if line.starts_with("procs_blocked") {
            blocked = field_after(line, 1).and_then(|v| v.parse().ok());
        }
        if running.is_some() && blocked.is_some() {
            break;
        }
    }

    (running, blocked)
}

/// The three load-average windows from /proc/loadavg content.
fn parse_loadavg(content: &str) -> Option<(f64, f64, f64)> {
    let mut fields = content.split_whitespace();
    let one = fields.next()?.parse().ok()?;
    let five = fields.next()?.parse().ok()?;
    let fifteen = fields.next()?.parse().ok()?;
    Some((one, five, fifteen))
}

/// avg10 ratios for the "some" and "full" lines of /proc/pressure/cpu.
fn parse_psi_avg10(content: &str) -> (Option<f64>, Option<f64>) {
    let mut some = None;
    let mut full = None;

    for line in content.lines() {
        let line = line.trim();
        let slot = if line.starts_with("some ") {
            &mut some
        } else if line.starts_with("full ") {
            &mut full
        } else {
            continue;
        };
        for token in line.split_whitespace() {
            if let Some(value) = token.strip_prefix("avg10=") {
                *slot = parse_decimal(value);
            }
        }
    }

    (some, full)
}

/// VmRSS, VmSize and Threads from /proc/<pid>/status content.
fn parse_pid_status(content: &str) -> (Option<i64>, Option<i64>, Option<i64>) {
    let mut rss = None;
    let mut vms = None;
    let mut threads = None;

    for line in content.lines() {
        if line.starts_with("VmRSS:") {
            rss = field_after(line, 1).and_then(|v| v.parse().ok());
        } else if line.starts_with("VmSize:") {
            vms = field_after(line, 1).and_then(|v| v.parse().ok());
        } else if line.starts_with("Threads:") {
            threads = field_after(line, 1).and_then(|v| v.parse().ok());
        }
    }

    (rss, vms, threads)
}

/// Cumulative read_bytes/write_bytes from /proc/<pid>/io content.
fn parse_pid_io(content: &str) -> (Option<i64>, Option<i64>) {
    let mut read = None;
    let mut write = None;

    for line in content.lines() {
        if line.starts_with("read_bytes:") {
            read = field_after(line, 1).and_then(|v| v.parse().ok());
        } else if line.starts_with("write_bytes:") {
            write = field_after(line, 1).and_then(|v| v.parse().ok());
        }
    }

    (read, write)
}

/// Reader over a procfs root. The root is carried so tests can point it at
/// a fixture directory.
pub struct ProcReader {
    root: PathBuf,
}

impl ProcReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read(&self, rel: &str) -> Option<String> {
        let path = self.root.join(rel);
        match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Collect system-wide features into the snapshot. Each source degrades
    /// independently; a missing file only omits its own keys.
    pub fn system_features(&self, snap: &mut FeatureSnapshot) {
        if let Some(content) = self.read("meminfo") {
            if let Some(pct) = parse_mem_used_pct(&content) {
                snap.insert(MEM_USED_PCT, pct);
            }
        }

        if let Some(content) = self.read("stat") {
            let (running, blocked) = parse_proc_counts(&content);
            if let Some(v) = running {
                snap.insert(PROCS_RUNNING, v as f64);
            }
            if let Some(v) = blocked {
                snap.insert(PROCS_BLOCKED, v as f64);
            }
        }

        if let Some(content) = self.read("loadavg") {
            if let Some((one, five, fifteen)) = parse_loadavg(&content) {
                snap.insert(LOADAVG1, one);
                snap.insert(LOADAVG5, five);
                snap.insert(LOADAVG15, fifteen);
            }
        }

        if let Some(content) = self.read("pressure/cpu") {
            let (some, full) = parse_psi_avg10(&content);
            if let Some(v) = some {
                snap.insert(PSI_CPU_SOME, v);
            }
            if let Some(v) = full {
                snap.insert(PSI_CPU_FULL, v);
            }
        }
    }

    /// Collect per-process features for the held target. The process may
    /// exit between samples; whatever cannot be read is simply absent.
    pub fn process_features(&self, pid: u32, snap: &mut FeatureSnapshot) {
        if let Some(content) = self.read(&format!("{}/status", pid)) {
            let (rss, vms, threads) = parse_pid_status(&content);
            if let Some(v) = rss {
                snap.insert(PROC_RSS_KB, v as f64);
            }
            if let Some(v) = vms {
                snap.insert(PROC_VMS_KB, v as f64);
            }
            if let Some(v) = threads {
                snap.insert(PROC_THREADS, v as f64);
            }
        }

        if let Some(content) = self.read(&format!("{}/io", pid)) {
            let (read, write) = parse_pid_io(&content);
            if let Some(v) = read {
                snap.insert(PROC_READ_BYTES, v as f64);
            }
            if let Some(v) = write {
                snap.insert(PROC_WRITE_BYTES, v as f64);
            }
        }
    }
}
