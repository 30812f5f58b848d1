// SPDX-License-Identifier: GPL-2.0
//
// scx_adaptived: process enumeration and per-pid CPU sampling.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::process::Command;

use log::{info, warn};

use crate::features::parse_decimal;

/// Command-name prefixes that must never be adopted as boost targets:
/// kernel housekeeping, this daemon itself, and the desktop shell.
const EXCLUDED_COMM_PREFIXES: &[&str] = &[
    "systemd",
    "kthreadd",
    "rcu_",
    "migration",
    "idle",
    "scx_adaptived",
    "gnome-shell",
    "Xorg",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ProcEntry {
    pub pid: u32,
    pub comm: String,
    pub cpu_pct: f64,
}

/// Narrow capability over the external process listing facility, so the
/// tracker and control loop can run against a fixed process table in tests.
pub trait ProcessSampler {
    /// All processes ordered by descending CPU share. None when the listing
    /// call fails.
    fn list_by_cpu(&mut self) -> Option<Vec<ProcEntry>>;

    /// Point-in-time CPU share of one pid. None when the process no longer
    /// exists or the query fails.
    fn sample_cpu(&mut self, pid: u32) -> Option<f64>;
}

/// First listed process at or above `min_cpu_pct` that is not on the
/// exclusion list. None when the listing fails or nothing qualifies.
pub fn pick_candidate(
    sampler: &mut dyn ProcessSampler,
    min_cpu_pct: f64,
) -> Option<ProcEntry> {
    let entries = sampler.list_by_cpu()?;

    for entry in entries {
        if entry.cpu_pct < min_cpu_pct {
            continue;
        }
        if EXCLUDED_COMM_PREFIXES
            .iter()
            .any(|p| entry.comm.starts_with(p))
        {
            continue;
        }
        info!(
            "selected target pid={} (comm={}, cpu={:.1}%)",
            entry.pid, entry.comm, entry.cpu_pct
        );
        return Some(entry);
    }

    None
}

/// Production sampler shelling out to ps. A point-in-time CPU-share listing
/// trades precision for simplicity; the controller only needs coarse tiers.
pub struct PsSampler;

impl ProcessSampler for PsSampler {
    fn list_by_cpu(&mut self) -> Option<Vec<ProcEntry>> {
        let output = match Command::new("ps")
            .args(["-eo", "pid,comm,pcpu", "--sort=-pcpu"])
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                warn!("ps listing failed to start: {}", e);
                return None;
            }
        };
        if !output.status.success() {
            warn!("ps listing failed: {}", output.status);
            return None;
        }

        Some(parse_ps_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn sample_cpu(&mut self, pid: u32) -> Option<f64> {
        let output = Command::new("ps")
            .args(["-p", &pid.to_string(), "-o", "pcpu="])
            .output()
            .ok()?;
        // ps exits non-zero when the pid is gone.
        if !output.status.success() {
            return None;
        }
        parse_decimal(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `ps -eo pid,comm,pcpu` output: skip the header row, skip rows that
/// do not parse.
fn parse_ps_listing(stdout: &str) -> Vec<ProcEntry> {
    let mut entries = Vec::new();

    for line in stdout.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let Ok(pid) = fields[0].parse::<u32>() else {
            continue;
        };
        let Some(cpu_pct) = parse_decimal(fields[2]) else {
            continue;
        };
        entries.push(ProcEntry {
            pid,
            comm: fields[1].to_string(),
            cpu_pct,
        });
    }

    entries
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSampler;
    use super::*;

    #[test]
    fn test_parse_ps_listing() {
        let stdout = "    PID COMMAND         %CPU\n\
                      1234 ffmpeg          93,5\n\
                      5678 cargo           12.0\n\
                      garbage row\n\
                      9 x\n";
        let entries = parse_ps_listing(stdout);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pid, 1234);
        assert_eq!(entries[0].comm, "ffmpeg");
        assert_eq!(entries[0].cpu_pct, 93.5);
        assert_eq!(entries[1].pid, 5678);
    }

    #[test]
    fn test_pick_candidate_threshold_and_exclusions() {
        let mut sampler = FakeSampler::default();
        sampler.push(1, "systemd", 40.0);
        sampler.push(900, "gnome-shell", 25.0);
        sampler.push(1234, "ffmpeg", 20.0);
        sampler.push(77, "bash", 0.5);

        // Excluded comms are skipped even though they lead the listing.
        let picked = pick_candidate(&mut sampler, 5.0).unwrap();
        assert_eq!(picked.pid, 1234);

        // Nothing qualifies above the threshold.
        assert!(pick_candidate(&mut sampler, 50.0).is_none());
    }

    #[test]
    fn test_pick_candidate_listing_failure() {
        let mut sampler = FakeSampler::with_process(1234, "ffmpeg", 50.0);
        sampler.fail_listing = true;
        assert!(pick_candidate(&mut sampler, 5.0).is_none());
    }
}
