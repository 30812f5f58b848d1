// SPDX-License-Identifier: GPL-2.0
//
// scx_adaptived: sysfs interface to the adaptive_sched kernel module.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

pub const DEFAULT_SYSFS_BASE: &str = "/sys/kernel/adaptive_sched";

const CURRENT_LOAD: &str = "current_load";
const MAX_LOAD: &str = "max_load";
const TARGET_PID: &str = "target_pid";
const BOOST_LEVEL: &str = "boost_level";

/// Read an integer from a sysfs/proc scalar file. Missing files, permission
/// errors and non-integer text all degrade to None.
pub fn read_int(path: &Path) -> Option<i64> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to read int from {}: {}", path.display(), e);
            return None;
        }
    };
    match text.trim().parse::<i64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("failed to parse int from {}: {}", path.display(), e);
            None
        }
    }
}

/// Write an integer to a sysfs scalar file. Returns true on success.
pub fn write_int(path: &Path, value: i64) -> bool {
    match fs::write(path, value.to_string()) {
        Ok(()) => true,
        Err(e) => {
            warn!("failed to write {} to {}: {}", value, path.display(), e);
            false
        }
    }
}

/// Handle on the adaptive_sched sysfs directory.
///
/// Tracks the last boost level that was actually accepted by the kernel so
/// redundant writes are skipped; a failed write leaves the tracked value
/// untouched and the next apply_boost() call retries.
pub struct KernelIface {
    base: PathBuf,
    last_boost: Option<u8>,
}

impl KernelIface {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            last_boost: None,
        }
    }

    /// Read current_load and max_load from the kernel module.
    pub fn read_loads(&self) -> (Option<i64>, Option<i64>) {
        (
            read_int(&self.base.join(CURRENT_LOAD)),
            read_int(&self.base.join(MAX_LOAD)),
        )
    }

    /// Tell the kernel which pid to favor. Returns true on success.
    pub fn set_target(&self, pid: u32) -> bool {
        write_int(&self.base.join(TARGET_PID), i64::from(pid))
    }

    /// Request a boost level, skipping the write when it matches the last
    /// successfully written value. Returns true when the kernel now holds
    /// `level` as far as this process knows.
    pub fn apply_boost(&mut self, level: u8) -> bool {
        if self.last_boost == Some(level) {
            return true;
        }
        if write_int(&self.base.join(BOOST_LEVEL), i64::from(level)) {
            self.last_boost = Some(level);
            true
        } else {
            false
        }
    }

    pub fn last_boost(&self) -> Option<u8> {
        self.last_boost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_int() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CURRENT_LOAD);

        fs::write(&path, "57\n").unwrap();
        assert_eq!(read_int(&path), Some(57));

        fs::write(&path, "not a number").unwrap();
        assert_eq!(read_int(&path), None);

        // Integer readers reject fractional text.
        fs::write(&path, "57.0").unwrap();
        assert_eq!(read_int(&path), None);

        assert_eq!(read_int(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_apply_boost_skips_redundant_writes() {
        let dir = tempdir().unwrap();
        let mut iface = KernelIface::new(dir.path());

        assert!(iface.apply_boost(2));
        let boost_path = dir.path().join(BOOST_LEVEL);
        assert_eq!(fs::read_to_string(&boost_path).unwrap(), "2");

        // Clobber the file behind the actuator's back; a repeated apply with
        // the same level must not touch it.
        fs::write(&boost_path, "9").unwrap();
        assert!(iface.apply_boost(2));
        assert_eq!(fs::read_to_string(&boost_path).unwrap(), "9");

        // A different level does write.
        assert!(iface.apply_boost(0));
        assert_eq!(fs::read_to_string(&boost_path).unwrap(), "0");
    }

    #[test]
    fn test_apply_boost_retries_after_failed_write() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("adaptive_sched");
        let mut iface = KernelIface::new(&base);

        // Base directory does not exist yet, so the write fails and the
        // tracked value stays unset.
        assert!(!iface.apply_boost(3));
        assert_eq!(iface.last_boost(), None);

        // Once the interface appears the same level goes through.
        fs::create_dir(&base).unwrap();
        assert!(iface.apply_boost(3));
        assert_eq!(iface.last_boost(), Some(3));
        assert_eq!(
            fs::read_to_string(base.join(BOOST_LEVEL)).unwrap(),
            "3"
        );
    }
}
