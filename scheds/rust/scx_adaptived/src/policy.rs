// SPDX-License-Identifier: GPL-2.0
//
// scx_adaptived: boost level decision strategies.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use anyhow::{bail, Result};
use log::warn;

use crate::features::{FeatureSnapshot, MEM_USED_PCT, PROCS_RUNNING};
use crate::model::BoostModel;

pub const MAX_BOOST: u8 = 3;

/// Rule-based boost decision over system and process signals.
///
/// Each tier ORs a system-wide load clause, a process-specific clause and a
/// combined memory+runqueue clause; either a saturated machine, a single
/// runaway process or a thrashing workload escalates the level. Unknown
/// kernel loads decide nothing.
pub fn decide_boost(
    avg_load: Option<i64>,
    max_load: Option<i64>,
    proc_cpu: Option<f64>,
    snap: &FeatureSnapshot,
) -> u8 {
    let (Some(avg_load), Some(max_load)) = (avg_load, max_load) else {
        return 0;
    };

    let mem_used = snap.get_or_zero(MEM_USED_PCT);
    let procs_running = snap.get_or_zero(PROCS_RUNNING);

    if max_load >= 90
        || proc_cpu.is_some_and(|c| c >= 80.0)
        || (mem_used >= 90.0 && procs_running >= 8.0)
    {
        return 3;
    }
    if avg_load >= 70
        || proc_cpu.is_some_and(|c| c >= 60.0)
        || (mem_used >= 80.0 && procs_running >= 6.0)
    {
        return 2;
    }
    if avg_load >= 40
        || proc_cpu.is_some_and(|c| c >= 30.0)
        || (mem_used >= 70.0 && procs_running >= 4.0)
    {
        return 1;
    }

    0
}

/// Hybrid arbitration: trust the model for near-agreement, fall back to the
/// rule verdict when the model strongly disagrees.
pub fn combine_hybrid(model_boost: u8, rule_boost: u8) -> u8 {
    if model_boost.abs_diff(rule_boost) <= 1 {
        model_boost
    } else {
        rule_boost
    }
}

/// Decision strategy, fixed for the lifetime of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Rule,
    Ml,
    Hybrid,
}

impl RunMode {
    /// "base" is the historical name for rule-only operation.
    pub fn parse(text: &str) -> Result<Self> {
        match text.to_lowercase().as_str() {
            "rule" | "base" => Ok(Self::Rule),
            "ml" => Ok(Self::Ml),
            "hybrid" => Ok(Self::Hybrid),
            other => bail!("unknown mode '{}' (expected rule, ml or hybrid)", other),
        }
    }

    pub fn needs_model(&self) -> bool {
        matches!(self, Self::Ml | Self::Hybrid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Ml => "ml",
            Self::Hybrid => "hybrid",
        }
    }
}

/// The boost policy engine: a run mode plus the optional classifier it may
/// delegate to. Stateless across ticks; every decision starts from scratch.
pub struct BoostPolicy {
    mode: RunMode,
    model: Option<BoostModel>,
}

impl BoostPolicy {
    /// Model-dependent modes degrade to rule-only when no classifier is
    /// available, mirroring the historical fallback.
    pub fn new(mode: RunMode, model: Option<BoostModel>) -> Self {
        let mode = if mode.needs_model() && model.is_none() {
            warn!("mode '{}' has no model, falling back to rule", mode.as_str());
            RunMode::Rule
        } else {
            mode
        };
        Self { mode, model }
    }

    /// The mode actually in effect after any fallback.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn decide(
        &self,
        avg_load: Option<i64>,
        max_load: Option<i64>,
        proc_cpu: Option<f64>,
        snap: &FeatureSnapshot,
    ) -> u8 {
        match self.mode {
            RunMode::Rule => decide_boost(avg_load, max_load, proc_cpu, snap),
            RunMode::Ml => self.predict(snap),
            RunMode::Hybrid => {
                let rule_boost = decide_boost(avg_load, max_load, proc_cpu, snap);
                combine_hybrid(self.predict(snap), rule_boost)
            }
        }
    }

    fn predict(&self, snap: &FeatureSnapshot) -> u8 {
        self.model.as_ref().map_or(0, |m| m.predict(snap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, f64)]) -> FeatureSnapshot {
        let mut snap = FeatureSnapshot::new();
        for (key, value) in pairs {
            snap.insert(key, *value);
        }
        snap
    }

    #[test]
    fn test_unknown_loads_decide_zero() {
        let s = snap(&[(MEM_USED_PCT, 99.0), (PROCS_RUNNING, 20.0)]);
        assert_eq!(decide_boost(None, Some(95), Some(95.0), &s), 0);
        assert_eq!(decide_boost(Some(95), None, Some(95.0), &s), 0);
    }

    #[test]
    fn test_system_saturation_tier() {
        // avg=95, max=95, proc_cpu=10 -> 3 on the system-wide clause.
        let s = snap(&[]);
        assert_eq!(decide_boost(Some(95), Some(95), Some(10.0), &s), 3);
    }

    #[test]
    fn test_process_saturation_tier() {
        // avg=20, max=20, proc_cpu=85 -> 3 on the process clause.
        let s = snap(&[]);
        assert_eq!(decide_boost(Some(20), Some(20), Some(85.0), &s), 3);
    }

    #[test]
    fn test_memory_runqueue_tier() {
        // mem=85/procs=7 hits the 80/6 tier but not 90/8.
        let s = snap(&[(MEM_USED_PCT, 85.0), (PROCS_RUNNING, 7.0)]);
        assert_eq!(decide_boost(Some(50), Some(50), Some(10.0), &s), 2);

        // Either half alone is not enough for the combined clause.
        let s = snap(&[(MEM_USED_PCT, 85.0), (PROCS_RUNNING, 2.0)]);
        assert_eq!(decide_boost(Some(30), Some(30), Some(10.0), &s), 0);
    }

    #[test]
    fn test_tier_ladder() {
        let s = snap(&[]);
        assert_eq!(decide_boost(Some(10), Some(10), Some(5.0), &s), 0);
        assert_eq!(decide_boost(Some(45), Some(45), Some(5.0), &s), 1);
        assert_eq!(decide_boost(Some(72), Some(72), Some(5.0), &s), 2);
        assert_eq!(decide_boost(Some(72), Some(92), Some(5.0), &s), 3);
        assert_eq!(decide_boost(Some(10), Some(10), None, &s), 0);
    }

    #[test]
    fn test_monotonic_in_each_signal() {
        let s = snap(&[]);
        let cpu_steps = [0.0, 25.0, 35.0, 55.0, 65.0, 79.0, 80.0, 100.0];
        let mut prev = 0;
        for cpu in cpu_steps {
            let level = decide_boost(Some(10), Some(10), Some(cpu), &s);
            assert!(level >= prev, "proc_cpu={} regressed to {}", cpu, level);
            prev = level;
        }

        let mut prev = 0;
        for load in [0, 39, 40, 69, 70, 89, 90, 100] {
            let level = decide_boost(Some(load), Some(load), Some(0.0), &s);
            assert!(level >= prev, "load={} regressed to {}", load, level);
            prev = level;
        }
    }

    #[test]
    fn test_combine_hybrid_grid() {
        for model_boost in 0..=MAX_BOOST {
            for rule_boost in 0..=MAX_BOOST {
                let combined = combine_hybrid(model_boost, rule_boost);
                if model_boost.abs_diff(rule_boost) <= 1 {
                    assert_eq!(combined, model_boost);
                } else {
                    assert_eq!(combined, rule_boost);
                }
            }
        }
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(RunMode::parse("Hybrid").unwrap(), RunMode::Hybrid);
        assert_eq!(RunMode::parse("base").unwrap(), RunMode::Rule);
        assert_eq!(RunMode::parse("ml").unwrap(), RunMode::Ml);
        assert!(RunMode::parse("turbo").is_err());
    }

    #[test]
    fn test_modes_without_model_degrade_to_rule() {
        let policy = BoostPolicy::new(RunMode::Hybrid, None);
        assert_eq!(policy.mode(), RunMode::Rule);
        // Degraded policy behaves exactly like the rule table.
        let s = snap(&[]);
        assert_eq!(policy.decide(Some(95), Some(95), Some(10.0), &s), 3);

        let policy = BoostPolicy::new(RunMode::Ml, None);
        assert_eq!(policy.mode(), RunMode::Rule);
    }
}
