// SPDX-License-Identifier: GPL-2.0
//
// scx_adaptived: target process tracking and auto-switch hysteresis.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

use std::time::{Duration, Instant};

use log::info;

use crate::process::{pick_candidate, ProcessSampler};

/// Thresholds governing target adoption and eviction.
#[derive(Debug, Clone)]
pub struct SwitchPolicy {
    /// Minimum CPU share for a process to be adopted as target.
    pub adopt_min_cpu: f64,
    /// Below this share a sample counts toward the idle streak.
    pub idle_cpu_threshold: f64,
    /// Consecutive idle samples that trigger eviction.
    pub idle_streak_trigger: u32,
    /// Competitors are only searched among processes at or above this share.
    pub competitor_min_cpu: f64,
    /// A competitor must exceed the held share by this many points.
    pub competitor_margin: f64,
    /// Holds longer than this become eligible for stale eviction.
    pub max_hold: Duration,
    /// Stale eviction additionally requires the share to be below this.
    pub stale_cpu_threshold: f64,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self {
            adopt_min_cpu: 5.0,
            idle_cpu_threshold: 2.0,
            idle_streak_trigger: 4,
            competitor_min_cpu: 10.0,
            competitor_margin: 30.0,
            max_hold: Duration::from_secs(10),
            stale_cpu_threshold: 5.0,
        }
    }
}

/// Why a held target was dropped. When several conditions qualify on the
/// same tick, the first in idle -> competition -> stale order is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    ProcessGone,
    SustainedIdle,
    HighCompetition,
    StaleHold,
}

#[derive(Debug, Clone)]
struct Held {
    pid: u32,
    hold_since: Instant,
    idle_streak: u32,
}

/// Owns the currently favored process. The control loop threads this value
/// through every tick; there is no ambient state, so the state machine runs
/// unchanged against a fake process table.
pub struct TargetTracker {
    policy: SwitchPolicy,
    held: Option<Held>,
}

impl TargetTracker {
    pub fn new(policy: SwitchPolicy) -> Self {
        Self { policy, held: None }
    }

    pub fn policy(&self) -> &SwitchPolicy {
        &self.policy
    }

    pub fn pid(&self) -> Option<u32> {
        self.held.as_ref().map(|h| h.pid)
    }

    #[cfg(test)]
    fn idle_streak(&self) -> u32 {
        self.held.as_ref().map(|h| h.idle_streak).unwrap_or(0)
    }

    #[cfg(test)]
    fn hold_duration(&self, now: Instant) -> Option<Duration> {
        self.held.as_ref().map(|h| now.duration_since(h.hold_since))
    }

    /// Start holding `pid`, resetting the idle streak and hold timer.
    pub fn adopt(&mut self, pid: u32, now: Instant) {
        self.held = Some(Held {
            pid,
            hold_since: now,
            idle_streak: 0,
        });
    }

    /// One sampling tick for the held target. Updates the idle streak and
    /// evaluates the eviction conditions; on eviction the tracker returns
    /// to unassigned and reports why. Returns None while the hold survives.
    ///
    /// `proc_cpu` of None means the process vanished between samples.
    pub fn observe(
        &mut self,
        proc_cpu: Option<f64>,
        sampler: &mut dyn ProcessSampler,
        now: Instant,
    ) -> Option<DropReason> {
        let held = self.held.as_mut()?;
        let pid = held.pid;

        let Some(cpu) = proc_cpu else {
            self.held = None;
            info!("target pid {} is gone, resetting", pid);
            return Some(DropReason::ProcessGone);
        };

        if cpu < self.policy.idle_cpu_threshold {
            held.idle_streak += 1;
        } else {
            held.idle_streak = 0;
        }
        let idle = held.idle_streak >= self.policy.idle_streak_trigger;
        let hold_elapsed = now.duration_since(held.hold_since);

        // Competition scan uses a stricter threshold so only genuinely
        // heavier tasks can displace the hold.
        let competition = match pick_candidate(sampler, self.policy.competitor_min_cpu) {
            Some(competitor) if competitor.pid != pid => sampler
                .sample_cpu(competitor.pid)
                .is_some_and(|comp_cpu| comp_cpu > cpu + self.policy.competitor_margin),
            _ => false,
        };

        let stale =
            hold_elapsed > self.policy.max_hold && cpu < self.policy.stale_cpu_threshold;

        if !(idle || competition || stale) {
            return None;
        }

        info!(
            "auto-switching target pid {} (proc_cpu={:.1}%, idle={}, competition={}, stale={})",
            pid, cpu, idle, competition, stale
        );
        self.held = None;
        Some(if idle {
            DropReason::SustainedIdle
        } else if competition {
            DropReason::HighCompetition
        } else {
            DropReason::StaleHold
        })
    }

    /// Force the tracker back to unassigned (shutdown path).
    pub fn clear(&mut self) {
        self.held = None;
    }
}
