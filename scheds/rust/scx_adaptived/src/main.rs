// SPDX-License-Identifier: GPL-2.0
//
// scx_adaptived: userspace boost controller for the adaptive_sched kernel
// module.
//
// Polls kernel and /proc load metrics, keeps one favored process selected
// with hysteresis, and pushes a discrete boost level (0-3) back through the
// module's sysfs interface.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

mod feature_log;
mod features;
mod model;
mod policy;
mod process;
mod sysfs;
mod target;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};

use crate::feature_log::FeatureLog;
use crate::features::{FeatureSnapshot, ProcReader};
use crate::model::BoostModel;
use crate::policy::{BoostPolicy, RunMode};
use crate::process::{pick_candidate, ProcessSampler, PsSampler};
use crate::sysfs::KernelIface;
use crate::target::{SwitchPolicy, TargetTracker};

const DAEMON_NAME: &str = "scx_adaptived";

#[derive(Debug, Parser)]
struct Opts {
    /// Decision mode: rule (alias: base), ml, or hybrid.
    #[clap(long, env = "ADAPTIVE_MODE", default_value = "hybrid")]
    mode: String,

    /// Base directory of the adaptive_sched sysfs interface.
    #[clap(long, default_value = sysfs::DEFAULT_SYSFS_BASE)]
    sysfs_base: PathBuf,

    /// Polling interval in milliseconds.
    #[clap(short = 'i', long, default_value = "500")]
    interval_ms: u64,

    /// Trained boost model artifact (JSON) for the ml and hybrid modes.
    #[clap(short = 'm', long, default_value = "logs/model.json")]
    model: PathBuf,

    /// Fail at startup instead of falling back to rule-only decisions when
    /// the selected mode needs a model that cannot be loaded.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    require_model: bool,

    /// Append one feature record per tick to this CSV file for offline
    /// model training.
    #[clap(long)]
    features_csv: Option<PathBuf>,

    /// Reset boost_level and target_pid on shutdown instead of leaving the
    /// last written values in place.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    reset_on_exit: bool,

    /// Enable verbose output, including per-tick no-change lines.
    #[clap(short = 'v', long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    /// Print version and exit.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    version: bool,
}

/// The control loop: one instance owns the kernel interface, the metric
/// readers, the target tracker and the decision policy, and runs them
/// synchronously on a fixed cadence.
struct Controller<S> {
    kernel: KernelIface,
    proc: ProcReader,
    sampler: S,
    tracker: TargetTracker,
    policy: BoostPolicy,
    feature_log: Option<FeatureLog>,
}

impl<S: ProcessSampler> Controller<S> {
    /// One iteration: reads, target maintenance, decision, writes.
    fn tick(&mut self, now: Instant) {
        let (avg_load, max_load) = self.kernel.read_loads();

        let mut snap = FeatureSnapshot::new();
        self.proc.system_features(&mut snap);

        if self.tracker.pid().is_none() {
            let min_cpu = self.tracker.policy().adopt_min_cpu;
            let Some(candidate) = pick_candidate(&mut self.sampler, min_cpu) else {
                info!("no suitable target process found (cpu too low)");
                return;
            };
            if !self.kernel.set_target(candidate.pid) {
                // Not adopted; the next tick retries from the listing.
                return;
            }
            self.tracker.adopt(candidate.pid, now);
            info!("target_pid set to {}", candidate.pid);
        }

        let Some(pid) = self.tracker.pid() else {
            return;
        };

        let proc_cpu = self.sampler.sample_cpu(pid);
        if self
            .tracker
            .observe(proc_cpu, &mut self.sampler, now)
            .is_some()
        {
            // Every transition back to unassigned zeroes the boost.
            self.kernel.apply_boost(0);
            return;
        }
        let Some(proc_cpu) = proc_cpu else {
            return;
        };

        self.proc.process_features(pid, &mut snap);
        snap.insert(features::AVG_LOAD, avg_load.unwrap_or(0) as f64);
        snap.insert(features::MAX_LOAD, max_load.unwrap_or(0) as f64);
        snap.insert(features::PROC_CPU, proc_cpu);
        snap.insert(features::TARGET_PID, f64::from(pid));

        let boost = self.policy.decide(avg_load, max_load, Some(proc_cpu), &snap);

        if self.kernel.last_boost() != Some(boost) {
            if self.kernel.apply_boost(boost) {
                info!(
                    "boost_level={} (mode={}, avg={}%, max={}%, proc_cpu={:.1}%, \
                     mem_used={:.1}%, procs_running={}, pid={})",
                    boost,
                    self.policy.mode().as_str(),
                    avg_load.unwrap_or(0),
                    max_load.unwrap_or(0),
                    proc_cpu,
                    snap.get_or_zero(features::MEM_USED_PCT),
                    snap.get_or_zero(features::PROCS_RUNNING) as i64,
                    pid
                );
            }
        } else {
            debug!(
                "no change: boost={}, avg={}%, max={}%, proc_cpu={:.1}%, pid={}",
                boost,
                avg_load.unwrap_or(0),
                max_load.unwrap_or(0),
                proc_cpu,
                pid
            );
        }

        if let Some(log) = &mut self.feature_log {
            log.append(&snap, boost);
        }
    }

    fn run(&mut self, shutdown: &AtomicBool, interval: Duration) {
        while !shutdown.load(Ordering::Relaxed) {
            self.tick(Instant::now());
            thread::sleep(interval);
        }
    }

    /// Shutdown courtesy, behind --reset-on-exit: hand the kernel a clean
    /// slate instead of leaving the last boost in place.
    fn reset_kernel_state(&mut self) {
        self.tracker.clear();
        self.kernel.set_target(0);
        self.kernel.apply_boost(0);
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if opts.version {
        println!("{} {}", DAEMON_NAME, env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let loglevel = if opts.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };

    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_offset_to_local()
        .expect("Failed to set local time offset")
        .set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let mode = RunMode::parse(&opts.mode)?;
    let model = if mode.needs_model() {
        match BoostModel::load(&opts.model) {
            Ok(model) => {
                info!(
                    "loaded boost model from {} ({} trees, {} features)",
                    opts.model.display(),
                    model.tree_count(),
                    model.feature_names().len()
                );
                Some(model)
            }
            Err(e) if opts.require_model => {
                return Err(e.context("boost model required but unavailable"));
            }
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        }
    } else {
        None
    };
    let policy = BoostPolicy::new(mode, model);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Error setting Ctrl-C handler")?;

    info!(
        "{} started (mode={}, sysfs={})",
        DAEMON_NAME,
        policy.mode().as_str(),
        opts.sysfs_base.display()
    );

    let mut controller = Controller {
        kernel: KernelIface::new(&opts.sysfs_base),
        proc: ProcReader::new("/proc"),
        sampler: PsSampler,
        tracker: TargetTracker::new(SwitchPolicy::default()),
        policy,
        feature_log: opts.features_csv.as_ref().map(FeatureLog::new),
    };

    controller.run(&shutdown, Duration::from_millis(opts.interval_ms));

    if opts.reset_on_exit {
        info!("resetting boost and target before exit");
        controller.reset_kernel_state();
    }
    info!("{} stopped", DAEMON_NAME);

    Ok(())
}
