//! Process memory guard.
//!
//! Samples resident memory on a fixed period and terminates the process once
//! a ceiling is exceeded, leaving the restart to an external supervisor.

use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use session_relay_core::MemorySample;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;

/// Exit status used when the memory ceiling is breached.
pub const MEMORY_EXIT_CODE: i32 = 1;

/// Source of memory readings.
pub trait MemoryProbe: Send + Sync {
    /// Take one reading, or `None` if the platform cannot report it.
    fn sample(&self) -> Option<MemorySample>;
}

/// Reads the current process through `sysinfo`.
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    #[must_use]
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| tracing::warn!("Cannot resolve own pid, memory sampling disabled: {e}"))
            .ok();
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn sample(&self) -> Option<MemorySample> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
        system
            .process(pid)
            .map(|p| MemorySample::new(p.memory(), p.virtual_memory()))
    }
}

/// Probe that always reports the same figures.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    pub resident_set_bytes: u64,
    pub virtual_bytes: u64,
}

impl FixedProbe {
    #[must_use]
    pub const fn megabytes(rss_mb: u64) -> Self {
        Self {
            resident_set_bytes: rss_mb * 1024 * 1024,
            virtual_bytes: rss_mb * 2 * 1024 * 1024,
        }
    }
}

impl MemoryProbe for FixedProbe {
    fn sample(&self) -> Option<MemorySample> {
        Some(MemorySample::new(self.resident_set_bytes, self.virtual_bytes))
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryVerdict {
    Healthy(MemorySample),
    OverCeiling(MemorySample),
    Unavailable,
}

/// Action taken on breach; receives the exit code.
pub type ExitHook = Arc<dyn Fn(i32) + Send + Sync>;

fn exit_process(code: i32) {
    std::process::exit(code)
}

/// Enforces a resident-set ceiling.
pub struct MemoryGuard {
    probe: Box<dyn MemoryProbe>,
    ceiling_mb: u64,
    on_breach: ExitHook,
    latest: RwLock<Option<MemorySample>>,
}

impl MemoryGuard {
    /// Guard that exits the process when resident memory exceeds `ceiling_mb`.
    #[must_use]
    pub fn new(probe: impl MemoryProbe + 'static, ceiling_mb: u64) -> Self {
        Self {
            probe: Box::new(probe),
            ceiling_mb,
            on_breach: Arc::new(exit_process),
            latest: RwLock::new(None),
        }
    }

    /// Replace the breach action (the default exits the process).
    #[must_use]
    pub fn with_exit_hook(mut self, hook: ExitHook) -> Self {
        self.on_breach = hook;
        self
    }

    #[must_use]
    pub const fn ceiling_mb(&self) -> u64 {
        self.ceiling_mb
    }

    /// Most recent reading.
    #[must_use]
    pub fn latest(&self) -> Option<MemorySample> {
        *self.latest.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sample once and enforce the ceiling.
    pub fn check(&self) -> MemoryVerdict {
        let Some(sample) = self.probe.sample() else {
            return MemoryVerdict::Unavailable;
        };
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(sample);

        let rss_mb = sample.resident_set_mb();
        if rss_mb > self.ceiling_mb {
            tracing::error!(
                rss_mb,
                ceiling_mb = self.ceiling_mb,
                "Memory ceiling exceeded, exiting for supervisor restart"
            );
            (self.on_breach)(MEMORY_EXIT_CODE);
            return MemoryVerdict::OverCeiling(sample);
        }

        tracing::trace!(rss_mb, ceiling_mb = self.ceiling_mb, "Memory sample");
        MemoryVerdict::Healthy(sample)
    }

    /// Check on a fixed period until the task is aborted.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check();
            }
        })
    }
}
