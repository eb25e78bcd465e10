//! Memory admission control for the high-fidelity extractor
//!
//! The check is advisory: memory is observed, never reserved.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use sysinfo::System;
use tokio_util::sync::CancellationToken;

use super::wait::{Probe, WaitError, WaitPolicy};
use crate::config::MemoryConfig;
use crate::error::{Error, Result};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of the currently available system memory
pub trait MemoryProbe: Send + Sync {
    /// Available memory in GB
    fn available_gb(&self) -> f64;

    /// Probe name for logging
    fn name(&self) -> &str;
}

/// Reads available memory from the operating system
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn available_gb(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.available_memory() as f64 / BYTES_PER_GB
    }

    fn name(&self) -> &str {
        "system"
    }
}

/// Reports a settable amount of memory
#[derive(Debug)]
pub struct FixedMemoryProbe {
    available_gb: Mutex<f64>,
}

impl FixedMemoryProbe {
    pub fn new(available_gb: f64) -> Self {
        Self {
            available_gb: Mutex::new(available_gb),
        }
    }

    pub fn set(&self, available_gb: f64) {
        *self.available_gb.lock() = available_gb;
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn available_gb(&self) -> f64 {
        *self.available_gb.lock()
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdmissionCheck {
    pub is_available: bool,
    pub available_gb: f64,
    pub required_gb: f64,
}

/// Receives memory-wait transitions for whoever is waiting (usually a job)
pub trait MemoryWaitObserver: Send + Sync {
    /// First insufficient check
    fn wait_started(&self, available_gb: f64, required_gb: f64);

    /// Every later insufficient check
    fn memory_refreshed(&self, available_gb: f64);

    /// Memory became available after waiting
    fn wait_finished(&self, available_gb: f64);
}

/// Gate deciding whether a memory-hungry conversion may start now
#[derive(Clone)]
pub struct MemoryAdmission {
    probe: Arc<dyn MemoryProbe>,
    policy: WaitPolicy,
}

impl MemoryAdmission {
    pub fn new(probe: Arc<dyn MemoryProbe>, policy: WaitPolicy) -> Self {
        Self { probe, policy }
    }

    pub fn from_config(probe: Arc<dyn MemoryProbe>, config: &MemoryConfig) -> Self {
        Self::new(probe, WaitPolicy::new(config.max_wait(), config.poll_interval()))
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    /// Check once whether `required_gb` is available
    pub fn check(&self, required_gb: f64) -> AdmissionCheck {
        let available_gb = self.probe.available_gb();
        AdmissionCheck {
            is_available: available_gb >= required_gb,
            available_gb,
            required_gb,
        }
    }

    /// Wait until `required_gb` is available, reporting progress to `observer`.
    ///
    /// Fails with `ResourceExhausted` once the policy's `max_wait` is spent,
    /// or `Cancelled` if `cancel` fires first.
    pub async fn wait_for_resource(
        &self,
        observer: &dyn MemoryWaitObserver,
        required_gb: f64,
        cancel: &CancellationToken,
    ) -> Result<AdmissionCheck> {
        let probe_name = self.probe.name().to_string();
        let outcome = self
            .policy
            .wait_until(
                || {
                    let check = self.check(required_gb);
                    async move { Probe::new(check.is_available, check) }
                },
                |attempt, check| {
                    if attempt == 0 {
                        tracing::warn!(
                            "Insufficient memory ({} probe): {:.1} GB available, {:.1} GB required; waiting up to {}s",
                            probe_name,
                            check.available_gb,
                            required_gb,
                            self.policy.max_wait.as_secs()
                        );
                        observer.wait_started(check.available_gb, required_gb);
                    } else {
                        tracing::debug!(
                            "Memory recheck {}: {:.1} GB available",
                            attempt,
                            check.available_gb
                        );
                        observer.memory_refreshed(check.available_gb);
                    }
                },
                cancel,
            )
            .await;

        match outcome {
            Ok(waited) => {
                if waited.pending_polls > 0 {
                    tracing::info!(
                        "Memory available after {:.0}s: {:.1} GB",
                        waited.waited.as_secs_f64(),
                        waited.observation.available_gb
                    );
                    observer.wait_finished(waited.observation.available_gb);
                }
                Ok(waited.observation)
            }
            Err(WaitError::TimedOut { waited, last }) => Err(Error::ResourceExhausted {
                waited_secs: waited.as_secs(),
                available_gb: last.available_gb,
                required_gb,
            }),
            Err(WaitError::Cancelled) => Err(Error::Cancelled),
        }
    }
}
