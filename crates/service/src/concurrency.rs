//! Concurrency planning module for clipsqueeze
//!
//! Derives the process-wide encoder concurrency limit from CPU core count and configuration.

use crate::config::Config;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of encode sessions running at once
    pub max_concurrent_encodes: u32,
    /// Encoder threads handed to each session
    pub threads_per_encode: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// - Detects CPU cores via num_cpus
    /// - Uses `jobs.max_concurrent_encodes` when non-zero, otherwise `max(1, cores / 4)`
    /// - Splits the cores evenly across concurrent encodes (at least one thread each)
    pub fn derive(cfg: &Config) -> Self {
        Self::for_cores(num_cpus::get() as u32, cfg.jobs.max_concurrent_encodes)
    }

    /// Derive a plan for an explicit core count (0 cores is treated as 1)
    pub fn for_cores(total_cores: u32, explicit_limit: u32) -> Self {
        let total_cores = total_cores.max(1);

        let max_concurrent_encodes = if explicit_limit > 0 {
            explicit_limit
        } else {
            derive_max_encodes(total_cores)
        };

        let threads_per_encode = (total_cores / max_concurrent_encodes).max(1);

        Self {
            total_cores,
            max_concurrent_encodes,
            threads_per_encode,
        }
    }
}

/// One encode per four cores, never fewer than one
fn derive_max_encodes(cores: u32) -> u32 {
    (cores / 4).max(1)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
