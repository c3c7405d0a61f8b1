#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Validated, `serde`-friendly options for the autoscaler core.
//!
//! `spec.md` §1 places YAML manifest parsing and the CLI surface out of the
//! core's scope — the hosting controller owns loading these fields from
//! wherever it likes (file, env, flags). This crate only keeps what the
//! teacher's own `config` crate still usefully models once file I/O is
//! stripped out: a `Validate`-derived options struct with documented,
//! `serde`-defaulted fields, following the teacher's `PipelineConfig`
//! pattern (`#[validate(range(min = .., max = ..))]` + `#[serde(default = "fn")]`).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Errors for the config module.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A [`ScalerOptions`] value failed its range/shape validation.
    #[error("invalid scaler options: {message}")]
    InvalidConfig {
        /// Human-readable description of what failed.
        message: String,
    },
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Error::InvalidConfig {
            message: errors.to_string(),
        }
    }
}

/// Constructor options for [`crate::ScalerOptions::workers`]'s default.
const DEFAULT_WORKERS: u32 = 20;
/// Default rotation period the dispatcher aims to revisit every watched key
/// within, regardless of watch-set size (`spec.md` §4.7).
const DEFAULT_TASK_INTERVAL_MS: u64 = 30_000;
/// Default [`daemon::DaemonClientPool`] capacity (`spec.md` §2).
const DEFAULT_CLIENTS_CACHE_SIZE: usize = 100;
/// Default back-pressure fill-ratio threshold (`spec.md` §4.5).
const DEFAULT_BACK_PRESSURE_THRESHOLD: f64 = 0.9;

fn default_workers() -> u32 {
    DEFAULT_WORKERS
}

fn default_task_interval_ms() -> u64 {
    DEFAULT_TASK_INTERVAL_MS
}

fn default_clients_cache_size() -> usize {
    DEFAULT_CLIENTS_CACHE_SIZE
}

fn default_back_pressure_threshold() -> f64 {
    DEFAULT_BACK_PRESSURE_THRESHOLD
}

/// Constructor options recognized by `NewScaler` (`spec.md` §6): `{workers,
/// taskIntervalMs, clientsCacheSize, backPressureThreshold}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Validate)]
pub struct ScalerOptions {
    /// Number of long-lived worker tasks draining the dispatcher's task
    /// channel.
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 1000))]
    pub workers: u32,

    /// Milliseconds within which every watched key should be revisited once,
    /// regardless of watch-set size; the dispatcher's actual per-key sleep is
    /// `taskIntervalMs / max(1, watchSetLength)`.
    #[serde(default = "default_task_interval_ms")]
    #[validate(range(min = 1))]
    pub task_interval_ms: u64,

    /// Capacity of the [`daemon::DaemonClientPool`].
    #[serde(default = "default_clients_cache_size")]
    #[validate(range(min = 1))]
    pub clients_cache_size: usize,

    /// Downstream buffer fill ratio (`pending / length`) at or above which
    /// [`scaling::has_back_pressure`] reports pressure.
    #[serde(default = "default_back_pressure_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub back_pressure_threshold: f64,
}

impl Default for ScalerOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            task_interval_ms: default_task_interval_ms(),
            clients_cache_size: default_clients_cache_size(),
            back_pressure_threshold: default_back_pressure_threshold(),
        }
    }
}

impl ScalerOptions {
    /// Validates this options value, returning [`Error::InvalidConfig`] if
    /// any field is out of range.
    pub fn validate_options(&self) -> Result<(), Error> {
        self.validate()?;
        Ok(())
    }
}
