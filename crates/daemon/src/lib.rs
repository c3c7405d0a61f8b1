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

//! Per-pipeline daemon RPC data model, the outbound `DaemonClient` /
//! `DaemonClientFactory` traits, and the [`DaemonClientPool`] connection
//! pool keyed by daemon URL.

use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;

pub mod pool;

pub use pool::DaemonClientPool;

/// Label the core reads from daemon-reported rates/pendings maps; all other
/// labels are ignored.
pub const DEFAULT_LABEL: &str = "default";

/// Sentinel value meaning "pending count not available". Unreachable by any
/// real pending count (which is always `>= 0`).
pub const PENDING_NOT_AVAILABLE: i64 = i64::MIN;

/// All the errors that can occur calling a daemon.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The RPC itself failed (transport, timeout, daemon-side error).
    #[error("daemon RPC error (reason: {reason})")]
    Rpc {
        /// The error message.
        reason: String,
    },

    /// The daemon returned a `BufferInfo` missing `bufferLength` or
    /// `bufferUsageLimit`. Per `spec.md` §7 this is a contract violation,
    /// not a scaling decision, and fails the whole evaluation cycle.
    #[error("buffer info for '{buffer}' missing required fields")]
    ContractViolation {
        /// The buffer whose info was incomplete.
        buffer: String,
    },
}

/// A single partition's metrics, as reported by the daemon.
#[derive(Debug, Clone, Default)]
pub struct PartitionMetrics {
    /// The partition index.
    pub partition: u32,
    /// Processing rates by label (messages/second).
    pub processing_rates: HashMap<String, f64>,
    /// Pending counts by label.
    pub pendings: HashMap<String, i64>,
}

impl PartitionMetrics {
    /// The `"default"`-labeled processing rate, or `None` if missing,
    /// negative, or non-finite ("no signal — skip this cycle").
    pub fn rate(&self) -> Option<f64> {
        match self.processing_rates.get(DEFAULT_LABEL) {
            Some(&rate) if rate.is_finite() && rate >= 0.0 => Some(rate),
            _ => None,
        }
    }

    /// The `"default"`-labeled pending count, or `None` if missing,
    /// negative, or the [`PENDING_NOT_AVAILABLE`] sentinel.
    pub fn pending(&self) -> Option<i64> {
        match self.pendings.get(DEFAULT_LABEL) {
            Some(&pending) if pending >= 0 && pending != PENDING_NOT_AVAILABLE => Some(pending),
            _ => None,
        }
    }
}

/// A buffer's physical capacity and the fraction of it the system will use.
#[derive(Debug, Clone, Default)]
pub struct BufferInfo {
    /// The buffer's name.
    pub buffer_name: String,
    /// Total buffer length, if reported.
    pub buffer_length: Option<i64>,
    /// Usage limit as a fraction in `[0, 1]`, if reported.
    pub buffer_usage_limit: Option<f64>,
}

impl BufferInfo {
    /// Effective capacity: `bufferLength * bufferUsageLimit`. `None` (a
    /// contract violation, per `spec.md` §7) if either field is missing.
    pub fn effective_length(&self) -> Option<i64> {
        let length = self.buffer_length?;
        let limit = self.buffer_usage_limit?;
        Some((length as f64 * limit) as i64)
    }

    /// Target free headroom: `bufferLength * targetBufferAvailabilityPercent / 100`.
    /// `None` if `bufferLength` is missing.
    pub fn target_free_headroom(&self, target_buffer_availability_percent: f64) -> Option<i64> {
        let length = self.buffer_length?;
        Some((length as f64 * target_buffer_availability_percent / 100.0) as i64)
    }
}

/// The outbound trait implemented by a per-pipeline daemon RPC client.
/// Implemented by the hosting controller, never by this crate.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Fetches per-partition metrics for a vertex.
    async fn get_vertex_metrics(&self, pipeline: &str, vertex: &str) -> Result<Vec<PartitionMetrics>, Error>;

    /// Fetches buffer info for one of a vertex's owned buffers.
    async fn get_pipeline_buffer(&self, pipeline: &str, buffer_name: &str) -> Result<BufferInfo, Error>;

    /// Closes the underlying connection. Called at most once per client,
    /// either on LRU eviction from the [`DaemonClientPool`] or on shutdown
    /// purge.
    async fn close(&self);
}

/// Constructs [`DaemonClient`]s for a given daemon URL. Implemented by the
/// hosting controller.
pub trait DaemonClientFactory: Send + Sync {
    /// Creates a new client connected to `url`.
    fn new_daemon_client(&self, url: &str) -> Arc<dyn DaemonClient>;
}

/// Capacity default, matching `spec.md` §2.
pub const DEFAULT_CAPACITY: usize = 100;

pub(crate) fn bounded_cache<K: std::hash::Hash + Eq, V>(capacity: usize) -> Mutex<LruCache<K, V>> {
    let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
    Mutex::new(LruCache::new(capacity))
}
